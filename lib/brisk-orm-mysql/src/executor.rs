//! MySQL implementation of the driver traits.
//!
//! Statements arrive fully formatted, so everything runs over the text
//! protocol through `sqlx::raw_sql`.

use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Either, MySql};
use tracing::{debug, info};

use brisk_orm::{
    ConnectOptions, ConnectionConfig, Connector, OrmError, QueryExecutor, QueryOutput,
    TransactionExecutor,
};

use crate::typecast::row_to_json;

const DEFAULT_PORT: u16 = 3306;

fn database_error(e: sqlx::Error) -> OrmError {
    OrmError::Database(e.to_string())
}

fn connection_error(e: sqlx::Error) -> OrmError {
    OrmError::Connection(e.to_string())
}

/// sqlx connect options for a connection configuration.
pub fn connect_options(config: &ConnectionConfig) -> Result<MySqlConnectOptions, OrmError> {
    match config {
        ConnectionConfig::Url(url) => url
            .parse::<MySqlConnectOptions>()
            .map_err(connection_error),
        ConnectionConfig::Credentials {
            host,
            port,
            user,
            password,
            database,
            charset,
        } => {
            let options = MySqlConnectOptions::new()
                .host(host)
                .port(port.unwrap_or(DEFAULT_PORT))
                .username(user)
                .password(password)
                .database(database);
            Ok(match charset {
                Some(charset) => options.charset(charset),
                None => options,
            })
        }
    }
}

/// Run one formatted statement and collect rows and write counts.
async fn run<'e, E>(executor: E, sql: &'e str) -> Result<QueryOutput, OrmError>
where
    E: sqlx::Executor<'e, Database = MySql>,
{
    use sqlx::Row;

    let mut stream = sqlx::raw_sql(sql).fetch_many(executor);
    let mut output = QueryOutput::default();
    while let Some(item) = stream.try_next().await.map_err(database_error)? {
        match item {
            Either::Left(result) => {
                output.affected_rows += result.rows_affected();
                if result.last_insert_id() > 0 {
                    output.last_insert_id = Some(result.last_insert_id());
                }
            }
            Either::Right(row) => {
                if output.field_count == 0 {
                    output.field_count = row.columns().len() as u64;
                }
                output.rows.push(row_to_json(&row)?);
            }
        }
    }
    Ok(output)
}

/// Wrapper around sqlx::MySqlPool that implements QueryExecutor.
#[derive(Clone, Debug)]
pub struct MySqlPool(sqlx::MySqlPool);

impl MySqlPool {
    pub fn new(pool: sqlx::MySqlPool) -> Self {
        Self(pool)
    }

    /// Open a pool for `options`.
    pub async fn connect(options: &ConnectOptions) -> Result<Self, OrmError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect_options(&options.connection)?)
            .await
            .map_err(connection_error)?;
        info!(max_connections = options.max_connections, "mysql pool connected");
        Ok(Self(pool))
    }

    /// Get the inner sqlx::MySqlPool.
    pub fn inner(&self) -> &sqlx::MySqlPool {
        &self.0
    }
}

impl Deref for MySqlPool {
    type Target = sqlx::MySqlPool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl QueryExecutor for MySqlPool {
    async fn query(&self, sql: &str) -> Result<QueryOutput, OrmError> {
        run(&self.0, sql).await
    }

    async fn acquire(&self) -> Result<Box<dyn TransactionExecutor>, OrmError> {
        let conn = self.0.acquire().await.map_err(connection_error)?;
        Ok(Box::new(MySqlReservedConnection { conn }))
    }

    async fn close(&self) -> Result<(), OrmError> {
        self.0.close().await;
        debug!("mysql pool closed");
        Ok(())
    }
}

/// A pooled connection reserved for one transaction.
pub struct MySqlReservedConnection {
    conn: PoolConnection<MySql>,
}

#[async_trait]
impl TransactionExecutor for MySqlReservedConnection {
    async fn begin(&mut self) -> Result<(), OrmError> {
        run(&mut *self.conn, "START TRANSACTION").await.map(|_| ())
    }

    async fn commit(&mut self) -> Result<(), OrmError> {
        run(&mut *self.conn, "COMMIT").await.map(|_| ())
    }

    async fn rollback(&mut self) -> Result<(), OrmError> {
        run(&mut *self.conn, "ROLLBACK").await.map(|_| ())
    }

    async fn query(&mut self, sql: &str) -> Result<QueryOutput, OrmError> {
        run(&mut *self.conn, sql).await
    }

    async fn release(self: Box<Self>) -> Result<(), OrmError> {
        // dropping a PoolConnection returns it to the pool
        drop(self.conn);
        Ok(())
    }
}

/// Creates [`MySqlPool`]s for an [`brisk_orm::Orm`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MySqlConnector;

impl MySqlConnector {
    /// A runtime backed by MySQL.
    pub fn orm() -> brisk_orm::Orm {
        brisk_orm::Orm::new(MySqlConnector)
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    async fn create_pool(
        &self,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn QueryExecutor>, OrmError> {
        Ok(Arc::new(MySqlPool::connect(options).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_build_options() {
        let config = ConnectionConfig::Credentials {
            host: "db.local".to_string(),
            port: None,
            user: "app".to_string(),
            password: "secret".to_string(),
            database: "shop".to_string(),
            charset: Some("utf8mb4".to_string()),
        };
        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "db.local");
        assert_eq!(options.get_port(), DEFAULT_PORT);
        assert_eq!(options.get_database(), Some("shop"));
    }

    #[test]
    fn urls_parse() {
        let options = connect_options(&ConnectionConfig::from("mysql://app:pw@localhost:3307/shop"))
            .unwrap();
        assert_eq!(options.get_port(), 3307);
        assert_eq!(options.get_username(), "app");
    }

    #[test]
    fn bad_urls_are_connection_errors() {
        let err = connect_options(&ConnectionConfig::from("not a url")).unwrap_err();
        assert!(matches!(err, OrmError::Connection(_)));
    }
}
