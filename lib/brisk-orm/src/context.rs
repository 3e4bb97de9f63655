use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::{OrmError, QueryExecutor, QueryOutput, TransactionExecutor};

/// A transaction on one reserved connection.
///
/// Clones share the same connection. [`TransactionContext::end`] must be
/// called exactly once to release it; any use afterwards fails with
/// [`OrmError::ContextClosed`].
#[derive(Clone)]
pub struct TransactionContext {
    conn: Arc<Mutex<Option<Box<dyn TransactionExecutor>>>>,
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext").finish_non_exhaustive()
    }
}

impl TransactionContext {
    /// Reserve a connection from `pool` and begin a transaction on it.
    pub(crate) async fn start(pool: &Arc<dyn QueryExecutor>) -> Result<Self, OrmError> {
        let mut conn = pool.acquire().await.inspect_err(|e| {
            error!(error = %e, "acquire connection error");
        })?;
        if let Err(e) = conn.begin().await {
            error!(error = %e, "begin transaction error");
            if let Err(release) = conn.release().await {
                warn!(error = %release, "release after failed begin");
            }
            return Err(e);
        }
        debug!("transaction started");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    pub async fn query(&self, sql: &str) -> Result<QueryOutput, OrmError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(OrmError::ContextClosed)?;
        conn.query(sql).await
    }

    pub async fn commit(&self) -> Result<(), OrmError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(OrmError::ContextClosed)?;
        conn.commit().await
    }

    /// Roll back, logging the transaction name.
    pub async fn rollback(&self, name: &str) -> Result<(), OrmError> {
        warn!(transaction = name, "transaction rollback");
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(OrmError::ContextClosed)?;
        conn.rollback().await
    }

    /// Release the connection back to the pool.
    pub async fn end(&self) -> Result<(), OrmError> {
        let conn = self.conn.lock().await.take().ok_or(OrmError::ContextClosed)?;
        conn.release().await
    }

    pub async fn is_ended(&self) -> bool {
        self.conn.lock().await.is_none()
    }
}
