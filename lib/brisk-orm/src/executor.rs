//! Driver boundary.
//!
//! The core formats every statement itself and hands finished SQL to a
//! driver. A driver provides a pool ([`QueryExecutor`]), dedicated
//! connections for transactions ([`TransactionExecutor`]) and a way to create
//! the pool ([`Connector`]).

use async_trait::async_trait;

use crate::{ConnectOptions, OrmError};

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Outcome of a single statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub rows: Vec<Row>,
    pub affected_rows: u64,
    pub last_insert_id: Option<u64>,
    /// Number of result columns; non-zero for row-returning statements.
    pub field_count: u64,
}

impl QueryOutput {
    /// Output of a row-returning statement.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        let field_count = rows.first().map(|r| r.len() as u64).unwrap_or_default();
        Self {
            rows,
            field_count,
            ..Default::default()
        }
    }

    /// Output of a write statement.
    pub fn affected(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            ..Default::default()
        }
    }

    /// A write statement succeeded when the driver reported no result columns.
    pub fn is_success(&self) -> bool {
        self.field_count == 0
    }
}

/// Shared connection pool.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a formatted statement on any pooled connection.
    async fn query(&self, sql: &str) -> Result<QueryOutput, OrmError>;

    /// Reserve a connection for exclusive use.
    async fn acquire(&self) -> Result<Box<dyn TransactionExecutor>, OrmError>;

    /// Close the pool. Reserved connections are unaffected.
    async fn close(&self) -> Result<(), OrmError>;
}

/// A reserved connection.
#[async_trait]
pub trait TransactionExecutor: Send + Sync {
    async fn begin(&mut self) -> Result<(), OrmError>;

    async fn commit(&mut self) -> Result<(), OrmError>;

    async fn rollback(&mut self) -> Result<(), OrmError>;

    async fn query(&mut self, sql: &str) -> Result<QueryOutput, OrmError>;

    /// Return the connection to its pool.
    async fn release(self: Box<Self>) -> Result<(), OrmError>;
}

/// Creates pools from connection options.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn create_pool(
        &self,
        options: &ConnectOptions,
    ) -> Result<std::sync::Arc<dyn QueryExecutor>, OrmError>;
}
