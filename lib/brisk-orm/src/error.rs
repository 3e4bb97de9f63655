use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrmError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Not connected: call connect() first")]
    NotConnected,

    #[error("Pool closed")]
    PoolClosed,

    #[error("Transaction context already ended")]
    ContextClosed,

    #[error("Not registered: {0}")]
    NotRegistered(String),
}

impl OrmError {
    /// Shorthand for the "operation requires a primary key" validation failure.
    pub fn no_primary_key(table: &str) -> Self {
        OrmError::Validation(format!("no primaryKey on table {}", table))
    }
}
