//! Connection and synchronization configuration.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Connection configuration for the database server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConnectionConfig {
    /// Connect using a database URL string.
    Url(String),
    Credentials {
        host: String,
        #[serde(default)]
        port: Option<u16>,
        user: String,
        password: String,
        database: String,
        #[serde(default)]
        charset: Option<String>,
    },
}

impl From<&str> for ConnectionConfig {
    fn from(url: &str) -> Self {
        ConnectionConfig::Url(url.to_string())
    }
}

impl From<String> for ConnectionConfig {
    fn from(url: String) -> Self {
        ConnectionConfig::Url(url)
    }
}

impl From<&String> for ConnectionConfig {
    fn from(url: &String) -> Self {
        ConnectionConfig::Url(url.clone())
    }
}

/// Schema synchronization switches.
///
/// Creation of missing tables is always on while `enable` is set; dropping
/// and altering tables are opt-in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSyncConfig {
    pub enable: bool,
    pub enable_delete_table: bool,
    pub enable_update_table: bool,
    /// Tables the synchronizer never touches.
    pub expect_tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub connection: ConnectionConfig,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub auto_sync: AutoSyncConfig,
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

impl ConnectOptions {
    pub fn new(connection: impl Into<ConnectionConfig>) -> Self {
        Self {
            connection: connection.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            auto_sync: AutoSyncConfig::default(),
        }
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn auto_sync(mut self, auto_sync: AutoSyncConfig) -> Self {
        self.auto_sync = auto_sync;
        self
    }
}
