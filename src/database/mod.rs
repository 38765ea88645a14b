//! The `connect / query / last_error` capability the restore job and the installer steps run against.

pub(crate) mod mysql;
pub(crate) mod query_log;

use async_trait::async_trait;
use serde::Serialize;

use crate::session::{OverrideKey, OverrideStore};
use crate::sitecfg::wpconfig::TABLE_PREFIX_KEY;
use crate::sitecfg::{ConfigFile, WpConfig};

pub use mysql::MySqlDatabase;
pub use query_log::QueryLog;

pub const DEFAULT_PORT: u16 = 3306;

/// Connection parameters after overrides have been applied on top of `wp-config.php`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub name: String,
    pub table_prefix: String,
}

impl ConnectionSettings {
    pub fn resolve(config: &WpConfig, overrides: &OverrideStore) -> Self {
        let pick = |key: OverrideKey, config_key: &str| -> String {
            overrides
                .get(key)
                .unwrap_or_else(|| config.get_or(config_key, ""))
                .to_string()
        };

        let (host, port) = split_host(&pick(OverrideKey::DbHost, "DB_HOST"));
        ConnectionSettings {
            host,
            port: port.unwrap_or(DEFAULT_PORT),
            user: pick(OverrideKey::DbUser, "DB_USER"),
            password: pick(OverrideKey::DbPassword, "DB_PASSWORD"),
            name: pick(OverrideKey::DbName, "DB_NAME"),
            table_prefix: pick(OverrideKey::DbTablePrefix, TABLE_PREFIX_KEY),
        }
    }
}

/// `db.example:3307` → (`db.example`, 3307). A non-numeric suffix stays part of the host.
pub fn split_host(raw: &str) -> (String, Option<u16>) {
    if let Some((host, port)) = raw.split_once(':') {
        if let Ok(port) = port.parse::<u16>() {
            return (host.to_string(), Some(port));
        }
    }
    (raw.to_string(), None)
}

#[async_trait]
pub trait Database: Send {
    /// Opens the connection; `false` leaves the error code in `connection_error_code`.
    async fn connect(&mut self, settings: &ConnectionSettings) -> bool;

    /// Backend error code of the last failed connect.
    fn connection_error_code(&self) -> Option<u16>;

    /// Runs one statement verbatim.
    async fn query(&mut self, sql: &str) -> bool;

    fn last_error(&self) -> String;

    /// `true` when the schema holds no tables, or when it cannot be inspected.
    async fn is_schema_empty(&mut self) -> bool;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory backend recording every statement it is given.
    #[derive(Debug, Default, Clone)]
    pub struct RecordingDatabase {
        pub executed: Arc<Mutex<Vec<String>>>,
        pub connected_with: Arc<Mutex<Option<ConnectionSettings>>>,
        /// Statements containing any of these fragments fail.
        pub fail_on: Vec<String>,
        /// Connect fails with this code when set.
        pub refuse_code: Option<u16>,
        pub schema_empty: bool,
        pub last_error: String,
    }

    impl RecordingDatabase {
        pub fn statements(&self) -> Vec<String> {
            self.executed.lock().map(|v| v.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Database for RecordingDatabase {
        async fn connect(&mut self, settings: &ConnectionSettings) -> bool {
            if let Ok(mut slot) = self.connected_with.lock() {
                *slot = Some(settings.clone());
            }
            self.refuse_code.is_none()
        }

        fn connection_error_code(&self) -> Option<u16> {
            self.refuse_code
        }

        async fn query(&mut self, sql: &str) -> bool {
            if let Ok(mut executed) = self.executed.lock() {
                executed.push(sql.to_string());
            }
            if self.fail_on.iter().any(|fragment| sql.contains(fragment.as_str())) {
                self.last_error = format!("Rejected: {}", sql.chars().take(20).collect::<String>());
                return false;
            }
            true
        }

        fn last_error(&self) -> String {
            self.last_error.clone()
        }

        async fn is_schema_empty(&mut self) -> bool {
            self.schema_empty
        }
    }
}
