// snapshotinstaller/src/database/mysql.rs
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError};
use sqlx::{Connection, Executor};
use tracing::{debug, info, warn};

use super::{ConnectionSettings, Database};

/// Client-side "can't connect" code, reported for transport failures.
const CR_CONNECTION_ERROR: u16 = 2002;

#[derive(Default)]
pub struct MySqlDatabase {
    conn: Option<MySqlConnection>,
    schema: String,
    connect_error: Option<u16>,
    last_error: String,
}

impl MySqlDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_error(&mut self, err: &sqlx::Error) {
        self.last_error = match err.as_database_error() {
            Some(db_err) => db_err.message().to_string(),
            None => err.to_string(),
        };
    }
}

fn error_code(err: &sqlx::Error) -> Option<u16> {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .try_downcast_ref::<MySqlDatabaseError>()
            .map(MySqlDatabaseError::number),
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => Some(CR_CONNECTION_ERROR),
        _ => None,
    }
}

#[async_trait]
impl Database for MySqlDatabase {
    async fn connect(&mut self, settings: &ConnectionSettings) -> bool {
        if self.conn.is_some() {
            return true;
        }
        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.name);

        debug!(
            "Connecting to mysql://{}@{}:{}/{}",
            settings.user, settings.host, settings.port, settings.name
        );
        match MySqlConnection::connect_with(&options).await {
            Ok(conn) => {
                info!("Connected to database {}", settings.name);
                self.conn = Some(conn);
                self.schema = settings.name.clone();
                self.connect_error = None;
                true
            }
            Err(e) => {
                warn!("Database connection failed: {}", e);
                self.connect_error = error_code(&e);
                self.record_error(&e);
                false
            }
        }
    }

    fn connection_error_code(&self) -> Option<u16> {
        self.connect_error
    }

    async fn query(&mut self, sql: &str) -> bool {
        let Some(conn) = self.conn.as_mut() else {
            self.last_error = "Not connected".to_string();
            return false;
        };
        // Argument-less queries go over the text protocol, so session statements like SET NAMES apply.
        match conn.execute(sql).await {
            Ok(_) => true,
            Err(e) => {
                self.record_error(&e);
                false
            }
        }
    }

    fn last_error(&self) -> String {
        self.last_error.clone()
    }

    async fn is_schema_empty(&mut self) -> bool {
        let schema = self.schema.clone();
        let Some(conn) = self.conn.as_mut() else {
            return true;
        };
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ?",
        )
        .bind(schema)
        .fetch_one(conn)
        .await;
        match count {
            Ok(tables) => tables == 0,
            Err(e) => {
                warn!("Unable to inspect schema: {}", e);
                true
            }
        }
    }
}
