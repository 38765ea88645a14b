// snapshotinstaller/src/install/context.rs
use chrono::Utc;
use std::path::Path;
use tracing::{debug, warn};

use crate::archive::SnapshotArchive;
use crate::config::{AppConfig, FILE_CHUNK_SIZE, TABLE_CHUNK_SIZE, TEMP_DIR_PREFIX};
use crate::database::{ConnectionSettings, Database, QueryLog};
use crate::errors::{AppError, ConnectionErrorClass, Result};
use crate::fs::SiteFs;
use crate::session::{OverrideKey, OverrideStore};
use crate::sitecfg::WpConfig;

/// Everything one invocation works with. Rebuilt from scratch for every step.
pub struct InstallContext {
    pub config: AppConfig,
    pub overrides: OverrideStore,
    /// Extraction tree under the temp root.
    pub temp: SiteFs,
    /// Deployment tree.
    pub target: SiteFs,
    pub archive: Option<SnapshotArchive>,
    pub database: Box<dyn Database>,
    pub query_log: QueryLog,
    pub file_chunk_size: usize,
    pub table_chunk_size: usize,
}

impl InstallContext {
    pub fn new(config: AppConfig, mut overrides: OverrideStore, database: Box<dyn Database>) -> Self {
        let temp_name = temp_dir_name(&mut overrides);
        let temp = SiteFs::new(config.temp_root.join(&temp_name));
        let target = SiteFs::new(&config.target_dir);
        let archive = config.archive.as_ref().map(SnapshotArchive::new);
        let query_log = QueryLog::new(config.query_log_path());
        debug!(
            "Context: temp={}, target={}",
            temp.root().display(),
            target.root().display()
        );

        InstallContext {
            config,
            overrides,
            temp,
            target,
            archive,
            database,
            query_log,
            file_chunk_size: FILE_CHUNK_SIZE,
            table_chunk_size: TABLE_CHUNK_SIZE,
        }
    }

    /// URL the deployed site will answer on; an override wins over configuration.
    pub fn target_url(&self) -> String {
        self.overrides
            .get_or(OverrideKey::TargetUrl, &self.config.target_url)
            .to_string()
    }

    pub fn archive(&self) -> Result<&SnapshotArchive> {
        self.archive
            .as_ref()
            .ok_or_else(|| AppError::ConfigMissing("No snapshot archive found".to_string()))
    }

    /// The package's own `wp-config.php`, inside the extraction tree.
    pub fn source_wp_config(&self) -> Result<WpConfig> {
        let config = match self.temp.chroot("www") {
            Some(www) => WpConfig::load(&www)?,
            None => WpConfig::parse(""),
        };
        Ok(config)
    }

    pub fn connection_settings(&self, config: &WpConfig) -> ConnectionSettings {
        ConnectionSettings::resolve(config, &self.overrides)
    }

    /// Connects with `config` plus overrides; failures carry the classified backend code.
    pub async fn connect(&mut self, config: &WpConfig) -> Result<ConnectionSettings> {
        let settings = self.connection_settings(config);
        if self.database.connect(&settings).await {
            return Ok(settings);
        }
        let code = self.database.connection_error_code();
        Err(AppError::ConnectionFailed {
            class: code.map_or(ConnectionErrorClass::Unknown, ConnectionErrorClass::from_code),
            code,
            message: self.database.last_error(),
        })
    }
}

/// Name of the extraction tree, kept in the session so every invocation finds the same one.
fn temp_dir_name(overrides: &mut OverrideStore) -> String {
    if let Some(name) = overrides.get(OverrideKey::TempDir) {
        if is_plain_name(name) {
            return name.to_string();
        }
        warn!("Ignoring unusable temp directory name {:?}", name);
    }
    if !overrides.can_override() {
        return TEMP_DIR_PREFIX.to_string();
    }
    let name = format!("{}{:x}", TEMP_DIR_PREFIX, Utc::now().timestamp_micros());
    overrides.set(OverrideKey::TempDir, name.clone());
    name
}

fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}
