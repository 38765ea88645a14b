// snapshotinstaller/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::fs::SiteFs;

/// Files copied per CopyFiles invocation.
pub const FILE_CHUNK_SIZE: usize = 250;
/// Table dumps restored per RestoreTables invocation.
pub const TABLE_CHUNK_SIZE: usize = 1;

pub const QUERY_LOG_FILE: &str = "si-error.log";
pub const TEMP_DIR_PREFIX: &str = "si_test";

// Later patterns win when several match.
const ARCHIVE_LOCATIONS: &[&str] = &[
    "[0-9a-f][0-9a-f][0-9a-f][0-9a-f][0-9a-f][0-9a-f][0-9a-f][0-9a-f][0-9a-f][0-9a-f][0-9a-f][0-9a-f].zip",
    "full_*.zip",
    "build/data/*.zip",
    "*.tar.gz",
];

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub path_root: Option<PathBuf>,
    pub archive: Option<PathBuf>,
    pub target: Option<PathBuf>,
    pub target_url: Option<String>,
    pub temp_root: Option<PathBuf>,
    pub session: Option<String>,
}

// Application's internal configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub path_root: PathBuf,
    pub archive: Option<PathBuf>,
    pub target_dir: PathBuf,
    pub target_url: String,
    pub temp_root: PathBuf,
    pub session_id: Option<String>,
}

impl AppConfig {
    /// Loads `config.json` when present and resolves it against `SI_*` environment variables.
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let raw = if config_path.exists() {
            let config_content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
            serde_json::from_str::<RawJsonConfig>(&config_content).with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?
        } else {
            info!(
                "No config file at {}, using environment and defaults",
                config_path.display()
            );
            RawJsonConfig::default()
        };

        Self::resolve(raw, |key| std::env::var(key).ok())
    }

    /// Environment values (`SI_<KEY>`) win over the JSON file; defaults fill the rest.
    pub fn resolve<F>(raw: RawJsonConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let path_root = match env("SI_PATH_ROOT").map(PathBuf::from).or(raw.path_root) {
            Some(p) => p,
            None => std::env::current_dir().context("Failed to determine current directory")?,
        };
        let root = SiteFs::new(&path_root);

        let target_dir = match env("SI_TARGET").map(PathBuf::from).or(raw.target) {
            Some(p) if p.is_absolute() => p,
            Some(p) => path_root.join(p),
            None => path_root.join(default_target(&root)),
        };

        let archive = match env("SI_ARCHIVE").map(PathBuf::from).or(raw.archive) {
            Some(p) if p.is_absolute() => Some(p),
            Some(p) => Some(path_root.join(p)),
            None => discover_archive(&root),
        };

        let target_url = env("SI_TARGET_URL")
            .or(raw.target_url)
            .unwrap_or_else(|| default_target_url(&default_target(&root)));

        let temp_root = env("SI_TEMP_ROOT")
            .map(PathBuf::from)
            .or(raw.temp_root)
            .unwrap_or_else(std::env::temp_dir);

        let session_id = env("SI_SESSION").or(raw.session);

        debug!(
            "Resolved configuration: root={}, target={}, archive={:?}",
            path_root.display(),
            target_dir.display(),
            archive
        );

        Ok(AppConfig {
            path_root,
            archive,
            target_dir,
            target_url,
            temp_root,
            session_id,
        })
    }

    pub fn query_log_path(&self) -> PathBuf {
        self.path_root.join(QUERY_LOG_FILE)
    }
}

/// Development layouts keep the deployment under `build/target`.
fn default_target(root: &SiteFs) -> PathBuf {
    if root.exists("src") && root.exists("build") {
        PathBuf::from("build/target")
    } else {
        PathBuf::new()
    }
}

fn default_target_url(relative_target: &Path) -> String {
    let rel = relative_target.to_string_lossy();
    let rel = rel.trim_matches('/');
    if rel.is_empty() {
        "http://localhost/".to_string()
    } else {
        format!("http://localhost/{}/", rel)
    }
}

fn discover_archive(root: &SiteFs) -> Option<PathBuf> {
    let mut archive = None;
    for pattern in ARCHIVE_LOCATIONS {
        if let Some(found) = root.glob(pattern).into_iter().next() {
            archive = Some(found);
        }
    }
    archive
}
