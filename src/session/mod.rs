//! Session-scoped override values.
//!
//! Values set here win over whatever the extracted `wp-config.php` says. Without a session
//! backend nothing can be stored: writes are refused and reads fall through to the caller's default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverrideKey {
    DbHost,
    DbUser,
    DbPassword,
    DbName,
    DbTablePrefix,
    TargetUrl,
    TempDir,
}

impl OverrideKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideKey::DbHost => "_dbhost",
            OverrideKey::DbUser => "_dbuser",
            OverrideKey::DbPassword => "_dbpassword",
            OverrideKey::DbName => "_dbname",
            OverrideKey::DbTablePrefix => "_dbtable_prefix",
            OverrideKey::TargetUrl => "TARGET_URL",
            OverrideKey::TempDir => "temp_dir",
        }
    }
}

/// Persistence behind an `OverrideStore`.
pub trait SessionBackend: Send {
    fn load(&self) -> Result<HashMap<String, String>>;
    fn save(&self, values: &HashMap<String, String>) -> Result<()>;
}

/// Keeps values for the lifetime of the process. Used by tests and by `drive`.
#[derive(Debug, Default)]
pub struct MemorySession {
    values: Mutex<HashMap<String, String>>,
}

impl SessionBackend for MemorySession {
    fn load(&self) -> Result<HashMap<String, String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("Session lock poisoned"))?;
        Ok(values.clone())
    }

    fn save(&self, values: &HashMap<String, String>) -> Result<()> {
        let mut stored = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("Session lock poisoned"))?;
        *stored = values.clone();
        Ok(())
    }
}

impl<T: SessionBackend + Sync> SessionBackend for std::sync::Arc<T> {
    fn load(&self) -> Result<HashMap<String, String>> {
        (**self).load()
    }

    fn save(&self, values: &HashMap<String, String>) -> Result<()> {
        (**self).save(values)
    }
}

/// JSON file keyed by session id, surviving across separate invocations.
#[derive(Debug, Clone)]
pub struct FileSession {
    path: PathBuf,
}

impl FileSession {
    pub fn new(dir: impl Into<PathBuf>, session_id: &str) -> Self {
        let safe_id: String = session_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        FileSession {
            path: dir.into().join(format!("si_session_{}.json", safe_id)),
        }
    }
}

impl SessionBackend for FileSession {
    fn load(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session file {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session file {}", self.path.display()))
    }

    fn save(&self, values: &HashMap<String, String>) -> Result<()> {
        let content = serde_json::to_string_pretty(values)?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write session file {}", self.path.display()))
    }
}

pub struct OverrideStore {
    backend: Option<Box<dyn SessionBackend>>,
    values: HashMap<String, String>,
}

impl OverrideStore {
    /// A store that cannot hold anything.
    pub fn disabled() -> Self {
        OverrideStore {
            backend: None,
            values: HashMap::new(),
        }
    }

    /// Opens the session; an unreadable session behaves as if no session were available.
    pub fn open(backend: Box<dyn SessionBackend>) -> Self {
        match backend.load() {
            Ok(values) => OverrideStore {
                backend: Some(backend),
                values,
            },
            Err(e) => {
                warn!("Session unavailable, overrides disabled: {:#}", e);
                OverrideStore::disabled()
            }
        }
    }

    pub fn can_override(&self) -> bool {
        self.backend.is_some()
    }

    pub fn has_overrides(&self) -> bool {
        self.can_override() && !self.values.is_empty()
    }

    pub fn get(&self, key: OverrideKey) -> Option<&str> {
        self.values
            .get(key.as_str())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn get_or<'a>(&'a self, key: OverrideKey, fallback: &'a str) -> &'a str {
        self.get(key).unwrap_or(fallback)
    }

    pub fn set(&mut self, key: OverrideKey, value: impl Into<String>) -> bool {
        let Some(backend) = &self.backend else {
            return false;
        };
        self.values.insert(key.as_str().to_string(), value.into());
        match backend.save(&self.values) {
            Ok(()) => {
                debug!("Override {} stored", key.as_str());
                true
            }
            Err(e) => {
                warn!("Failed to persist override {}: {:#}", key.as_str(), e);
                false
            }
        }
    }

    pub fn drop(&mut self, key: OverrideKey) -> bool {
        let Some(backend) = &self.backend else {
            return false;
        };
        self.values.remove(key.as_str());
        backend.save(&self.values).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_store_refuses_writes() {
        let mut store = OverrideStore::disabled();
        assert!(!store.can_override());
        assert!(!store.set(OverrideKey::DbHost, "db.internal"));
        assert!(!store.drop(OverrideKey::DbHost));
        assert_eq!(store.get(OverrideKey::DbHost), None);
        assert_eq!(store.get_or(OverrideKey::DbHost, "localhost"), "localhost");
    }

    #[test]
    fn test_set_get_drop_roundtrip() {
        let mut store = OverrideStore::open(Box::new(MemorySession::default()));
        assert!(store.can_override());
        assert!(!store.has_overrides());

        assert!(store.set(OverrideKey::DbName, "wordpress"));
        assert_eq!(store.get(OverrideKey::DbName), Some("wordpress"));
        assert!(store.has_overrides());

        assert!(store.drop(OverrideKey::DbName));
        assert_eq!(store.get(OverrideKey::DbName), None);
    }

    #[test]
    fn test_file_session_survives_reopen() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut store = OverrideStore::open(Box::new(FileSession::new(dir.path(), "abc")));
            assert!(store.set(OverrideKey::TargetUrl, "https://new.example/blog"));
        }
        let store = OverrideStore::open(Box::new(FileSession::new(dir.path(), "abc")));
        assert_eq!(store.get(OverrideKey::TargetUrl), Some("https://new.example/blog"));

        let other = OverrideStore::open(Box::new(FileSession::new(dir.path(), "other")));
        assert_eq!(other.get(OverrideKey::TargetUrl), None);
        Ok(())
    }

    #[test]
    fn test_corrupt_session_disables_overrides() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("si_session_bad.json"), "not json")?;
        let store = OverrideStore::open(Box::new(FileSession::new(dir.path(), "bad")));
        assert!(!store.can_override());
        Ok(())
    }
}
