// snapshotinstaller/src/sitecfg/manifest.rs
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::ConfigFile;
use crate::fs::SiteFs;

/// `snapshot_manifest.txt`: one `KEY:value` entry per line. Read-only.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    file: Option<PathBuf>,
    raw: String,
    data: BTreeMap<String, String>,
}

impl Manifest {
    pub const FILE_NAME: &'static str = "snapshot_manifest.txt";

    pub fn load(dir: &SiteFs) -> Result<Self> {
        if !dir.exists(Self::FILE_NAME) {
            return Ok(Manifest::default());
        }
        let path = dir.resolve(Self::FILE_NAME);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut manifest = Self::parse(&raw);
        manifest.file = Some(path);
        Ok(manifest)
    }

    pub fn parse(raw: &str) -> Self {
        let data = raw
            .lines()
            .map(str::trim)
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();
        Manifest {
            file: None,
            raw: raw.to_string(),
            data,
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.get("SNAPSHOT_VERSION")
    }
}

impl ConfigFile for Manifest {
    fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    fn raw(&self) -> &str {
        &self.raw
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    fn update_raw(&mut self, _key: &str, _value: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_on_first_colon() {
        let manifest = Manifest::parse(
            "SNAPSHOT_VERSION:3.1.2\nWP_SITEURL:http://old.example\n\nQUEUES:a:1:{i:0;}\n",
        );
        assert_eq!(manifest.version(), Some("3.1.2"));
        assert_eq!(manifest.get("WP_SITEURL"), Some("http://old.example"));
        assert_eq!(manifest.get("QUEUES"), Some("a:1:{i:0;}"));
    }

    #[test]
    fn test_manifest_is_read_only() {
        let mut manifest = Manifest::parse("SNAPSHOT_VERSION:4.0\n");
        assert!(!manifest.update_raw("SNAPSHOT_VERSION", "5.0"));
        assert_eq!(manifest.version(), Some("4.0"));
        assert!(!manifest.has_file());
    }
}
