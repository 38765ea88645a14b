//! Readers/writers for the settings files shipped inside a snapshot.

pub(crate) mod htaccess;
pub(crate) mod manifest;
pub(crate) mod wpconfig;

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub use htaccess::Htaccess;
pub use manifest::Manifest;
pub use wpconfig::WpConfig;

/// A key/value view over a settings file whose raw text can be patched and written back.
pub trait ConfigFile {
    fn file(&self) -> Option<&Path>;
    fn raw(&self) -> &str;
    fn get(&self, key: &str) -> Option<&str>;

    /// Rewrites the value of `key` inside the raw text. `false` when the key cannot be updated.
    fn update_raw(&mut self, key: &str, value: &str) -> bool;

    fn has_file(&self) -> bool {
        self.file().is_some_and(Path::is_file)
    }

    fn get_or<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.get(key).unwrap_or(fallback)
    }

    fn write(&self) -> Result<()> {
        let path = self
            .file()
            .context("Settings file has no location to write to")?;
        fs::write(path, self.raw())
            .with_context(|| format!("Failed to write settings file {}", path.display()))
    }
}
