// snapshotinstaller/src/sitecfg/htaccess.rs
use anyhow::{Context, Result};
use regex::{NoExpand, Regex};
use std::fs;
use std::path::{Path, PathBuf};

use super::ConfigFile;
use crate::fs::SiteFs;

pub const REWRITE_BASE: &str = "RewriteBase";
const REWRITE_RULE: &str = "RewriteRule";

/// Apache directives of the deployed site. `RewriteRule` entries are keyed by directive + pattern.
#[derive(Debug, Clone, Default)]
pub struct Htaccess {
    file: Option<PathBuf>,
    raw: String,
    data: Vec<(String, String)>,
}

impl Htaccess {
    pub const FILE_NAME: &'static str = ".htaccess";

    pub fn load(dir: &SiteFs) -> Result<Self> {
        if !dir.exists(Self::FILE_NAME) {
            return Ok(Htaccess::default());
        }
        let path = dir.resolve(Self::FILE_NAME);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut htaccess = Self::parse(&raw);
        htaccess.file = Some(path);
        Ok(htaccess)
    }

    pub fn parse(raw: &str) -> Self {
        let mut data: Vec<(String, String)> = Vec::new();
        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if !line.starts_with(|c: char| c.is_ascii_uppercase()) {
                continue;
            }
            let Some((directive, rest)) = line.split_once(' ') else {
                continue;
            };
            let (key, value) = if directive == REWRITE_RULE {
                match rest.split_once(' ') {
                    Some((pattern, target)) => (format!("{} {}", directive, pattern), target),
                    None => continue,
                }
            } else {
                (directive.to_string(), rest)
            };
            if data.iter().any(|(k, _)| *k == key) {
                continue;
            }
            data.push((key, value.to_string()));
        }
        Htaccess {
            file: None,
            raw: raw.to_string(),
            data,
        }
    }

    /// Moves every value containing the current `RewriteBase` onto `new_base`.
    ///
    /// Only the first occurrence inside each value is replaced so rewrite targets keep their tail.
    pub fn update_raw_base(&mut self, new_base: &str) -> bool {
        let Some(old) = self.get(REWRITE_BASE).map(str::to_string) else {
            return false;
        };
        let updates: Vec<(String, String)> = self
            .data
            .iter()
            .filter(|(_, value)| value.contains(old.as_str()))
            .map(|(key, value)| (key.clone(), value.replacen(old.as_str(), new_base, 1)))
            .collect();
        for (key, value) in updates {
            self.update_raw(&key, &value);
        }
        true
    }
}

impl ConfigFile for Htaccess {
    fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    fn raw(&self) -> &str {
        &self.raw
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.data
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn update_raw(&mut self, key: &str, value: &str) -> bool {
        let Some(old) = self.get(key).map(str::to_string) else {
            return false;
        };
        let pattern = format!(r"{}\s+{}", regex::escape(key), regex::escape(&old));
        let Ok(rx) = Regex::new(&pattern) else {
            return false;
        };
        let replacement = format!("{} {}", key, value);
        self.raw = rx.replace_all(&self.raw, NoExpand(&replacement)).into_owned();
        if let Some(entry) = self.data.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# BEGIN WordPress
<IfModule mod_rewrite.c>
RewriteEngine On
RewriteBase /old/
RewriteRule ^index\\.php$ - [L]
RewriteCond %{REQUEST_FILENAME} !-f
RewriteRule . /old/index.php [L]
</IfModule>
# END WordPress
";

    #[test]
    fn test_parse_keys_rewrite_rules_by_pattern() {
        let htaccess = Htaccess::parse(SAMPLE);
        assert_eq!(htaccess.get(REWRITE_BASE), Some("/old/"));
        assert_eq!(htaccess.get("RewriteRule ."), Some("/old/index.php [L]"));
        assert_eq!(htaccess.get("RewriteRule ^index\\.php$"), Some("- [L]"));
        assert_eq!(htaccess.get("RewriteEngine"), Some("On"));
    }

    #[test]
    fn test_update_raw_base_moves_base_and_rule_targets() {
        let mut htaccess = Htaccess::parse(SAMPLE);
        assert!(htaccess.update_raw_base("/new/"));

        assert!(htaccess.raw().contains("RewriteBase /new/\n"));
        assert!(htaccess.raw().contains("RewriteRule . /new/index.php [L]"));
        assert!(htaccess.raw().contains("RewriteRule ^index\\.php$ - [L]"));
        assert!(htaccess.raw().contains("# BEGIN WordPress"));
    }

    #[test]
    fn test_without_base_nothing_changes() {
        let mut htaccess = Htaccess::parse("Options -Indexes\n");
        assert!(!htaccess.update_raw_base("/new/"));
        assert_eq!(htaccess.raw(), "Options -Indexes\n");
    }
}
