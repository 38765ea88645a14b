// snapshotinstaller/src/sitecfg/wpconfig.rs
use anyhow::{Context, Result};
use regex::{Captures, NoExpand, Regex};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::ConfigFile;
use crate::fs::SiteFs;

pub const TABLE_PREFIX_KEY: &str = "$table_prefix";

/// A single- or double-quoted PHP string literal; the body lands in group 1 or 2 respectively.
const LITERAL: &str = r#"(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)")"#;

static DEFINE_RX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"define\s*\(\s*{LITERAL}\s*,\s*{LITERAL}\s*\)"))
        .expect("valid define pattern")
});

static VARIABLE_RX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(\$[A-Za-z_][A-Za-z0-9_]*)\s*=\s*{LITERAL}\s*;"))
        .expect("valid variable pattern")
});

/// The `wp-config.php` of a site: `define('KEY', 'value')` pairs and string variables.
#[derive(Debug, Clone, Default)]
pub struct WpConfig {
    file: Option<PathBuf>,
    raw: String,
    data: BTreeMap<String, String>,
}

impl WpConfig {
    pub const FILE_NAME: &'static str = "wp-config.php";

    /// Reads `wp-config.php` from `dir`. A missing file yields a config holding only defaults.
    pub fn load(dir: &SiteFs) -> Result<Self> {
        if !dir.exists(Self::FILE_NAME) {
            return Ok(Self::parse(""));
        }
        let path = dir.resolve(Self::FILE_NAME);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::parse(&raw);
        config.file = Some(path);
        Ok(config)
    }

    pub fn parse(raw: &str) -> Self {
        let mut data = defaults();
        for caps in DEFINE_RX.captures_iter(raw) {
            if let (Some(key), Some(value)) = (literal(&caps, 1), literal(&caps, 3)) {
                data.insert(key, value);
            }
        }
        for caps in VARIABLE_RX.captures_iter(raw) {
            if let Some(value) = literal(&caps, 2) {
                data.insert(caps[1].to_string(), value);
            }
        }
        WpConfig {
            file: None,
            raw: raw.to_string(),
            data,
        }
    }

    pub fn table_prefix(&self) -> &str {
        self.get_or(TABLE_PREFIX_KEY, "")
    }

    /// DB_NAME, DB_USER, DB_HOST and the table prefix are all present.
    pub fn is_complete(&self) -> bool {
        self.has_file()
            && ["DB_NAME", "DB_USER", "DB_HOST", TABLE_PREFIX_KEY]
                .iter()
                .all(|key| !self.get_or(key, "").is_empty())
    }
}

impl ConfigFile for WpConfig {
    fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    fn raw(&self) -> &str {
        &self.raw
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    fn update_raw(&mut self, key: &str, value: &str) -> bool {
        let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
        let (pattern, replacement) = if key.starts_with('$') {
            (
                format!(r"{}\s*=\s*{LITERAL}\s*;", regex::escape(key)),
                format!("{} = '{}';", key, escaped),
            )
        } else {
            (
                format!(
                    r#"define\s*\(\s*['"]{}['"]\s*,\s*{LITERAL}\s*\)\s*;"#,
                    regex::escape(key)
                ),
                format!("define('{}', '{}');", key, escaped),
            )
        };
        let Ok(rx) = Regex::new(&pattern) else {
            return false;
        };
        if !rx.is_match(&self.raw) {
            return false;
        }
        self.raw = rx.replace_all(&self.raw, NoExpand(&replacement)).into_owned();
        self.data.insert(key.to_string(), value.to_string());
        true
    }
}

/// Body of the literal whose single-quoted form is capture `first` and double-quoted form `first + 1`.
fn literal(caps: &Captures<'_>, first: usize) -> Option<String> {
    if let Some(body) = caps.get(first) {
        return Some(unescape(body.as_str(), '\''));
    }
    caps.get(first + 1).map(|body| unescape(body.as_str(), '"'))
}

/// PHP escapes: single quotes only know `\'` and `\\`; other backslashes stay literal.
fn unescape(body: &str, quote: char) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(next) if next == quote || next == '\\' || (quote == '"' && next == '$') => {
                out.push(next)
            }
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn defaults() -> BTreeMap<String, String> {
    [
        ("DB_NAME", ""),
        ("DB_USER", ""),
        ("DB_PASSWORD", ""),
        ("DB_HOST", "localhost"),
        ("DB_CHARSET", "utf8"),
        ("DB_COLLATE", ""),
        (TABLE_PREFIX_KEY, "wp_"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
