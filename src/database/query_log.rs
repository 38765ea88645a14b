// snapshotinstaller/src/database/query_log.rs
use anyhow::{Context, Result};
use chrono::Local;
use regex::Regex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::warn;

static INSERT_RX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\binsert\b").expect("valid insert pattern"));
static INTO_RX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\binto\s+(\S+?)\s").expect("valid into pattern"));

/// Append-only text log of failed statements, kept next to the package until cleanup.
#[derive(Debug, Clone)]
pub struct QueryLog {
    path: Option<PathBuf>,
}

impl QueryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        QueryLog {
            path: Some(path.into()),
        }
    }

    pub fn disabled() -> Self {
        QueryLog { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn log(&self, msg: &str) {
        if let Err(e) = self.append(msg) {
            warn!("Unable to write query log: {:#}", e);
        }
    }

    fn append(&self, msg: &str) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let stamp = Local::now().format("%Y-%m-%d@%H:%M:%S%:z");
        writeln!(file, "[{}] {}", stamp, msg)
            .with_context(|| format!("Failed to append to {}", path.display()))
    }

    pub fn statement_failed(&self, statement: &str, error: &str) {
        let shown = abbreviate_statement(statement);
        warn!("Query failed: {} ({})", shown, error);
        self.log(&format!("[[Query]] {}", shown));
        self.log(&format!("Error: {}", error));
    }
}

/// INSERTs are reduced to their target table; anything else is logged whole.
pub fn abbreviate_statement(sql: &str) -> String {
    if !INSERT_RX.is_match(sql) {
        return sql.trim().to_string();
    }
    match INTO_RX.captures(sql) {
        Some(caps) => format!("An insert (into {}) query", &caps[1]),
        None => "An insert query".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbreviate_insert_keeps_only_table() {
        assert_eq!(
            abbreviate_statement("INSERT INTO `wp_posts` VALUES (1,'a'),(2,'b');"),
            "An insert (into `wp_posts`) query"
        );
        assert_eq!(abbreviate_statement("  DROP TABLE x;\n"), "DROP TABLE x;");
        assert_eq!(abbreviate_statement("insert ignore"), "An insert query");
    }

    #[test]
    fn test_log_lines_are_timestamped() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("si-error.log");
        let log = QueryLog::new(&path);

        log.statement_failed("INSERT INTO t VALUES (1);", "Table 't' doesn't exist");

        let content = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].contains("@"));
        assert!(lines[0].ends_with("[[Query]] An insert (into t) query"));
        assert!(lines[1].ends_with("Error: Table 't' doesn't exist"));
        Ok(())
    }

    #[test]
    fn test_disabled_log_writes_nothing() {
        let log = QueryLog::disabled();
        log.log("ignored");
        assert!(log.path().is_none());
    }
}
