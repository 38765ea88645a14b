// snapshotinstaller/src/restore/table_job.rs
use serde::Serialize;
use std::borrow::Cow;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use super::splitter;
use crate::database::{Database, QueryLog};
use crate::errors::{AppError, Result};

/// Session setup sent before the first statement of every dump.
pub const SETUP_STATEMENTS: [&str; 3] = [
    "SET SQL_MODE='ALLOW_INVALID_DATES';",
    "SET FOREIGN_KEY_CHECKS=0",
    "SET NAMES utf8mb4",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementError {
    pub statement: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreResult {
    /// Table name after prefix rewriting.
    pub table: String,
    pub overall_status: bool,
    pub statements: usize,
    pub per_statement_errors: Vec<StatementError>,
}

impl RestoreResult {
    pub fn last_error(&self) -> Option<&str> {
        self.per_statement_errors.last().map(|e| e.error.as_str())
    }
}

/// `wp_posts` with prefixes `wp_` → `blog_` becomes `blog_posts`. Names without the source prefix are kept.
pub fn rename_table(table: &str, source_prefix: &str, target_prefix: &str) -> String {
    if source_prefix == target_prefix {
        return table.to_string();
    }
    match table.strip_prefix(source_prefix) {
        Some(rest) => format!("{}{}", target_prefix, rest),
        None => table.to_string(),
    }
}

/// Replaces the exact backtick-quoted `table` identifier with `renamed`.
pub fn rewrite_table_name<'s>(sql: &'s str, table: &str, renamed: &str) -> Cow<'s, str> {
    if table == renamed {
        return Cow::Borrowed(sql);
    }
    let quoted = format!("`{}`", table);
    if !sql.contains(&quoted) {
        return Cow::Borrowed(sql);
    }
    Cow::Owned(sql.replace(&quoted, &format!("`{}`", renamed)))
}

/// Restores one table dump, statement by statement.
///
/// The table name comes from the file stem. A failing statement is logged and recorded but the
/// rest of the dump still runs; `overall_status` is false if any statement failed.
pub async fn restore_table(
    dump_path: &Path,
    source_prefix: &str,
    target_prefix: &str,
    db: &mut dyn Database,
    log: &QueryLog,
) -> Result<RestoreResult> {
    let table = dump_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| AppError::MalformedDump("Unable to determine table".to_string()))?;

    let raw = fs::read(dump_path).map_err(|e| {
        AppError::MalformedDump(format!("Unable to read {}: {}", dump_path.display(), e))
    })?;
    if raw.is_empty() {
        return Err(AppError::MalformedDump(format!(
            "Dump {} is empty",
            dump_path.display()
        )));
    }
    let sql = String::from_utf8(raw).map_err(|_| {
        AppError::MalformedDump(format!("Dump {} is not valid UTF-8", dump_path.display()))
    })?;

    let renamed = rename_table(&table, source_prefix, target_prefix);
    let sql = rewrite_table_name(&sql, &table, &renamed);
    if renamed != table {
        debug!("Restoring {} as {}", table, renamed);
    }

    for setup in SETUP_STATEMENTS {
        if !db.query(setup).await {
            log.statement_failed(setup, &db.last_error());
        }
    }

    let mut result = RestoreResult {
        table: renamed,
        overall_status: true,
        ..Default::default()
    };
    for statement in splitter::split(&sql) {
        result.statements += 1;
        if db.query(&statement).await {
            continue;
        }
        let error = db.last_error();
        log.statement_failed(&statement, &error);
        result.overall_status = false;
        result.per_statement_errors.push(StatementError { statement, error });
    }

    if result.overall_status {
        info!(
            "Restored table {} ({} statements)",
            result.table, result.statements
        );
    } else {
        warn!(
            "Table {} restored with {} failed statement(s)",
            result.table,
            result.per_statement_errors.len()
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::RecordingDatabase;

    const DUMP: &str = "DROP TABLE IF EXISTS `wp_posts`;\n\
        CREATE TABLE `wp_posts` (`ID` bigint(20) NOT NULL);\n\
        INSERT INTO `wp_posts` VALUES (1),(2);\n\
        -- `wp_posts` done\n";

    fn write_dump(dir: &Path, name: &str, content: &str) -> anyhow::Result<std::path::PathBuf> {
        let path = dir.join(name);
        fs::write(&path, content)?;
        Ok(path)
    }

    #[test]
    fn test_rename_table() {
        assert_eq!(rename_table("wp_posts", "wp_", "blog_"), "blog_posts");
        assert_eq!(rename_table("wp_posts", "wp_", "wp_"), "wp_posts");
        assert_eq!(rename_table("other_posts", "wp_", "blog_"), "other_posts");
    }

    #[test]
    fn test_rewrite_touches_only_exact_identifier() {
        let sql = "INSERT INTO `wp_posts` VALUES ('see wp_posts', '`wp_postsmeta`');";
        let rewritten = rewrite_table_name(sql, "wp_posts", "blog_posts");
        assert_eq!(
            rewritten,
            "INSERT INTO `blog_posts` VALUES ('see wp_posts', '`wp_postsmeta`');"
        );
    }

    #[tokio::test]
    async fn test_restore_runs_setup_then_statements() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_dump(dir.path(), "wp_posts.sql", DUMP)?;
        let mut db = RecordingDatabase::default();

        let result = restore_table(&path, "wp_", "wp_", &mut db, &QueryLog::disabled()).await?;

        assert!(result.overall_status);
        assert_eq!(result.table, "wp_posts");
        assert_eq!(result.statements, 3);
        let executed = db.statements();
        assert_eq!(&executed[..3], &SETUP_STATEMENTS);
        assert_eq!(executed.len(), 6);
        assert_eq!(executed[3], "DROP TABLE IF EXISTS `wp_posts`");
        Ok(())
    }

    #[tokio::test]
    async fn test_same_prefix_restores_are_byte_identical() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_dump(dir.path(), "wp_posts.sql", DUMP)?;

        let mut first = RecordingDatabase::default();
        restore_table(&path, "wp_", "wp_", &mut first, &QueryLog::disabled()).await?;
        let mut second = RecordingDatabase::default();
        restore_table(&path, "wp_", "wp_", &mut second, &QueryLog::disabled()).await?;

        assert_eq!(first.statements(), second.statements());
        assert!(first.statements().iter().all(|s| !s.contains("blog_")));
        Ok(())
    }

    #[tokio::test]
    async fn test_prefix_rewrite_renames_table_in_statements() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_dump(dir.path(), "wp_posts.sql", DUMP)?;
        let mut db = RecordingDatabase::default();

        let result = restore_table(&path, "wp_", "blog_", &mut db, &QueryLog::disabled()).await?;

        assert_eq!(result.table, "blog_posts");
        let executed = db.statements();
        assert_eq!(executed[3], "DROP TABLE IF EXISTS `blog_posts`");
        assert!(executed[5].starts_with("INSERT INTO `blog_posts`"));
        assert!(executed.iter().all(|s| !s.contains("`wp_posts`")));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_statement_does_not_stop_the_dump() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_dump(dir.path(), "wp_posts.sql", DUMP)?;
        let log_path = dir.path().join("si-error.log");
        let mut db = RecordingDatabase {
            fail_on: vec!["CREATE TABLE".to_string()],
            ..Default::default()
        };

        let result = restore_table(&path, "wp_", "wp_", &mut db, &QueryLog::new(&log_path)).await?;

        assert!(!result.overall_status);
        assert_eq!(result.per_statement_errors.len(), 1);
        assert!(result.per_statement_errors[0].statement.starts_with("CREATE TABLE"));
        assert!(result.last_error().is_some_and(|e| e.starts_with("Rejected")));
        // The INSERT after the failure still ran.
        assert_eq!(db.statements().len(), 6);
        assert!(fs::read_to_string(&log_path)?.contains("[[Query]] CREATE TABLE"));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_or_missing_dump_runs_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let empty = write_dump(dir.path(), "wp_empty.sql", "")?;
        let mut db = RecordingDatabase::default();

        let err = restore_table(&empty, "wp_", "wp_", &mut db, &QueryLog::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedDump(_)));

        let missing = dir.path().join("wp_missing.sql");
        let err = restore_table(&missing, "wp_", "wp_", &mut db, &QueryLog::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedDump(_)));
        assert!(db.statements().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_non_utf8_dump_is_rejected_whole() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("wp_latin1.sql");
        fs::write(&path, b"INSERT INTO `wp_latin1` VALUES ('caf\xe9');\n")?;
        let mut db = RecordingDatabase::default();

        let err = restore_table(&path, "wp_", "wp_", &mut db, &QueryLog::disabled())
            .await
            .unwrap_err();
        assert!(matches!(&err, AppError::MalformedDump(msg) if msg.contains("not valid UTF-8")));
        assert!(db.statements().is_empty());
        Ok(())
    }
}
