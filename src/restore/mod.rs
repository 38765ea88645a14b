pub(crate) mod splitter;
pub(crate) mod table_job;

use std::path::PathBuf;

use crate::fs::SiteFs;

pub use table_job::restore_table;

const DUMP_LOCATIONS: [&str; 2] = ["sql/*.sql", "*.sql"];

/// Table dumps of an extracted package, sorted. Packages without a `sql/` directory keep them at the top.
pub fn list_dumps(tree: &SiteFs) -> Vec<PathBuf> {
    DUMP_LOCATIONS
        .iter()
        .map(|pattern| tree.glob(pattern))
        .find(|found| !found.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_list_dumps_prefers_sql_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir(dir.path().join("sql"))?;
        fs::write(dir.path().join("sql/wp_posts.sql"), "SELECT 1;")?;
        fs::write(dir.path().join("sql/wp_options.sql"), "SELECT 1;")?;
        fs::write(dir.path().join("stray.sql"), "SELECT 1;")?;

        let dumps = list_dumps(&SiteFs::new(dir.path()));
        assert_eq!(
            dumps,
            vec![dir.path().join("sql/wp_options.sql"), dir.path().join("sql/wp_posts.sql")]
        );
        Ok(())
    }

    #[test]
    fn test_list_dumps_falls_back_to_top_level() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("wp_users.sql"), "SELECT 1;")?;

        let dumps = list_dumps(&SiteFs::new(dir.path()));
        assert_eq!(dumps, vec![dir.path().join("wp_users.sql")]);
        assert!(list_dumps(&SiteFs::new(dir.path().join("absent"))).is_empty());
        Ok(())
    }
}
