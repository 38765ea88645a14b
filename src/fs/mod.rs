//! Root-relative filesystem helpers used by every step.
//!
//! A `SiteFs` wraps one directory (the temp extraction tree, the deployment target, the path root)
//! and resolves every relative path against it.

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct SiteFs {
    root: PathBuf,
}

impl SiteFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SiteFs { root: root.into() }
    }

    /// Like `new`, creating the root directory when it is missing.
    pub fn ensure(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root)
                .with_context(|| format!("Failed to create directory: {}", root.display()))?;
        }
        Ok(SiteFs { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        if relative.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    pub fn exists(&self, relative: impl AsRef<Path>) -> bool {
        self.resolve(relative).exists()
    }

    /// Narrows the root to a subdirectory, if it exists.
    pub fn chroot(&self, relative: impl AsRef<Path>) -> Option<SiteFs> {
        let path = self.resolve(relative);
        path.is_dir().then(|| SiteFs::new(path))
    }

    /// Top-level entries of the root, sorted.
    pub fn ls_top(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read directory: {}", self.root.display()))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("Failed to list directory: {}", self.root.display()))?;
        entries.sort();
        Ok(entries)
    }

    /// Every file below the root as a root-relative path, sorted.
    ///
    /// Chunk windows are computed from positions in this list alone, so the order has to be
    /// identical on every invocation.
    pub fn list_recursive(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry
                .with_context(|| format!("Failed to walk directory: {}", self.root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.root).with_context(|| {
                format!(
                    "Failed to strip prefix {} from {}",
                    self.root.display(),
                    entry.path().display()
                )
            })?;
            files.push(relative.to_path_buf());
        }
        files.sort();
        Ok(files)
    }

    /// Copies `relative` from `source` into the same relative location under this root.
    pub fn copy_from(&self, source: &SiteFs, relative: &Path) -> Result<()> {
        let from = source.resolve(relative);
        if !from.is_file() {
            anyhow::bail!("Source is not a readable file: {}", from.display());
        }
        let to = self.resolve(relative);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::copy(&from, &to)
            .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
        Ok(())
    }

    /// Removes a single file; a missing file counts as removed.
    pub fn remove_file(&self, relative: impl AsRef<Path>) -> Result<()> {
        let path = self.resolve(relative);
        if !path.exists() {
            return Ok(());
        }
        if !path.is_file() {
            anyhow::bail!("Refusing to remove non-file: {}", path.display());
        }
        fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))
    }

    /// Empties the root, keeping the directory itself.
    pub fn clear(&self) -> Result<()> {
        for entry in self.ls_top()? {
            let removed = if entry.is_dir() {
                fs::remove_dir_all(&entry)
            } else {
                fs::remove_file(&entry)
            };
            removed.with_context(|| format!("Failed to remove {}", entry.display()))?;
        }
        Ok(())
    }

    /// Removes the root and everything below it.
    pub fn remove_tree(&self) -> Result<()> {
        if !self.root.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&self.root)
            .with_context(|| format!("Failed to remove tree {}", self.root.display()))
    }

    /// Shell-style match (`*`, `?`, `[...]`) on file names of one directory level.
    ///
    /// Returns absolute paths, sorted. A directory part in the pattern is taken literally.
    pub fn glob(&self, pattern: &str) -> Vec<PathBuf> {
        let (dir, name_pattern) = match pattern.rsplit_once('/') {
            Some((dir, name)) => (self.resolve(dir), name),
            None => (self.root.clone(), pattern),
        };
        let matcher = match wildcard_to_regex(name_pattern) {
            Ok(rx) => rx,
            Err(e) => {
                warn!("Ignoring invalid glob pattern {}: {}", pattern, e);
                return Vec::new();
            }
        };
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut found: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| matcher.is_match(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.path())
            .collect();
        found.sort();
        debug!("glob {} matched {} entries", pattern, found.len());
        found
    }

    /// Strips the root from `full`, `None` when `full` lies outside of it.
    pub fn relative(&self, full: &Path) -> Option<PathBuf> {
        full.strip_prefix(&self.root).ok().map(Path::to_path_buf)
    }
}

fn wildcard_to_regex(pattern: &str) -> Result<Regex> {
    let mut rx = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => rx.push_str("[^/]*"),
            '?' => rx.push_str("[^/]"),
            '[' => {
                rx.push('[');
                for class_char in chars.by_ref() {
                    if class_char == ']' {
                        break;
                    }
                    if class_char == '\\' {
                        rx.push('\\');
                    }
                    rx.push(class_char);
                }
                rx.push(']');
            }
            other => rx.push_str(&regex::escape(&other.to_string())),
        }
    }
    rx.push('$');
    Regex::new(&rx).with_context(|| format!("Invalid glob pattern: {}", pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, relative: &str) -> anyhow::Result<()> {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, relative.as_bytes())?;
        Ok(())
    }

    #[test]
    fn test_list_recursive_is_sorted_and_relative() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        for f in ["b.txt", "a/z.txt", "a/b/c.txt", "c.txt"] {
            touch(dir.path(), f)?;
        }
        let site = SiteFs::new(dir.path());

        let listed = site.list_recursive()?;
        assert_eq!(
            listed,
            vec![
                PathBuf::from("a/b/c.txt"),
                PathBuf::from("a/z.txt"),
                PathBuf::from("b.txt"),
                PathBuf::from("c.txt"),
            ]
        );
        assert_eq!(listed, site.list_recursive()?);
        Ok(())
    }

    #[test]
    fn test_copy_from_creates_parent_directories() -> anyhow::Result<()> {
        let src = tempfile::tempdir()?;
        let dst = tempfile::tempdir()?;
        touch(src.path(), "wp-content/uploads/2020/pic.jpg")?;

        let target = SiteFs::new(dst.path());
        target.copy_from(&SiteFs::new(src.path()), Path::new("wp-content/uploads/2020/pic.jpg"))?;

        assert_eq!(
            fs::read_to_string(dst.path().join("wp-content/uploads/2020/pic.jpg"))?,
            "wp-content/uploads/2020/pic.jpg"
        );
        Ok(())
    }

    #[test]
    fn test_copy_from_missing_source_fails() -> anyhow::Result<()> {
        let src = tempfile::tempdir()?;
        let dst = tempfile::tempdir()?;
        let result = SiteFs::new(dst.path()).copy_from(&SiteFs::new(src.path()), Path::new("nope"));
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_glob_matches_single_level_and_classes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        for f in ["sql/wp_posts.sql", "sql/wp_options.sql", "sql/readme.txt", "top.sql", "abc1.zip"] {
            touch(dir.path(), f)?;
        }
        let site = SiteFs::new(dir.path());

        assert_eq!(
            site.glob("sql/*.sql"),
            vec![dir.path().join("sql/wp_options.sql"), dir.path().join("sql/wp_posts.sql")]
        );
        assert_eq!(site.glob("*.sql"), vec![dir.path().join("top.sql")]);
        assert_eq!(site.glob("[a-c][a-c][a-c][0-9].zip"), vec![dir.path().join("abc1.zip")]);
        assert!(site.glob("missing/*.sql").is_empty());
        Ok(())
    }

    #[test]
    fn test_clear_keeps_root_and_remove_tree_drops_it() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("tree");
        touch(&root, "www/index.php")?;
        touch(&root, "manifest.txt")?;
        let site = SiteFs::new(&root);

        site.clear()?;
        assert!(root.exists());
        assert!(site.ls_top()?.is_empty());

        site.remove_tree()?;
        assert!(!root.exists());
        assert!(site.ls_top()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_relative_and_chroot() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "www/wp-config.php")?;
        let site = SiteFs::new(dir.path());

        let www = site.chroot("www").expect("www exists");
        assert!(www.exists("wp-config.php"));
        assert!(site.chroot("missing").is_none());
        assert_eq!(
            site.relative(&dir.path().join("www/wp-config.php")),
            Some(PathBuf::from("www/wp-config.php"))
        );
        assert_eq!(site.relative(Path::new("/elsewhere")), None);
        Ok(())
    }
}
