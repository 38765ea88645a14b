// snapshotinstaller/src/install/resume.rs
use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::fs::SiteFs;
use crate::sitecfg::Manifest;

/// Written by the Configure step when it peeks into the archive.
const PEEKED_CONFIG: &str = "www/wp-config.php";

/// How far a previous extraction into the temp tree got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionState {
    Empty,
    /// One or two top-level entries: the configuration peek or an interrupted extraction.
    Partial,
    Complete,
}

/// Classifies the tree by its number of top-level entries.
pub fn inspect(tree: &SiteFs) -> Result<ExtractionState> {
    let state = match tree.ls_top()?.len() {
        0 => ExtractionState::Empty,
        1..=2 => ExtractionState::Partial,
        _ => ExtractionState::Complete,
    };
    Ok(state)
}

/// Discards a partial tree so it can be extracted again. Returns the state afterwards.
pub fn repair(tree: &SiteFs) -> Result<ExtractionState> {
    if tree.exists(PEEKED_CONFIG) {
        info!("Discarding configuration peek in {}", tree.root().display());
        tree.clear()?;
    }
    tree.remove_file(Manifest::FILE_NAME)?;

    let leftover = tree.ls_top()?;
    if !leftover.is_empty() {
        warn!(
            "Temp tree {} still holds {} partial entries, clearing it",
            tree.root().display(),
            leftover.len()
        );
        tree.clear()?;
    }
    inspect(tree)
}
