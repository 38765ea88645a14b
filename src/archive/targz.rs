// snapshotinstaller/src/archive/targz.rs
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::Path;
use tar::Archive;

fn open(archive_path: &Path) -> Result<Archive<GzDecoder<File>>> {
    if !archive_path.is_file() {
        anyhow::bail!(
            "Archive for extraction is not a file: {}",
            archive_path.display()
        );
    }
    let archive_file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive file: {}", archive_path.display()))?;
    Ok(Archive::new(GzDecoder::new(archive_file)))
}

pub fn validate(archive_path: &Path) -> Result<usize> {
    let mut archive = open(archive_path)?;
    let mut count = 0;
    let entries = archive
        .entries()
        .with_context(|| format!("Failed to read entries of {}", archive_path.display()))?;
    for entry in entries {
        entry.with_context(|| format!("Corrupt entry #{} in {}", count, archive_path.display()))?;
        count += 1;
    }
    Ok(count)
}

pub fn extract_all(archive_path: &Path, extract_to_dir: &Path) -> Result<()> {
    let mut archive = open(archive_path)?;
    archive.unpack(extract_to_dir).with_context(|| {
        format!(
            "Failed to unpack archive {} to {}",
            archive_path.display(),
            extract_to_dir.display()
        )
    })
}

pub fn extract_named(archive_path: &Path, extract_to_dir: &Path, names: &[&str]) -> Result<usize> {
    let mut archive = open(archive_path)?;
    let mut extracted = 0;
    let entries = archive
        .entries()
        .with_context(|| format!("Failed to read entries of {}", archive_path.display()))?;
    for entry in entries {
        let mut entry =
            entry.with_context(|| format!("Failed to read entry of {}", archive_path.display()))?;
        let path = entry
            .path()
            .with_context(|| format!("Invalid entry path in {}", archive_path.display()))?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();
        if !names.contains(&path.as_str()) {
            continue;
        }
        entry.unpack_in(extract_to_dir).with_context(|| {
            format!("Failed to unpack {} to {}", path, extract_to_dir.display())
        })?;
        extracted += 1;
    }
    Ok(extracted)
}
