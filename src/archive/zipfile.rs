// snapshotinstaller/src/archive/zipfile.rs
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use zip::ZipArchive;

fn open(archive_path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive file: {}", archive_path.display()))?;
    ZipArchive::new(file)
        .with_context(|| format!("Not a readable ZIP archive: {}", archive_path.display()))
}

pub fn validate(archive_path: &Path) -> Result<usize> {
    let mut archive = open(archive_path)?;
    for i in 0..archive.len() {
        archive
            .by_index(i)
            .with_context(|| format!("Corrupt entry #{} in {}", i, archive_path.display()))?;
    }
    Ok(archive.len())
}

pub fn extract_all(archive_path: &Path, extract_to_dir: &Path) -> Result<()> {
    let mut archive = open(archive_path)?;
    archive.extract(extract_to_dir).with_context(|| {
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
    for name in names {
        let mut entry = match archive.by_name(name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => continue,
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read {} from {}", name, archive_path.display())
                });
            }
        };
        let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            anyhow::bail!("Unsafe entry path {} in {}", name, archive_path.display());
        };
        let out_path = extract_to_dir.join(relative);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let mut out = File::create(&out_path)
            .with_context(|| format!("Failed to create {}", out_path.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("Failed to write {}", out_path.display()))?;
        extracted += 1;
    }
    Ok(extracted)
}
