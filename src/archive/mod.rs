//! Snapshot packages: ZIP archives as produced by the backup plugin, or gzipped tarballs.

pub(crate) mod targz;
pub(crate) mod zipfile;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            ArchiveKind::TarGz
        } else {
            ArchiveKind::Zip
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotArchive {
    path: PathBuf,
    kind: ArchiveKind,
}

impl SnapshotArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let kind = ArchiveKind::from_path(&path);
        SnapshotArchive { path, kind }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Reads every entry header. The error string is meant for the operator.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.exists() {
            return Err(format!("Archive not found: {}", self.path.display()));
        }
        let outcome = match self.kind {
            ArchiveKind::Zip => zipfile::validate(&self.path),
            ArchiveKind::TarGz => targz::validate(&self.path),
        };
        match outcome {
            Ok(0) => Err(format!("Archive {} has no entries", self.path.display())),
            Ok(entries) => {
                debug!("Archive {} holds {} entries", self.path.display(), entries);
                Ok(())
            }
            Err(e) => Err(format!("{:#}", e)),
        }
    }

    pub fn extract_all(&self, dest: &Path) -> Result<()> {
        ensure_dir(dest)?;
        info!(
            "Extracting {} into {}",
            self.path.display(),
            dest.display()
        );
        match self.kind {
            ArchiveKind::Zip => zipfile::extract_all(&self.path, dest),
            ArchiveKind::TarGz => targz::extract_all(&self.path, dest),
        }
    }

    /// Extracts only the entries whose archive path is listed in `names`; returns how many were found.
    pub fn extract_named(&self, dest: &Path, names: &[&str]) -> Result<usize> {
        ensure_dir(dest)?;
        let extracted = match self.kind {
            ArchiveKind::Zip => zipfile::extract_named(&self.path, dest, names)?,
            ArchiveKind::TarGz => targz::extract_named(&self.path, dest, names)?,
        };
        debug!(
            "Extracted {}/{} named entries from {}",
            extracted,
            names.len(),
            self.path.display()
        );
        Ok(extracted)
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create extraction directory: {}", dir.display()))?;
    } else if !dir.is_dir() {
        anyhow::bail!(
            "Extraction path exists but is not a directory: {}",
            dir.display()
        );
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    /// Writes a ZIP holding `entries` (path, contents).
    pub fn write_zip(path: &Path, entries: &[(&str, &str)]) -> anyhow::Result<()> {
        let mut writer = zip::ZipWriter::new(File::create(path)?);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, contents) in entries {
            writer.start_file(*name, options)?;
            writer.write_all(contents.as_bytes())?;
        }
        writer.finish()?;
        Ok(())
    }

    pub fn write_tar_gz(path: &Path, entries: &[(&str, &str)]) -> anyhow::Result<()> {
        let encoder = flate2::write::GzEncoder::new(File::create(path)?, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, contents.as_bytes())?;
        }
        builder.into_inner()?.finish()?;
        Ok(())
    }
}
