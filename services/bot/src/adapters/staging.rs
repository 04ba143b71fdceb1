//! services/bot/src/adapters/staging.rs
//!
//! The local staging area. Every job gets its own directory under the staging root,
//! named after its `JobId`; inputs are downloaded into it and results are written to
//! labelled output directories inside it.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use pdfbot_core::domain::JobId;

/// Trailing run of digits in a file stem, e.g. `page-10` -> `10`.
static NUMERIC_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)$").unwrap());

#[derive(Debug, Clone)]
pub struct Staging {
    root: PathBuf,
}

impl Staging {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: &JobId) -> PathBuf {
        self.root.join(job_id.as_str())
    }

    /// Creates the job directory. Calling it again for the same job is a no-op.
    pub async fn stage(&self, job_id: &JobId) -> io::Result<PathBuf> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Where a staged input named `name` lives.
    pub fn input_path(&self, job_id: &JobId, name: &str) -> PathBuf {
        self.job_dir(job_id).join(name)
    }

    /// Creates (if needed) and returns an output directory inside the job directory.
    pub async fn output_dir(&self, job_id: &JobId, label: &str) -> io::Result<PathBuf> {
        let dir = self.job_dir(job_id).join(label);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Returns the only regular file in `dir`.
    ///
    /// A missing directory, an empty one, or one holding two or more entries all
    /// yield `None`; the caller treats that as a failed job rather than guessing.
    pub async fn read_single_output(dir: &Path) -> Option<PathBuf> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Output directory {} unreadable: {}", dir.display(), e);
                return None;
            }
        };

        let mut found = None;
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    if found.is_some() {
                        return None;
                    }
                    found = Some(entry.path());
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to list {}: {}", dir.display(), e);
                    return None;
                }
            }
        }

        let path = found?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }

    /// Extracts `archive` into `dest` and returns the extracted files ordered by the
    /// number at the end of each file stem (ties keep archive order).
    ///
    /// Directory entries are skipped and entries whose path would escape `dest`
    /// are rejected. This is blocking work; async callers use [`Staging::expand`].
    pub fn unzip(archive: &Path, dest: &Path) -> io::Result<Vec<PathBuf>> {
        let file = fs::File::open(archive)?;
        let mut zip = zip::ZipArchive::new(file).map_err(invalid_archive)?;
        fs::create_dir_all(dest)?;

        let mut extracted: Vec<(Option<u64>, usize, PathBuf)> = Vec::with_capacity(zip.len());
        for index in 0..zip.len() {
            let mut entry = zip.by_index(index).map_err(invalid_archive)?;
            if entry.is_dir() {
                continue;
            }
            let relative = entry.enclosed_name().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsafe entry name in archive: {}", entry.name()),
                )
            })?;

            let target = dest.join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = fs::File::create(&target)?;
            io::copy(&mut entry, &mut out)?;

            extracted.push((numeric_suffix(&relative), index, target));
        }

        // Numbered entries first, in natural order; unnumbered ones keep archive order.
        extracted.sort_by_key(|(number, index, _)| (number.is_none(), *number, *index));
        Ok(extracted.into_iter().map(|(_, _, path)| path).collect())
    }

    /// Runs [`Staging::unzip`] on the blocking thread pool.
    pub async fn expand(archive: PathBuf, dest: PathBuf) -> io::Result<Vec<PathBuf>> {
        tokio::task::spawn_blocking(move || Self::unzip(&archive, &dest))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?
    }

    /// Removes one job directory. Missing directories are fine.
    pub async fn purge(&self, job_id: &JobId) -> io::Result<()> {
        match tokio::fs::remove_dir_all(self.job_dir(job_id)).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Removes everything under the staging root and leaves the root itself in place.
    pub async fn purge_all(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let result = if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            if let Err(e) = result {
                warn!("Could not remove staged entry {}: {}", path.display(), e);
            }
        }
        Ok(())
    }
}

fn numeric_suffix(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    NUMERIC_SUFFIX
        .captures(stem)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn invalid_archive(e: zip::result::ZipError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}
