//! On-disk location of generated archives.
//!
//! Every job owns one directory, `<root>/<job_id>/`, holding its single
//! archive. Removal works on that directory so that partial output and
//! finished archives are cleaned up the same way.

use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    /// Download file name of a job's archive.
    pub fn archive_name(job_id: Uuid, created_at: DateTime<Utc>) -> String {
        let id = job_id.simple().to_string();
        format!(
            "document-export-{}-{}.zip",
            created_at.format("%Y%m%d-%H%M%S"),
            &id[..8]
        )
    }

    /// Creates the job directory and an empty archive file inside it.
    pub async fn create(&self, job_id: Uuid, archive_name: &str) -> io::Result<(PathBuf, std::fs::File)> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(archive_name);
        let file = tokio::fs::File::create(&path).await?.into_std().await;
        Ok((path, file))
    }

    /// Removes the job directory and everything in it. Returns the number
    /// of bytes freed; a missing directory frees nothing.
    pub async fn remove(&self, job_id: Uuid) -> io::Result<u64> {
        let dir = self.job_dir(job_id);
        let mut freed = 0u64;

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                freed += metadata.len();
            }
        }

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(freed),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// True when `path` lies inside this store's root.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
            && !path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
    }

    /// Opens a finished archive for streaming, returning it with its length.
    pub async fn open(&self, path: &Path) -> io::Result<(tokio::fs::File, u64)> {
        if !self.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "archive path outside the archive directory",
            ));
        }
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// SHA-256 and length of a finished archive.
    pub async fn checksum(&self, path: &Path) -> io::Result<(String, u64)> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(path)?;
            shared::crypto::sha256_reader(io::BufReader::new(file))
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }
}
