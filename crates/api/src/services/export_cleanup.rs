//! Removal of expired export jobs and their archives.

use chrono::{DateTime, Utc};
use domain::services::JobRepository;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::archive_store::ArchiveStore;
use super::error::ExportError;

/// Result of one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub jobs_removed: usize,
    pub bytes_freed: u64,
}

pub struct ExportCleanupService {
    repo: Arc<dyn JobRepository>,
    archives: ArchiveStore,
}

impl ExportCleanupService {
    pub fn new(repo: Arc<dyn JobRepository>, archives: ArchiveStore) -> Self {
        Self { repo, archives }
    }

    pub async fn run_once(&self) -> Result<CleanupReport, ExportError> {
        self.run_at(Utc::now()).await
    }

    /// Removes every job whose `expires_at` is before `now`, in any status.
    ///
    /// Archive and record are deleted independently: a failure on one is
    /// logged and the other is still attempted, so the next pass picks up
    /// whatever is left.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<CleanupReport, ExportError> {
        let expired = self.repo.find_expired(now).await?;
        let mut report = CleanupReport::default();

        for job in expired {
            match self.archives.remove(job.id).await {
                Ok(freed) => report.bytes_freed += freed,
                Err(e) => warn!(
                    job_id = %job.id,
                    error = %e,
                    "Failed to remove expired export archive"
                ),
            }

            match self.repo.delete(job.id).await {
                Ok(true) => {
                    report.jobs_removed += 1;
                    debug!(job_id = %job.id, status = %job.status, "Expired export job removed");
                }
                Ok(false) => {}
                Err(e) => warn!(
                    job_id = %job.id,
                    error = %e,
                    "Failed to delete expired export job"
                ),
            }
        }

        if report.jobs_removed > 0 {
            counter!("export_jobs_expired_total").increment(report.jobs_removed as u64);
            info!(
                removed = report.jobs_removed,
                bytes_freed = report.bytes_freed,
                "Cleaned up expired exports"
            );
        }

        Ok(report)
    }
}
