//! Per-user export quota and stale-job expiry.

use chrono::Utc;
use domain::models::{ExportJob, NewExportJob};
use domain::services::{Admission, JobRepository};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::ExportError;

/// Error detail stored on jobs failed by the stale sweep.
pub const STALE_JOB_DETAIL: &str = "timeout";

pub struct AdmissionController {
    repo: Arc<dyn JobRepository>,
    max_active_per_user: i64,
    stale_timeout: chrono::Duration,
}

impl AdmissionController {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        max_active_per_user: i64,
        stale_timeout: chrono::Duration,
    ) -> Self {
        Self {
            repo,
            max_active_per_user,
            stale_timeout,
        }
    }

    pub fn max_active_per_user(&self) -> i64 {
        self.max_active_per_user
    }

    /// Advisory check; `admit` is the authoritative one.
    pub async fn can_admit(&self, user_id: Uuid) -> Result<(bool, i64), ExportError> {
        let active = self.repo.count_active(user_id).await?;
        Ok((active < self.max_active_per_user, active))
    }

    /// Persists the job if the user still has a free slot.
    pub async fn admit(&self, job: NewExportJob) -> Result<ExportJob, ExportError> {
        let user_id = job.user_id;
        match self
            .repo
            .insert_within_quota(job, self.max_active_per_user)
            .await?
        {
            Admission::Admitted(job) => Ok(job),
            Admission::QuotaExceeded { active } => {
                warn!(
                    user_id = %user_id,
                    active = active,
                    limit = self.max_active_per_user,
                    "Export admission refused"
                );
                Err(ExportError::QuotaExceeded {
                    active,
                    limit: self.max_active_per_user,
                })
            }
        }
    }

    /// Fails every active job created longer than the stale timeout ago.
    /// Returns the ids it failed; running it again fails nothing new.
    pub async fn expire_stale(&self) -> Result<Vec<Uuid>, ExportError> {
        let cutoff = Utc::now() - self.stale_timeout;
        let expired = self.repo.fail_stale(cutoff, STALE_JOB_DETAIL).await?;
        if !expired.is_empty() {
            info!(expired = expired.len(), cutoff = %cutoff, "Expired stale export jobs");
        }
        Ok(expired)
    }
}
