//! Export job storage capability.
//!
//! Every mutation is guarded by the job's current status so that concurrent
//! writers (the archive worker, the stale-job sweep, user cancellation) can
//! never move a job out of a terminal status.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::{ArchiveOutcome, ExportJob, ExportJobStatus, NewExportJob, PROGRESS_COMPLETE};

/// Result of an atomic quota-checked insert.
#[derive(Debug, Clone)]
pub enum Admission {
    Admitted(ExportJob),
    QuotaExceeded { active: i64 },
}

/// Progress counters reported while a job is `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressUpdate {
    pub processed_documents: i64,
    pub failed_documents: i64,
    pub progress_percent: i32,
}

/// Persistence of export job records.
#[async_trait::async_trait]
pub trait JobRepository: Send + Sync {
    /// Inserts the job unless the user already holds `max_active` jobs in
    /// `Pending`/`Processing`. Count and insert are atomic per user.
    async fn insert_within_quota(
        &self,
        job: NewExportJob,
        max_active: i64,
    ) -> Result<Admission, RepositoryError>;

    /// Number of the user's jobs in `Pending`/`Processing`.
    async fn count_active(&self, user_id: Uuid) -> Result<i64, RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ExportJob>, RepositoryError>;

    /// Jobs of a user, newest first. An empty status slice means all statuses.
    async fn list_for_user(
        &self,
        user_id: Uuid,
        statuses: &[ExportJobStatus],
    ) -> Result<Vec<ExportJob>, RepositoryError>;

    /// `Pending -> Processing`. Returns false if the job was not pending.
    async fn mark_processing(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// Records the selected document count while `Processing`.
    async fn record_selection(
        &self,
        id: Uuid,
        total_documents: i64,
        selected_size_bytes: i64,
    ) -> Result<bool, RepositoryError>;

    /// Applies progress counters while `Processing`. Counters are clamped to
    /// the job total and the percentage never decreases.
    async fn update_progress(
        &self,
        id: Uuid,
        update: ProgressUpdate,
    ) -> Result<bool, RepositoryError>;

    /// `Processing -> Completed`.
    async fn mark_completed(
        &self,
        id: Uuid,
        outcome: &ArchiveOutcome,
    ) -> Result<bool, RepositoryError>;

    /// `Pending|Processing -> Failed`.
    async fn mark_failed(&self, id: Uuid, detail: &str) -> Result<bool, RepositoryError>;

    /// `Pending|Processing -> Cancelled`.
    async fn mark_cancelled(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// Fails every active job created before `created_before`, returning
    /// the ids it transitioned.
    async fn fail_stale(
        &self,
        created_before: DateTime<Utc>,
        detail: &str,
    ) -> Result<Vec<Uuid>, RepositoryError>;

    /// Jobs whose `expires_at` is before `now`, regardless of status.
    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<ExportJob>, RepositoryError>;

    /// Physically removes a job record. Returns false if it did not exist.
    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError>;
}

/// In-process job repository.
///
/// A single mutex serializes every operation, which makes the quota check
/// and insert atomic.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<HashMap<Uuid, ExportJob>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a job record as-is, replacing any record with the same id.
    pub fn put(&self, job: ExportJob) {
        self.lock().insert(job.id, job);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, ExportJob>> {
        // A poisoned map is still structurally valid: each operation either
        // fully applies its mutation or none of it.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition<F>(&self, id: Uuid, target: ExportJobStatus, apply: F) -> bool
    where
        F: FnOnce(&mut ExportJob, DateTime<Utc>),
    {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.status.can_transition_to(target) => {
                let now = Utc::now();
                job.status = target;
                job.updated_at = now;
                apply(job, now);
                true
            }
            _ => false,
        }
    }
}

fn clamp_counters(total: i64, processed: i64, failed: i64) -> (i64, i64) {
    let processed = processed.clamp(0, total.max(0));
    let failed = failed.clamp(0, (total - processed).max(0));
    (processed, failed)
}

#[async_trait::async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn insert_within_quota(
        &self,
        job: NewExportJob,
        max_active: i64,
    ) -> Result<Admission, RepositoryError> {
        let mut jobs = self.lock();
        let active = jobs
            .values()
            .filter(|j| j.user_id == job.user_id && j.status.is_active())
            .count() as i64;

        if active >= max_active {
            return Ok(Admission::QuotaExceeded { active });
        }

        let record = ExportJob::from_new(job, Utc::now());
        jobs.insert(record.id, record.clone());
        Ok(Admission::Admitted(record))
    }

    async fn count_active(&self, user_id: Uuid) -> Result<i64, RepositoryError> {
        Ok(self
            .lock()
            .values()
            .filter(|j| j.user_id == user_id && j.status.is_active())
            .count() as i64)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ExportJob>, RepositoryError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        statuses: &[ExportJobStatus],
    ) -> Result<Vec<ExportJob>, RepositoryError> {
        let mut jobs: Vec<ExportJob> = self
            .lock()
            .values()
            .filter(|j| j.user_id == user_id)
            .filter(|j| statuses.is_empty() || statuses.contains(&j.status))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(jobs)
    }

    async fn mark_processing(&self, id: Uuid) -> Result<bool, RepositoryError> {
        Ok(self.transition(id, ExportJobStatus::Processing, |job, now| {
            job.started_at = Some(now);
        }))
    }

    async fn record_selection(
        &self,
        id: Uuid,
        total_documents: i64,
        selected_size_bytes: i64,
    ) -> Result<bool, RepositoryError> {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.status == ExportJobStatus::Processing => {
                job.total_documents = total_documents.max(0);
                job.estimated_size_bytes = selected_size_bytes.max(0);
                let (processed, failed) = clamp_counters(
                    job.total_documents,
                    job.processed_documents,
                    job.failed_documents,
                );
                job.processed_documents = processed;
                job.failed_documents = failed;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(
        &self,
        id: Uuid,
        update: ProgressUpdate,
    ) -> Result<bool, RepositoryError> {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.status == ExportJobStatus::Processing => {
                let (processed, failed) = clamp_counters(
                    job.total_documents,
                    update.processed_documents,
                    update.failed_documents,
                );
                job.processed_documents = processed;
                job.failed_documents = failed;
                job.progress_percent = job
                    .progress_percent
                    .max(update.progress_percent.clamp(0, PROGRESS_COMPLETE));
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        outcome: &ArchiveOutcome,
    ) -> Result<bool, RepositoryError> {
        Ok(self.transition(id, ExportJobStatus::Completed, |job, now| {
            let (processed, failed) = clamp_counters(
                job.total_documents,
                outcome.processed_documents,
                outcome.failed_documents,
            );
            job.processed_documents = processed;
            job.failed_documents = failed;
            job.progress_percent = PROGRESS_COMPLETE;
            job.actual_size_bytes = Some(outcome.size_bytes);
            job.archive_path = Some(outcome.archive_path.clone());
            job.archive_name = Some(outcome.archive_name.clone());
            job.archive_checksum = Some(outcome.checksum.clone());
            job.warnings.extend(outcome.warnings.iter().cloned());
            job.completed_at = Some(now);
        }))
    }

    async fn mark_failed(&self, id: Uuid, detail: &str) -> Result<bool, RepositoryError> {
        Ok(self.transition(id, ExportJobStatus::Failed, |job, now| {
            job.error_detail = Some(detail.to_string());
            job.completed_at = Some(now);
        }))
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<bool, RepositoryError> {
        Ok(self.transition(id, ExportJobStatus::Cancelled, |job, now| {
            job.completed_at = Some(now);
        }))
    }

    async fn fail_stale(
        &self,
        created_before: DateTime<Utc>,
        detail: &str,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        let now = Utc::now();
        let mut expired = Vec::new();
        for job in self.lock().values_mut() {
            if job.status.is_active() && job.created_at < created_before {
                job.status = ExportJobStatus::Failed;
                job.error_detail = Some(detail.to_string());
                job.updated_at = now;
                job.completed_at = Some(now);
                expired.push(job.id);
            }
        }
        Ok(expired)
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<ExportJob>, RepositoryError> {
        let mut jobs: Vec<ExportJob> = self
            .lock()
            .values()
            .filter(|j| j.is_expired_at(now))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.expires_at);
        Ok(jobs)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        Ok(self.lock().remove(&id).is_some())
    }
}
