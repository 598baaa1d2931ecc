//! Export job lifecycle.
//!
//! `submit` validates, admits and persists a job, then hands it to a
//! background worker. Every worker runs under a supervisor task that awaits
//! it and records the outcome, so a job never stays `processing` because its
//! worker returned an error or panicked. Status changes are guarded by the
//! repository: a job cancelled or expired while its archive was being
//! written keeps that status and the archive is deleted.

use chrono::Utc;
use domain::error::RepositoryError;
use domain::models::{
    ArchiveOutcome, ExportJob, ExportJobStatus, FilterSpec, FilterValidation, JobProgress,
    JobResult, JobSummary, NewExportJob, PROGRESS_SELECTED, PROGRESS_STARTED,
};
use domain::services::{DocumentCatalog, FileStore, JobRepository, ProgressUpdate};
use metrics::{counter, histogram};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::admission::AdmissionController;
use super::archive_generator::{build_entries, ArchiveError, ArchiveGenerator, ArchiveOptions};
use super::archive_store::ArchiveStore;
use super::error::ExportError;
use super::filter_estimator::{FilterEstimator, FilterLimits, NO_DOCUMENTS_FOUND};
use crate::config::ExportConfig;

const SHUTDOWN_DETAIL: &str = "export interrupted by service shutdown";
const PANIC_DETAIL: &str = "internal error: export worker panicked";

/// Why a worker did not produce an archive.
#[derive(Debug)]
enum ProcessError {
    /// The job's token was cancelled.
    Cancelled,
    /// The job left `pending` before the worker picked it up.
    NotPending,
    /// Fatal error; the message becomes the job's error detail.
    Failed(String),
}

impl From<RepositoryError> for ProcessError {
    fn from(err: RepositoryError) -> Self {
        ProcessError::Failed(err.to_string())
    }
}

impl From<ExportError> for ProcessError {
    fn from(err: ExportError) -> Self {
        ProcessError::Failed(err.to_string())
    }
}

impl From<std::io::Error> for ProcessError {
    fn from(err: std::io::Error) -> Self {
        ProcessError::Failed(format!("archive storage error: {}", err))
    }
}

impl From<ArchiveError> for ProcessError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Cancelled => ProcessError::Cancelled,
            other => ProcessError::Failed(other.to_string()),
        }
    }
}

/// An open archive ready to be streamed to a client.
#[derive(Debug)]
pub struct ArchiveDownload {
    pub file: tokio::fs::File,
    pub size_bytes: u64,
    pub archive_name: String,
}

pub struct ExportService {
    repo: Arc<dyn JobRepository>,
    estimator: FilterEstimator,
    admission: AdmissionController,
    generator: ArchiveGenerator,
    archives: ArchiveStore,
    retention: chrono::Duration,
    running: Mutex<HashMap<Uuid, CancellationToken>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl ExportService {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        catalog: Arc<dyn DocumentCatalog>,
        store: Arc<dyn FileStore>,
        config: &ExportConfig,
    ) -> Self {
        Self {
            estimator: FilterEstimator::new(catalog, FilterLimits::from(config)),
            admission: AdmissionController::new(
                Arc::clone(&repo),
                config.max_active_jobs_per_user,
                config.stale_timeout(),
            ),
            generator: ArchiveGenerator::new(store, ArchiveOptions::from(config)),
            archives: ArchiveStore::new(config.archive_dir.clone()),
            retention: config.retention(),
            running: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            repo,
        }
    }

    pub fn archives(&self) -> &ArchiveStore {
        &self.archives
    }

    fn running(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True while a worker or its supervisor for the job is alive.
    pub fn is_running(&self, job_id: Uuid) -> bool {
        self.running().contains_key(&job_id)
    }

    /// Jobs with a live worker or supervisor.
    pub fn running_count(&self) -> usize {
        self.running().len()
    }

    /// False once shutdown has begun.
    pub fn is_accepting(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Pre-flight check of a filter; never creates a job.
    pub async fn validate_filter(&self, filter: &FilterSpec) -> Result<FilterValidation, ExportError> {
        self.estimator.validate(filter).await
    }

    /// Admits and persists a new job and starts generating its archive.
    ///
    /// Returns once the job is stored as `pending`; the outcome of the
    /// generation is only observable through the job's status.
    pub async fn submit(
        self: &Arc<Self>,
        user_id: Uuid,
        unit_id: Option<Uuid>,
        filter: FilterSpec,
    ) -> Result<Uuid, ExportError> {
        if self.shutdown.is_cancelled() {
            return Err(ExportError::ShuttingDown);
        }

        let (allowed, active) = self.admission.can_admit(user_id).await?;
        if !allowed {
            return Err(ExportError::QuotaExceeded {
                active,
                limit: self.admission.max_active_per_user(),
            });
        }

        let filter = filter.normalized();
        let validation = self.estimator.validate(&filter).await?;
        if !validation.valid {
            debug!(user_id = %user_id, errors = ?validation.errors, "Export filter rejected");
            return Err(ExportError::InvalidFilter(validation));
        }
        let estimate = validation.estimate.clone().unwrap_or_default();

        let job = self
            .admission
            .admit(NewExportJob {
                id: Uuid::new_v4(),
                user_id,
                unit_id,
                filter,
                total_documents: estimate.document_count,
                estimated_size_bytes: estimate.estimated_size_bytes,
                warnings: validation.warnings,
                expires_at: Utc::now() + self.retention,
            })
            .await?;

        counter!("export_jobs_submitted_total").increment(1);
        info!(
            job_id = %job.id,
            user_id = %user_id,
            documents = estimate.document_count,
            estimated_bytes = estimate.estimated_size_bytes,
            "Export job submitted"
        );

        let job_id = job.id;
        self.dispatch(job);
        Ok(job_id)
    }

    fn dispatch(self: &Arc<Self>, job: ExportJob) {
        let job_id = job.id;
        let token = self.shutdown.child_token();
        self.running().insert(job_id, token.clone());

        let worker = {
            let service = Arc::clone(self);
            let token = token.clone();
            self.tracker
                .spawn(async move { service.process(job, &token).await })
        };

        let service = Arc::clone(self);
        self.tracker.spawn(async move {
            let outcome = worker.await;
            service.finish(job_id, outcome).await;
            service.running().remove(&job_id);
        });
    }

    async fn process(
        &self,
        job: ExportJob,
        cancel: &CancellationToken,
    ) -> Result<ArchiveOutcome, ProcessError> {
        let started = Instant::now();
        if !self.repo.mark_processing(job.id).await? {
            return Err(ProcessError::NotPending);
        }
        self.report(job.id, 0, 0, PROGRESS_STARTED).await;

        // The catalogue may have changed since submission.
        let estimate = self.estimator.estimate(&job.filter).await?;
        let limits = self.estimator.limits();
        if estimate.document_count == 0 {
            return Err(ProcessError::Failed(NO_DOCUMENTS_FOUND.to_string()));
        }
        if estimate.document_count > limits.max_documents
            || estimate.estimated_size_bytes > limits.max_total_size_bytes
        {
            return Err(ProcessError::Failed(format!(
                "Matching documents grew past the export limits since submission ({} documents, {} bytes)",
                estimate.document_count, estimate.estimated_size_bytes
            )));
        }
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let documents = self.estimator.select(&job.filter).await?;
        let selected_bytes: i64 = documents.iter().map(|d| d.size_bytes.max(0)).sum();
        self.repo
            .record_selection(job.id, documents.len() as i64, selected_bytes)
            .await?;
        self.report(job.id, 0, 0, PROGRESS_SELECTED).await;
        info!(
            job_id = %job.id,
            documents = documents.len(),
            selected_bytes = selected_bytes,
            "Export documents selected"
        );

        let entries = build_entries(&documents);
        let archive_name = ArchiveStore::archive_name(job.id, job.created_at);
        let (path, file) = self.archives.create(job.id, &archive_name).await?;

        let (progress_tx, progress_rx) = watch::channel(ProgressUpdate {
            processed_documents: 0,
            failed_documents: 0,
            progress_percent: PROGRESS_SELECTED,
        });
        let updater = tokio::spawn(forward_progress(
            Arc::clone(&self.repo),
            job.id,
            progress_rx,
        ));

        let generated = self
            .generator
            .generate(&job, entries, file, cancel, &progress_tx)
            .await;
        drop(progress_tx);
        if let Err(e) = updater.await {
            warn!(job_id = %job.id, error = %e, "Progress updater stopped abnormally");
        }

        let (file, summary) = generated?;
        file.sync_all()?;
        drop(file);

        let (checksum, size) = self.archives.checksum(&path).await?;
        info!(
            job_id = %job.id,
            processed = summary.processed_documents,
            failed = summary.failed_documents,
            size_bytes = size,
            elapsed_ms = started.elapsed().as_millis(),
            "Export archive written"
        );

        Ok(ArchiveOutcome {
            archive_path: path.to_string_lossy().into_owned(),
            archive_name,
            size_bytes: size as i64,
            checksum,
            processed_documents: summary.processed_documents,
            failed_documents: summary.failed_documents,
            warnings: summary.warnings,
        })
    }

    async fn report(&self, job_id: Uuid, processed: i64, failed: i64, percent: i32) {
        let update = ProgressUpdate {
            processed_documents: processed,
            failed_documents: failed,
            progress_percent: percent,
        };
        if let Err(e) = self.repo.update_progress(job_id, update).await {
            warn!(job_id = %job_id, error = %e, "Failed to record export progress");
        }
    }

    /// Records the worker's outcome. Every path that does not end in
    /// `completed` removes the job's archive directory.
    async fn finish(&self, job_id: Uuid, outcome: Result<Result<ArchiveOutcome, ProcessError>, JoinError>) {
        let transition = match outcome {
            Ok(Ok(archive)) => match self.repo.mark_completed(job_id, &archive).await {
                Ok(true) => {
                    counter!("export_jobs_completed_total").increment(1);
                    histogram!("export_archive_bytes").record(archive.size_bytes as f64);
                    info!(
                        job_id = %job_id,
                        archive = %archive.archive_name,
                        size_bytes = archive.size_bytes,
                        failed = archive.failed_documents,
                        "Export job completed"
                    );
                    return;
                }
                Ok(false) => {
                    info!(job_id = %job_id, "Export job left processing during generation; discarding archive");
                    Ok(false)
                }
                Err(e) => Err(e),
            },
            Ok(Err(ProcessError::Cancelled)) => {
                if self.shutdown.is_cancelled() {
                    self.repo.mark_failed(job_id, SHUTDOWN_DETAIL).await
                } else {
                    // Already cancelled or failed by whoever fired the token.
                    self.repo.mark_cancelled(job_id).await
                }
            }
            Ok(Err(ProcessError::NotPending)) => {
                debug!(job_id = %job_id, "Export job no longer pending; worker skipped");
                Ok(false)
            }
            Ok(Err(ProcessError::Failed(detail))) => {
                let marked = self.repo.mark_failed(job_id, &detail).await;
                if matches!(marked, Ok(true)) {
                    counter!("export_jobs_failed_total").increment(1);
                    error!(job_id = %job_id, error = %detail, "Export job failed");
                }
                marked
            }
            Err(join_error) => {
                error!(job_id = %job_id, error = %join_error, "Export worker panicked");
                let marked = self.repo.mark_failed(job_id, PANIC_DETAIL).await;
                if matches!(marked, Ok(true)) {
                    counter!("export_jobs_failed_total").increment(1);
                }
                marked
            }
        };

        if let Err(e) = transition {
            error!(job_id = %job_id, error = %e, "Failed to record export job outcome");
        }
        if let Err(e) = self.archives.remove(job_id).await {
            warn!(job_id = %job_id, error = %e, "Failed to remove export archive");
        }
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<ExportJob, ExportError> {
        self.repo
            .find_by_id(job_id)
            .await?
            .ok_or(ExportError::NotFound(job_id))
    }

    pub async fn get_progress(&self, job_id: Uuid) -> Result<JobProgress, ExportError> {
        Ok(self.get_job(job_id).await?.progress())
    }

    /// Download handle of a completed job.
    pub async fn get_result(&self, job_id: Uuid) -> Result<JobResult, ExportError> {
        let job = self.get_job(job_id).await?;
        if job.status != ExportJobStatus::Completed {
            return Err(ExportError::NotCompleted {
                id: job_id,
                status: job.status,
            });
        }
        if job.is_expired_at(Utc::now()) {
            return Err(ExportError::ArchiveUnavailable(job_id));
        }
        job.result().ok_or(ExportError::ArchiveUnavailable(job_id))
    }

    /// Opens a completed job's archive for streaming.
    pub async fn open_download(&self, job_id: Uuid) -> Result<ArchiveDownload, ExportError> {
        let result = self.get_result(job_id).await?;
        let path = PathBuf::from(&result.archive_path);

        let (file, size_bytes) = match self.archives.open(&path).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Export archive missing");
                return Err(ExportError::ArchiveUnavailable(job_id));
            }
        };
        if size_bytes as i64 != result.size_bytes {
            warn!(
                job_id = %job_id,
                expected = result.size_bytes,
                actual = size_bytes,
                "Export archive size mismatch"
            );
            return Err(ExportError::ArchiveUnavailable(job_id));
        }

        Ok(ArchiveDownload {
            file,
            size_bytes,
            archive_name: result.archive_name,
        })
    }

    /// Cancels a pending or processing job.
    pub async fn cancel(&self, job_id: Uuid) -> Result<JobProgress, ExportError> {
        let job = self.get_job(job_id).await?;
        if job.status.is_terminal() {
            return Err(ExportError::AlreadyTerminal {
                id: job_id,
                status: job.status,
            });
        }

        if !self.repo.mark_cancelled(job_id).await? {
            // Lost a race with the worker or the stale sweep.
            let current = self.get_job(job_id).await?;
            return Err(ExportError::AlreadyTerminal {
                id: job_id,
                status: current.status,
            });
        }

        if let Some(token) = self.running().get(&job_id) {
            token.cancel();
        }
        counter!("export_jobs_cancelled_total").increment(1);
        info!(job_id = %job_id, user_id = %job.user_id, "Export job cancelled");

        self.get_progress(job_id).await
    }

    /// Jobs of a user, newest first. An empty status list means all.
    pub async fn list_jobs(
        &self,
        user_id: Uuid,
        statuses: &[ExportJobStatus],
    ) -> Result<Vec<JobSummary>, ExportError> {
        let jobs = self.repo.list_for_user(user_id, statuses).await?;
        Ok(jobs.iter().map(ExportJob::summary).collect())
    }

    /// Fails jobs past the stale timeout and stops their workers. Returns
    /// how many jobs were failed.
    pub async fn expire_stale(&self) -> Result<usize, ExportError> {
        let expired = self.admission.expire_stale().await?;
        {
            let running = self.running();
            for id in &expired {
                if let Some(token) = running.get(id) {
                    token.cancel();
                }
            }
        }
        if !expired.is_empty() {
            counter!("export_jobs_failed_total").increment(expired.len() as u64);
            warn!(expired = expired.len(), "Stale export jobs failed with timeout");
        }
        Ok(expired.len())
    }

    /// Cancels all in-flight work and waits for every worker to record its
    /// outcome.
    pub async fn shutdown(&self) {
        info!(running = self.running().len(), "Shutting down export workers");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Applies the latest progress value until the generator drops its sender.
async fn forward_progress(
    repo: Arc<dyn JobRepository>,
    job_id: Uuid,
    mut rx: watch::Receiver<ProgressUpdate>,
) {
    while rx.changed().await.is_ok() {
        let update = *rx.borrow_and_update();
        match repo.update_progress(job_id, update).await {
            Ok(true) => {}
            // The job left `processing`; later values would be refused too.
            Ok(false) => break,
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to record export progress"),
        }
    }
}
