//! Export job domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::filter::FilterSpec;

/// Default retention of an export job and its archive, in hours.
pub const EXPORT_JOB_EXPIRY_HOURS: i64 = 24;

/// Progress reached once a job has been picked up.
pub const PROGRESS_STARTED: i32 = 5;

/// Progress reached once documents have been selected.
pub const PROGRESS_SELECTED: i32 = 20;

/// Upper bound of the progress range reserved for archive generation.
pub const PROGRESS_ARCHIVED: i32 = 90;

/// Progress of a completed job.
pub const PROGRESS_COMPLETE: i32 = 100;

// ============================================================================
// Status
// ============================================================================

/// Status of an export job in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ExportJobStatus {
    /// Statuses that occupy a slot of the per-user quota.
    pub const ACTIVE: [ExportJobStatus; 2] = [ExportJobStatus::Pending, ExportJobStatus::Processing];

    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportJobStatus::Pending => "pending",
            ExportJobStatus::Processing => "processing",
            ExportJobStatus::Completed => "completed",
            ExportJobStatus::Failed => "failed",
            ExportJobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportJobStatus::Completed | ExportJobStatus::Failed | ExportJobStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Check if transition to target status is valid.
    pub fn can_transition_to(&self, target: ExportJobStatus) -> bool {
        match (self, target) {
            (ExportJobStatus::Pending, ExportJobStatus::Processing) => true,
            (ExportJobStatus::Processing, ExportJobStatus::Completed) => true,
            (ExportJobStatus::Pending | ExportJobStatus::Processing, ExportJobStatus::Failed) => {
                true
            }
            (ExportJobStatus::Pending | ExportJobStatus::Processing, ExportJobStatus::Cancelled) => {
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for ExportJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExportJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ExportJobStatus::Pending),
            "processing" => Ok(ExportJobStatus::Processing),
            "completed" => Ok(ExportJobStatus::Completed),
            "failed" => Ok(ExportJobStatus::Failed),
            "cancelled" => Ok(ExportJobStatus::Cancelled),
            _ => Err(format!("Unknown export job status: {}", s)),
        }
    }
}

// ============================================================================
// Core Model
// ============================================================================

/// One export request and its processing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub status: ExportJobStatus,
    pub filter: FilterSpec,
    pub total_documents: i64,
    pub processed_documents: i64,
    pub failed_documents: i64,
    pub progress_percent: i32,
    pub estimated_size_bytes: i64,
    pub actual_size_bytes: Option<i64>,
    pub archive_path: Option<String>,
    pub archive_name: Option<String>,
    pub archive_checksum: Option<String>,
    pub error_detail: Option<String>,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl ExportJob {
    /// Materializes a freshly admitted job in `Pending`.
    pub fn from_new(new: NewExportJob, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            user_id: new.user_id,
            unit_id: new.unit_id,
            status: ExportJobStatus::Pending,
            filter: new.filter,
            total_documents: new.total_documents,
            processed_documents: 0,
            failed_documents: 0,
            progress_percent: 0,
            estimated_size_bytes: new.estimated_size_bytes,
            actual_size_bytes: None,
            archive_path: None,
            archive_name: None,
            archive_checksum: None,
            error_detail: None,
            warnings: new.warnings,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            expires_at: new.expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn progress(&self) -> JobProgress {
        JobProgress {
            job_id: self.id,
            status: self.status,
            total_documents: self.total_documents,
            processed_documents: self.processed_documents,
            failed_documents: self.failed_documents,
            progress_percent: self.progress_percent,
            error_detail: self.error_detail.clone(),
            warnings: self.warnings.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            expires_at: self.expires_at,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id,
            status: self.status,
            progress_percent: self.progress_percent,
            total_documents: self.total_documents,
            archive_name: self.archive_name.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }

    /// Download view of a completed job; `None` for any other status or when
    /// the archive fields are missing.
    pub fn result(&self) -> Option<JobResult> {
        if self.status != ExportJobStatus::Completed {
            return None;
        }

        Some(JobResult {
            job_id: self.id,
            archive_name: self.archive_name.clone()?,
            archive_path: self.archive_path.clone()?,
            size_bytes: self.actual_size_bytes?,
            checksum: self.archive_checksum.clone(),
            total_documents: self.total_documents,
            processed_documents: self.processed_documents,
            failed_documents: self.failed_documents,
            warnings: self.warnings.clone(),
            completed_at: self.completed_at,
            expires_at: self.expires_at,
        })
    }
}

/// Input for creating a job in `Pending`.
#[derive(Debug, Clone)]
pub struct NewExportJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub filter: FilterSpec,
    pub total_documents: i64,
    pub estimated_size_bytes: i64,
    pub warnings: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Everything recorded on a job when its archive is finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveOutcome {
    pub archive_path: String,
    pub archive_name: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub processed_documents: i64,
    pub failed_documents: i64,
    pub warnings: Vec<String>,
}

// ============================================================================
// Views
// ============================================================================

/// Polled progress of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: Uuid,
    pub status: ExportJobStatus,
    pub total_documents: i64,
    pub processed_documents: i64,
    pub failed_documents: i64,
    pub progress_percent: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

/// Download handle of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job_id: Uuid,
    pub archive_name: String,
    #[serde(skip_serializing, default)]
    pub archive_path: String,
    pub size_bytes: i64,
    pub checksum: Option<String>,
    pub total_documents: i64,
    pub processed_documents: i64,
    pub failed_documents: i64,
    pub warnings: Vec<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

/// Row of a user's job listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: Uuid,
    pub status: ExportJobStatus,
    pub progress_percent: i32,
    pub total_documents: i64,
    pub archive_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
