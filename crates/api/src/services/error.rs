//! Errors surfaced by the export services.

use domain::error::RepositoryError;
use domain::models::{ExportJobStatus, FilterValidation};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ExportError {
    /// The filter was rejected; no job was created.
    #[error("Invalid filter: {}", .0.errors.join("; "))]
    InvalidFilter(FilterValidation),

    #[error("Export quota exceeded: {active} of {limit} exports already active")]
    QuotaExceeded { active: i64, limit: i64 },

    #[error("Export job {0} not found")]
    NotFound(Uuid),

    #[error("Export job {id} is {status}, not completed")]
    NotCompleted { id: Uuid, status: ExportJobStatus },

    #[error("Export job {id} is already {status}")]
    AlreadyTerminal { id: Uuid, status: ExportJobStatus },

    #[error("Archive for export job {0} is no longer available")]
    ArchiveUnavailable(Uuid),

    #[error("Export service is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
