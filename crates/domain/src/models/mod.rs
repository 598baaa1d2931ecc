//! Domain models for the document export service.

pub mod archive;
pub mod document;
pub mod export_job;
pub mod filter;

pub use archive::{ArchiveEntry, PLACEHOLDER_SUFFIX};
pub use document::{DocumentEstimate, DocumentRef, DocumentType};
pub use export_job::{
    ArchiveOutcome, ExportJob, ExportJobStatus, JobProgress, JobResult, JobSummary, NewExportJob,
    EXPORT_JOB_EXPIRY_HOURS, PROGRESS_ARCHIVED, PROGRESS_COMPLETE, PROGRESS_SELECTED,
    PROGRESS_STARTED,
};
pub use filter::{FilterSpec, FilterValidation};
