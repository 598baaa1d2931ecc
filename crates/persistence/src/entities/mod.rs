//! Database entity definitions (row mappings).

pub mod document;
pub mod export_job;

pub use document::{DocumentEntity, DOCUMENT_COLUMNS};
pub use export_job::{ExportJobEntity, EXPORT_JOB_COLUMNS};
