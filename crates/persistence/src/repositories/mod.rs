//! Repository implementations backed by PostgreSQL.

pub mod document;
pub mod export_job;

pub use document::DocumentRepository;
pub use export_job::ExportJobRepository;
