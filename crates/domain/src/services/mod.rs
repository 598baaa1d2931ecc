//! Capabilities consumed by the export pipeline.
//!
//! Each capability is a trait with an in-memory implementation; production
//! backends live in the persistence and api crates.

pub mod document_catalog;
pub mod file_store;
pub mod job_repository;

pub use document_catalog::{DocumentCatalog, InMemoryDocumentCatalog};
pub use file_store::{FileStore, InMemoryFileStore};
pub use job_repository::{Admission, InMemoryJobRepository, JobRepository, ProgressUpdate};
