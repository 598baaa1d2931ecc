//! Domain layer for the document export service.
//!
//! This crate contains:
//! - Domain models (ExportJob, FilterSpec, DocumentRef, ArchiveEntry)
//! - Capability traits for job storage, the document catalog and file storage
//! - In-memory implementations of those capabilities
//! - Domain error types

pub mod error;
pub mod models;
pub mod services;
