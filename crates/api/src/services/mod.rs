//! Export services.

pub mod admission;
pub mod archive_generator;
pub mod archive_store;
pub mod error;
pub mod export_cleanup;
pub mod export_jobs;
pub mod filter_estimator;
pub mod storage;

pub use admission::AdmissionController;
pub use archive_generator::{ArchiveGenerator, ArchiveOptions};
pub use archive_store::ArchiveStore;
pub use error::ExportError;
pub use export_cleanup::{CleanupReport, ExportCleanupService};
pub use export_jobs::{ArchiveDownload, ExportService};
pub use filter_estimator::{FilterEstimator, FilterLimits};
pub use storage::{build_file_store, HttpFileStore, LocalFileStore, StorageError};
