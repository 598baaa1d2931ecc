//! Background job scheduler and job implementations.

mod export_cleanup;
mod pool_metrics;
mod scheduler;
mod stale_export_sweep;

pub use export_cleanup::ExportCleanupJob;
pub use pool_metrics::PoolMetricsJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
pub use stale_export_sweep::StaleExportSweepJob;
