//! Stale export sweep background job.

use std::sync::Arc;

use crate::services::ExportService;

use super::scheduler::{Job, JobFrequency};

/// Fails export jobs that stayed pending or processing past the stale
/// timeout and stops their workers.
pub struct StaleExportSweepJob {
    service: Arc<ExportService>,
    interval_secs: u64,
}

impl StaleExportSweepJob {
    pub fn new(service: Arc<ExportService>, interval_secs: u64) -> Self {
        Self {
            service,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for StaleExportSweepJob {
    fn name(&self) -> &'static str {
        "stale_export_sweep"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        self.service
            .expire_stale()
            .await
            .map(|_| ())
            .map_err(|e| format!("Failed to expire stale exports: {}", e))
    }
}
