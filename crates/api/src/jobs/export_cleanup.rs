//! Expired export cleanup background job.

use std::sync::Arc;

use crate::services::ExportCleanupService;

use super::scheduler::{Job, JobFrequency};

/// Removes expired export jobs and their archives.
pub struct ExportCleanupJob {
    service: Arc<ExportCleanupService>,
    interval_secs: u64,
}

impl ExportCleanupJob {
    pub fn new(service: Arc<ExportCleanupService>, interval_secs: u64) -> Self {
        Self {
            service,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for ExportCleanupJob {
    fn name(&self) -> &'static str {
        "export_cleanup"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        self.service
            .run_once()
            .await
            .map(|_| ())
            .map_err(|e| format!("Failed to clean up expired exports: {}", e))
    }
}
