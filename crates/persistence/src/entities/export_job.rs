//! Export job entity.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row of the `export_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct ExportJobEntity {
    pub id: Uuid,

    /// Requesting user.
    pub user_id: Uuid,

    /// Organizational unit of the requesting user, if known.
    pub unit_id: Option<Uuid>,

    /// Lifecycle status, one of `pending`, `processing`, `completed`,
    /// `failed` or `cancelled`.
    pub status: String,

    /// Filter the job was admitted with (JSONB).
    pub filter: serde_json::Value,

    pub total_documents: i64,
    pub processed_documents: i64,
    pub failed_documents: i64,
    pub progress_percent: i32,
    pub estimated_size_bytes: i64,
    pub actual_size_bytes: Option<i64>,

    /// Server-side archive location; never exposed over the API.
    pub archive_path: Option<String>,
    pub archive_name: Option<String>,

    /// Hex SHA-256 of the finished archive.
    pub archive_checksum: Option<String>,

    pub error_detail: Option<String>,

    /// JSON array of warning strings.
    pub warnings: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

/// Column list shared by every query returning [`ExportJobEntity`].
pub const EXPORT_JOB_COLUMNS: &str = "id, user_id, unit_id, status, filter, total_documents, \
     processed_documents, failed_documents, progress_percent, estimated_size_bytes, \
     actual_size_bytes, archive_path, archive_name, archive_checksum, error_detail, warnings, \
     created_at, updated_at, started_at, completed_at, expires_at";
