//! Document catalogue entity.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row of the `documents` table.
#[derive(Debug, Clone, FromRow)]
pub struct DocumentEntity {
    pub id: Uuid,
    pub citizen_id: Uuid,
    pub request_id: Option<Uuid>,
    pub document_type: String,
    /// Location in the document store, relative to its root.
    pub storage_path: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub original_filename: String,
    pub created_at: DateTime<Utc>,
    pub verified: bool,
}

pub const DOCUMENT_COLUMNS: &str = "id, citizen_id, request_id, document_type, storage_path, \
     size_bytes, mime_type, original_filename, created_at, verified";
