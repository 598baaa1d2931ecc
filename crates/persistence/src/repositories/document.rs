//! Document catalogue queries.
//!
//! The catalogue is owned by the case-management side of the platform; this
//! service only reads it. Soft-deleted rows are never exported.

use async_trait::async_trait;
use domain::error::RepositoryError;
use domain::models::{DocumentEstimate, DocumentRef, DocumentType, FilterSpec};
use domain::services::DocumentCatalog;
use shared::pagination::PageCursor;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::export_job::db_error;
use crate::entities::{DocumentEntity, DOCUMENT_COLUMNS};
use crate::metrics::QueryTimer;

/// Read-only repository over the `documents` table.
#[derive(Clone)]
pub struct DocumentRepository {
    pool: PgPool,
}

impl DocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn entity_to_domain(entity: DocumentEntity) -> Result<DocumentRef, RepositoryError> {
    let document_type: DocumentType =
        entity
            .document_type
            .parse()
            .map_err(|e: String| RepositoryError::CorruptRecord {
                id: entity.id.to_string(),
                reason: e,
            })?;

    Ok(DocumentRef {
        id: entity.id,
        citizen_id: entity.citizen_id,
        request_id: entity.request_id,
        document_type,
        storage_path: entity.storage_path,
        size_bytes: entity.size_bytes,
        mime_type: entity.mime_type,
        original_filename: entity.original_filename,
        created_at: entity.created_at,
        verified: entity.verified,
    })
}

/// Appends the `WHERE` clause selecting the documents matched by `filter`.
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &FilterSpec) {
    let filter = filter.normalized();
    builder.push(" WHERE deleted_at IS NULL");

    if let Some(citizens) = filter.citizen_ids {
        builder.push(" AND citizen_id = ANY(");
        builder.push_bind(citizens.into_iter().collect::<Vec<_>>());
        builder.push(")");
    }
    if let Some(requests) = filter.request_ids {
        builder.push(" AND request_id = ANY(");
        builder.push_bind(requests.into_iter().collect::<Vec<_>>());
        builder.push(")");
    }
    // Unknown tags are rejected before a filter reaches the catalogue; any
    // that slip through simply match nothing.
    if let Some(tags) = filter.document_types {
        let types: Vec<String> = tags
            .iter()
            .filter_map(|t| t.parse::<DocumentType>().ok())
            .map(|t| t.as_str().to_string())
            .collect();
        builder.push(" AND document_type = ANY(");
        builder.push_bind(types);
        builder.push(")");
    }
    if let Some(from) = filter.date_from {
        builder.push(" AND created_at >= ");
        builder.push_bind(from);
    }
    if let Some(to) = filter.date_to {
        builder.push(" AND created_at <= ");
        builder.push_bind(to);
    }
    if filter.verified_only {
        builder.push(" AND verified");
    }
}

#[async_trait]
impl DocumentCatalog for DocumentRepository {
    async fn find_page(
        &self,
        filter: &FilterSpec,
        after: Option<PageCursor>,
        limit: usize,
    ) -> Result<Vec<DocumentRef>, RepositoryError> {
        let timer = QueryTimer::new("find_documents_page");
        let mut builder = QueryBuilder::new(format!("SELECT {} FROM documents", DOCUMENT_COLUMNS));
        push_filter(&mut builder, filter);

        if let Some(cursor) = after {
            builder.push(" AND (created_at, id) < (");
            builder.push_bind(cursor.created_at);
            builder.push(", ");
            builder.push_bind(cursor.id);
            builder.push(")");
        }
        builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        builder.push_bind(limit as i64);

        let entities = builder
            .build_query_as::<DocumentEntity>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        timer.record();

        entities.into_iter().map(entity_to_domain).collect()
    }

    async fn aggregate(&self, filter: &FilterSpec) -> Result<DocumentEstimate, RepositoryError> {
        let timer = QueryTimer::new("aggregate_documents");
        let mut builder = QueryBuilder::new(
            "SELECT COUNT(*)::BIGINT, COALESCE(SUM(GREATEST(size_bytes, 0)), 0)::BIGINT FROM documents",
        );
        push_filter(&mut builder, filter);

        let (document_count, estimated_size_bytes): (i64, i64) = builder
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        timer.record();

        Ok(DocumentEstimate {
            document_count,
            estimated_size_bytes,
        })
    }
}
