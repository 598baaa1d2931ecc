//! Export job repository for database operations.
//!
//! Status transitions are single guarded `UPDATE`s, so a job that reached a
//! terminal status is never modified again regardless of which task races
//! to write it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::error::RepositoryError;
use domain::models::{ArchiveOutcome, ExportJob, ExportJobStatus, FilterSpec, NewExportJob};
use domain::services::{Admission, JobRepository, ProgressUpdate};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::{ExportJobEntity, EXPORT_JOB_COLUMNS};
use crate::metrics::QueryTimer;

/// Repository for export job database operations.
#[derive(Clone)]
pub struct ExportJobRepository {
    pool: PgPool,
}

impl ExportJobRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn db_error(err: sqlx::Error) -> RepositoryError {
    RepositoryError::Database(err.to_string())
}

fn corrupt(id: Uuid, reason: impl ToString) -> RepositoryError {
    RepositoryError::CorruptRecord {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

/// Converts a database row into the domain model.
pub fn entity_to_domain(entity: ExportJobEntity) -> Result<ExportJob, RepositoryError> {
    let id = entity.id;
    let status: ExportJobStatus = entity.status.parse().map_err(|e| corrupt(id, e))?;
    let filter: FilterSpec = serde_json::from_value(entity.filter)
        .map_err(|e| corrupt(id, format!("filter: {}", e)))?;
    let warnings: Vec<String> = serde_json::from_value(entity.warnings)
        .map_err(|e| corrupt(id, format!("warnings: {}", e)))?;

    Ok(ExportJob {
        id,
        user_id: entity.user_id,
        unit_id: entity.unit_id,
        status,
        filter,
        total_documents: entity.total_documents,
        processed_documents: entity.processed_documents,
        failed_documents: entity.failed_documents,
        progress_percent: entity.progress_percent,
        estimated_size_bytes: entity.estimated_size_bytes,
        actual_size_bytes: entity.actual_size_bytes,
        archive_path: entity.archive_path,
        archive_name: entity.archive_name,
        archive_checksum: entity.archive_checksum,
        error_detail: entity.error_detail,
        warnings,
        created_at: entity.created_at,
        updated_at: entity.updated_at,
        started_at: entity.started_at,
        completed_at: entity.completed_at,
        expires_at: entity.expires_at,
    })
}

fn status_list(statuses: &[ExportJobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl JobRepository for ExportJobRepository {
    async fn insert_within_quota(
        &self,
        job: NewExportJob,
        max_active: i64,
    ) -> Result<Admission, RepositoryError> {
        let timer = QueryTimer::new("insert_export_job_within_quota");
        let filter = serde_json::to_value(&job.filter)
            .map_err(|e| corrupt(job.id, format!("filter: {}", e)))?;
        let warnings = serde_json::to_value(&job.warnings)
            .map_err(|e| corrupt(job.id, format!("warnings: {}", e)))?;

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // Serializes concurrent submissions of the same user until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(job.user_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let active: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM export_jobs
            WHERE user_id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(job.user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        if active >= max_active {
            tx.rollback().await.map_err(db_error)?;
            timer.record();
            return Ok(Admission::QuotaExceeded { active });
        }

        let sql = format!(
            r#"
            INSERT INTO export_jobs (id, user_id, unit_id, status, filter, total_documents,
                                     estimated_size_bytes, warnings, expires_at)
            VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            EXPORT_JOB_COLUMNS
        );
        let entity = sqlx::query_as::<_, ExportJobEntity>(&sql)
            .bind(job.id)
            .bind(job.user_id)
            .bind(job.unit_id)
            .bind(&filter)
            .bind(job.total_documents.max(0))
            .bind(job.estimated_size_bytes.max(0))
            .bind(&warnings)
            .bind(job.expires_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        timer.record();

        Ok(Admission::Admitted(entity_to_domain(entity)?))
    }

    async fn count_active(&self, user_id: Uuid) -> Result<i64, RepositoryError> {
        let timer = QueryTimer::new("count_active_export_jobs");
        let result = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM export_jobs
            WHERE user_id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error);
        timer.record();
        result
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ExportJob>, RepositoryError> {
        let timer = QueryTimer::new("find_export_job_by_id");
        let sql = format!("SELECT {} FROM export_jobs WHERE id = $1", EXPORT_JOB_COLUMNS);
        let entity = sqlx::query_as::<_, ExportJobEntity>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        timer.record();

        entity.map(entity_to_domain).transpose()
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        statuses: &[ExportJobStatus],
    ) -> Result<Vec<ExportJob>, RepositoryError> {
        let timer = QueryTimer::new("list_export_jobs_for_user");
        let sql = format!(
            r#"
            SELECT {} FROM export_jobs
            WHERE user_id = $1 AND (cardinality($2::text[]) = 0 OR status = ANY($2))
            ORDER BY created_at DESC, id DESC
            "#,
            EXPORT_JOB_COLUMNS
        );
        let entities = sqlx::query_as::<_, ExportJobEntity>(&sql)
            .bind(user_id)
            .bind(status_list(statuses))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        timer.record();

        entities.into_iter().map(entity_to_domain).collect()
    }

    async fn mark_processing(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'processing', started_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_selection(
        &self,
        id: Uuid,
        total_documents: i64,
        selected_size_bytes: i64,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET total_documents = GREATEST($2, 0),
                estimated_size_bytes = GREATEST($3, 0),
                processed_documents = LEAST(processed_documents, GREATEST($2, 0)),
                failed_documents = LEAST(failed_documents,
                    GREATEST($2, 0) - LEAST(processed_documents, GREATEST($2, 0))),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(total_documents)
        .bind(selected_size_bytes)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(
        &self,
        id: Uuid,
        update: ProgressUpdate,
    ) -> Result<bool, RepositoryError> {
        let timer = QueryTimer::new("update_export_job_progress");
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET processed_documents = LEAST(GREATEST($2, 0), total_documents),
                failed_documents = LEAST(GREATEST($3, 0),
                    total_documents - LEAST(GREATEST($2, 0), total_documents)),
                progress_percent = GREATEST(progress_percent, LEAST(GREATEST($4, 0), 100)),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(update.processed_documents)
        .bind(update.failed_documents)
        .bind(update.progress_percent)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        timer.record();

        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        outcome: &ArchiveOutcome,
    ) -> Result<bool, RepositoryError> {
        let warnings = serde_json::to_value(&outcome.warnings)
            .map_err(|e| corrupt(id, format!("warnings: {}", e)))?;

        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'completed',
                processed_documents = LEAST(GREATEST($2, 0), total_documents),
                failed_documents = LEAST(GREATEST($3, 0),
                    total_documents - LEAST(GREATEST($2, 0), total_documents)),
                progress_percent = 100,
                actual_size_bytes = $4,
                archive_path = $5,
                archive_name = $6,
                archive_checksum = $7,
                warnings = warnings || $8,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(outcome.processed_documents)
        .bind(outcome.failed_documents)
        .bind(outcome.size_bytes)
        .bind(&outcome.archive_path)
        .bind(&outcome.archive_name)
        .bind(&outcome.checksum)
        .bind(&warnings)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: Uuid, detail: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'failed', error_detail = $2, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .bind(detail)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'cancelled', completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_stale(
        &self,
        created_before: DateTime<Utc>,
        detail: &str,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        let timer = QueryTimer::new("fail_stale_export_jobs");
        let result = sqlx::query_scalar(
            r#"
            UPDATE export_jobs
            SET status = 'failed', error_detail = $2, completed_at = NOW(), updated_at = NOW()
            WHERE status IN ('pending', 'processing') AND created_at < $1
            RETURNING id
            "#,
        )
        .bind(created_before)
        .bind(detail)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error);
        timer.record();
        result
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<ExportJob>, RepositoryError> {
        let timer = QueryTimer::new("find_expired_export_jobs");
        let sql = format!(
            "SELECT {} FROM export_jobs WHERE expires_at < $1 ORDER BY expires_at",
            EXPORT_JOB_COLUMNS
        );
        let entities = sqlx::query_as::<_, ExportJobEntity>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        timer.record();

        entities.into_iter().map(entity_to_domain).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM export_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entity() -> ExportJobEntity {
        let now = Utc::now();
        ExportJobEntity {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            unit_id: None,
            status: "processing".to_string(),
            filter: serde_json::json!({
                "citizenIds": ["6f1c7c1e-8a43-4c0e-9a51-3f0f1e2d7b10"],
                "verifiedOnly": true
            }),
            total_documents: 10,
            processed_documents: 4,
            failed_documents: 1,
            progress_percent: 48,
            estimated_size_bytes: 2048,
            actual_size_bytes: None,
            archive_path: None,
            archive_name: None,
            archive_checksum: None,
            error_detail: None,
            warnings: serde_json::json!(["Large date range"]),
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            completed_at: None,
            expires_at: now + Duration::hours(24),
        }
    }

    #[test]
    fn test_entity_to_domain() {
        let job = entity_to_domain(entity()).unwrap();
        assert_eq!(job.status, ExportJobStatus::Processing);
        assert!(job.filter.verified_only);
        assert_eq!(job.filter.citizen_ids.as_ref().map(|s| s.len()), Some(1));
        assert_eq!(job.warnings, vec!["Large date range".to_string()]);
        assert_eq!(job.processed_documents, 4);
    }

    #[test]
    fn test_entity_with_unknown_status_is_corrupt() {
        let mut row = entity();
        row.status = "expired".to_string();
        let err = entity_to_domain(row).unwrap_err();
        assert!(matches!(err, RepositoryError::CorruptRecord { .. }));
    }

    #[test]
    fn test_entity_with_malformed_warnings_is_corrupt() {
        let mut row = entity();
        row.warnings = serde_json::json!({"not": "an array"});
        assert!(matches!(
            entity_to_domain(row),
            Err(RepositoryError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn test_status_list() {
        assert!(status_list(&[]).is_empty());
        assert_eq!(
            status_list(&ExportJobStatus::ACTIVE),
            vec!["pending".to_string(), "processing".to_string()]
        );
    }
}
