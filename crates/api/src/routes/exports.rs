//! Document export endpoints.
//!
//! Jobs are only visible to the user that submitted them; a job owned by
//! someone else answers 404 like a missing one.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use domain::models::{
    ExportJob, ExportJobStatus, FilterSpec, FilterValidation, JobProgress, JobResult, JobSummary,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio_util::io::ReaderStream;
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::Caller;

/// Query parameters of the job listing.
#[derive(Debug, Default, Deserialize)]
pub struct ListExportsQuery {
    /// Comma-separated statuses, e.g. `pending,processing`.
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExportsResponse {
    pub jobs: Vec<JobSummary>,
    pub count: usize,
}

/// Parses `?status=` into a status list; empty means all statuses.
pub fn parse_status_filter(raw: Option<&str>) -> Result<Vec<ExportJobStatus>, ApiError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let mut statuses = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let status = ExportJobStatus::from_str(part).map_err(ApiError::BadRequest)?;
        if !statuses.contains(&status) {
            statuses.push(status);
        }
    }
    Ok(statuses)
}

async fn owned_job(state: &AppState, caller: &Caller, job_id: Uuid) -> Result<ExportJob, ApiError> {
    let job = state.exports.get_job(job_id).await?;
    if job.user_id != caller.user_id {
        return Err(ApiError::NotFound(format!("Export job {} not found", job_id)));
    }
    Ok(job)
}

/// `POST /api/v1/exports`
pub async fn submit_export(
    State(state): State<AppState>,
    caller: Caller,
    Json(filter): Json<FilterSpec>,
) -> Result<(StatusCode, Json<JobProgress>), ApiError> {
    let job_id = state
        .exports
        .submit(caller.user_id, caller.unit_id, filter)
        .await?;
    let progress = state.exports.get_progress(job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(progress)))
}

/// `POST /api/v1/exports/validate`
pub async fn validate_export(
    State(state): State<AppState>,
    _caller: Caller,
    Json(filter): Json<FilterSpec>,
) -> Result<Json<FilterValidation>, ApiError> {
    Ok(Json(state.exports.validate_filter(&filter).await?))
}

/// `GET /api/v1/exports`
pub async fn list_exports(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListExportsQuery>,
) -> Result<Json<ListExportsResponse>, ApiError> {
    let statuses = parse_status_filter(query.status.as_deref())?;
    let jobs = state.exports.list_jobs(caller.user_id, &statuses).await?;
    Ok(Json(ListExportsResponse {
        count: jobs.len(),
        jobs,
    }))
}

/// `GET /api/v1/exports/:job_id`
pub async fn get_export(
    State(state): State<AppState>,
    caller: Caller,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobProgress>, ApiError> {
    Ok(Json(owned_job(&state, &caller, job_id).await?.progress()))
}

/// `GET /api/v1/exports/:job_id/result`
pub async fn get_export_result(
    State(state): State<AppState>,
    caller: Caller,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResult>, ApiError> {
    owned_job(&state, &caller, job_id).await?;
    Ok(Json(state.exports.get_result(job_id).await?))
}

/// `GET /api/v1/exports/:job_id/download`
pub async fn download_export(
    State(state): State<AppState>,
    caller: Caller,
    Path(job_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    owned_job(&state, &caller, job_id).await?;
    let download = state.exports.open_download(job_id).await?;

    info!(
        job_id = %job_id,
        user_id = %caller.user_id,
        size_bytes = download.size_bytes,
        "Streaming export archive"
    );

    let disposition = format!(
        "attachment; filename=\"{}\"",
        download.archive_name.replace('"', "")
    );
    let body = Body::from_stream(ReaderStream::new(download.file));

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, download.size_bytes.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// `POST /api/v1/exports/:job_id/cancel`
pub async fn cancel_export(
    State(state): State<AppState>,
    caller: Caller,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobProgress>, ApiError> {
    owned_job(&state, &caller, job_id).await?;
    Ok(Json(state.exports.cancel(job_id).await?))
}
