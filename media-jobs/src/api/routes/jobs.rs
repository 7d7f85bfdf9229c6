//! Job routes.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/api/jobs/{kind}` | Submit a job, returns 202 with its id |
//! | GET | `/api/jobs` | Recent jobs, newest first |
//! | GET | `/api/jobs/{id}` | Job record |
//! | GET | `/api/jobs/{id}/outputs` | Artifacts of a completed job |
//! | GET | `/api/jobs/{id}/outputs/{index}` | Download one artifact |
//! | POST | `/api/jobs/{id}/cancel` | Request cancellation |
//! | DELETE | `/api/jobs/{id}` | Delete a job that is not processing |

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::job::{JobKind, JobRecord, JobStatus, OutputArtifact};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/{key}", get(get_job).post(submit_job).delete(delete_job))
        .route("/{id}/outputs", get(get_outputs))
        .route("/{id}/outputs/{index}", get(download_output))
        .route("/{id}/cancel", post(cancel_job))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub status_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct OutputsResponse {
    pub job_id: String,
    pub outputs: Vec<OutputArtifact>,
}

/// `POST /api/jobs/{kind}`
async fn submit_job(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let kind: JobKind = kind.parse()?;
    let Json(params) = body?;
    let job_id = state.lifecycle.submit(kind, params).await?;
    let status_url = format!("/api/jobs/{job_id}");
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            status: JobStatus::Pending,
            status_url,
        }),
    ))
}

/// `GET /api/jobs`
async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<JobRecord>>> {
    let limit = params.limit.unwrap_or(50).min(500);
    Ok(Json(state.lifecycle.list(Some(limit)).await?))
}

/// `GET /api/jobs/{id}`
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    Ok(Json(state.lifecycle.status(&id).await?))
}

/// Outputs of `record`, or the status code explaining their absence.
fn completed_outputs(record: JobRecord) -> ApiResult<Vec<OutputArtifact>> {
    match record.status {
        JobStatus::Completed => Ok(record.outputs),
        JobStatus::Failed => {
            let details = serde_json::to_value(&record.error).unwrap_or_default();
            Err(ApiError::gone(format!("Job {} failed", record.id)).with_details(details))
        }
        JobStatus::Pending | JobStatus::Processing => Err(ApiError::conflict(format!(
            "job {} is still {}",
            record.id, record.status
        ))
        .with_details(serde_json::json!({
            "status": record.status,
            "progress": record.progress,
        }))),
    }
}

/// `GET /api/jobs/{id}/outputs`
async fn get_outputs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<OutputsResponse>> {
    let record = state.lifecycle.status(&id).await?;
    let outputs = completed_outputs(record)?;
    Ok(Json(OutputsResponse {
        job_id: id,
        outputs,
    }))
}

/// `GET /api/jobs/{id}/outputs/{index}`
async fn download_output(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
) -> ApiResult<Response> {
    let record = state.lifecycle.status(&id).await?;
    let outputs = completed_outputs(record)?;
    let artifact = outputs
        .get(index)
        .ok_or_else(|| ApiError::not_found(format!("Job {id} has no output {index}")))?;

    let file = tokio::fs::File::open(&artifact.path).await.map_err(|e| {
        tracing::warn!(
            job_id = %id,
            path = %artifact.path.display(),
            error = %e,
            "Artifact unreadable"
        );
        ApiError::gone(format!("Output {index} of job {id} is no longer available"))
    })?;

    let filename = artifact
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("output-{index}"));
    let mime = match artifact.path.extension().and_then(|e| e.to_str()) {
        Some("mp4") => "video/mp4",
        Some("srt") => "application/x-subrip",
        Some("vtt") => "text/vtt",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    };

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static(mime));
    let disposition = format!("attachment; filename=\"{filename}\"");
    if let Ok(value) = header::HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// `POST /api/jobs/{id}/cancel`
async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<JobRecord>)> {
    let record = state.lifecycle.cancel(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

/// `DELETE /api/jobs/{id}`
async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.lifecycle.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
