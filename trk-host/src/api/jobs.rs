//! Job endpoints
//!
//! Submission is fire-and-forget: the response carries the job id while the
//! body runs in the background. Progress is read by polling `/status` or by
//! streaming `/logs`.

use axum::{
    body::Body,
    extract::{Path, Request, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::jobs::{resolve_artifact_path, ArtifactScanner};
use crate::models::{Artifact, JobInputs, JobStatusResponse, JobSummary};
use crate::{ApiError, ApiResult, AppState};

/// POST /api/jobs body
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub kind: String,
    #[serde(default)]
    pub inputs: JobInputs,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ItemsResponse<T> {
    pub items: Vec<T>,
}

/// POST /api/jobs
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<Json<JobStatusResponse>> {
    if request.kind.trim().is_empty() {
        return Err(ApiError::BadRequest("kind must not be empty".to_string()));
    }
    submit(&state, &request.kind, request.inputs).await
}

/// Shared by `/api/jobs` and `/api/experiments/:id/jobs`
pub(crate) async fn submit(
    state: &AppState,
    kind: &str,
    inputs: JobInputs,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = state.executor.submit(kind, inputs).await?;
    Ok(Json(JobStatusResponse {
        job_id: job.id().to_string(),
        status: job.status(),
    }))
}

/// GET /api/jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<ItemsResponse<JobSummary>> {
    Json(ItemsResponse {
        items: state.jobs.list().await,
    })
}

/// GET /api/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSummary>> {
    Ok(Json(state.jobs.get(&job_id).await?.summary()))
}

/// GET /api/jobs/:id/status
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = state.jobs.get(&job_id).await?;
    tracing::debug!(job_id = %job_id, status = %job.status(), "Status query");
    Ok(Json(JobStatusResponse {
        job_id,
        status: job.status(),
    }))
}

/// POST /api/jobs/:id/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let status = state.jobs.cancel(&job_id).await?;
    Ok(Json(JobStatusResponse { job_id, status }))
}

/// GET /api/jobs/:id/artifacts
pub async fn list_artifacts(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ItemsResponse<Artifact>>> {
    let job = state.jobs.get(&job_id).await?;
    let work_dir = job.work_dir().to_path_buf();

    let items = tokio::task::spawn_blocking(move || ArtifactScanner::new().scan(&job_id, &work_dir))
        .await
        .map_err(|e| ApiError::Internal(format!("artifact scan task failed: {}", e)))??;

    Ok(Json(ItemsResponse { items }))
}

/// GET /api/jobs/:id/files/*path
pub async fn get_artifact_file(
    State(state): State<AppState>,
    Path((job_id, rel_path)): Path<(String, String)>,
    request: Request,
) -> ApiResult<Response> {
    let job = state.jobs.get(&job_id).await?;
    let path = resolve_artifact_path(job.work_dir(), &rel_path)?;

    let response = match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    Ok(response.map(Body::new))
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/api/jobs", post(submit_job).get(list_jobs))
        .route("/api/jobs/:id", get(get_job))
        .route("/api/jobs/:id/status", get(get_job_status))
        .route("/api/jobs/:id/logs", get(super::sse::job_log_stream))
        .route("/api/jobs/:id/artifacts", get(list_artifacts))
        .route("/api/jobs/:id/files/*path", get(get_artifact_file))
        .route("/api/jobs/:id/cancel", post(cancel_job))
}
