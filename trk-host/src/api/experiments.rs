//! Experiment endpoints

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::experiments::ExperimentInfo;
use crate::models::{JobInputs, JobStatusResponse};
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct ExperimentsResponse {
    pub experiments: Vec<ExperimentInfo>,
}

/// GET /api/experiments
pub async fn list_experiments(State(state): State<AppState>) -> Json<ExperimentsResponse> {
    Json(ExperimentsResponse {
        experiments: state.executor.experiments().list(),
    })
}

/// POST /api/experiments/:id/jobs - body is the job's input map
pub async fn run_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<String>,
    body: Option<Json<JobInputs>>,
) -> ApiResult<Json<JobStatusResponse>> {
    if !state.executor.experiments().contains(&experiment_id) {
        return Err(ApiError::NotFound(format!(
            "experiment {}",
            experiment_id
        )));
    }
    let inputs = body.map(|Json(inputs)| inputs).unwrap_or_default();
    super::jobs::submit(&state, &experiment_id, inputs).await
}

/// Build experiment routes
pub fn experiment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/experiments", get(list_experiments))
        .route("/api/experiments/:id/jobs", post(run_experiment))
}
