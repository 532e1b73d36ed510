//! Server-Sent Events endpoints
//!
//! - `GET /events`: every job and palette event on the bus
//! - `GET /api/jobs/:id/logs`: one job's log, closed after its status marker

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use tracing::info;

use crate::jobs::drain;
use crate::{ApiResult, AppState};

/// GET /events - global event feed
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    trk_common::sse::event_bus_sse_stream(&state.event_bus, "trk-host")
}

/// GET /api/jobs/:id/logs - stream a job's log lines
///
/// Buffered lines are replayed first, then new lines as they are appended.
/// The last event carries `status=<Status>` and the stream ends after it.
pub async fn job_log_stream(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let job = state.jobs.get(&job_id).await?;
    info!(job_id = %job_id, "SSE client attached to job log");

    let stream = drain(job).map(|line| {
        // SSE cannot carry carriage returns (progress bars emit them)
        Ok::<_, Infallible>(Event::default().data(line.replace('\r', "")))
    });

    Ok(Sse::new(stream).keep_alive(trk_common::sse::keep_alive()))
}
