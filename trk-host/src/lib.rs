//! trk-host library interface
//!
//! Background job execution with streamed logs, plus the palette document
//! store. Exposed as a library so integration tests can drive the router.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod experiments;
pub mod jobs;
pub mod models;
pub mod pagination;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use trk_common::events::EventBus;

use crate::experiments::ExperimentRegistry;
use crate::jobs::{JobExecutor, JobRegistry};
use crate::services::PaletteStore;

/// Broadcast buffer for the global event feed
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool (palettes and snapshots)
    pub db: SqlitePool,
    /// Event bus for the `/events` feed
    pub event_bus: EventBus,
    /// Job table
    pub jobs: JobRegistry,
    /// Runs job bodies
    pub executor: JobExecutor,
    /// Palette documents
    pub palettes: PaletteStore,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        runs_dir: PathBuf,
        experiments: ExperimentRegistry,
        max_concurrent_jobs: usize,
    ) -> Self {
        let jobs = JobRegistry::new(runs_dir, event_bus.clone());
        let executor = JobExecutor::new(jobs.clone(), Arc::new(experiments), max_concurrent_jobs);
        let palettes = PaletteStore::new(db.clone(), event_bus.clone());
        Self {
            db,
            event_bus,
            jobs,
            executor,
            palettes,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health_routes())
        .merge(api::experiment_routes())
        .merge(api::job_routes())
        .merge(api::palette_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // The canvas UI is served from another local origin
        .layer(CorsLayer::permissive())
}
