//! HTTP API handlers for trk-host

pub mod experiments;
pub mod health;
pub mod jobs;
pub mod palettes;
pub mod sse;

pub use experiments::experiment_routes;
pub use health::health_routes;
pub use jobs::job_routes;
pub use palettes::palette_routes;
pub use sse::{event_stream, job_log_stream};
