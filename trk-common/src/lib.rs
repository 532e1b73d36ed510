//! # TRK Common Library
//!
//! Shared code for the TRK host and its tooling:
//! - Error type used across crates
//! - Configuration loading and root folder resolution
//! - Event types (TrkEvent enum) and the EventBus
//! - SSE helpers
//! - Time and id utilities

pub mod config;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
