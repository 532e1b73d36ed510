//! Job-facing response models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use trk_common::events::JobStatus;

/// Job identifier: 12 lowercase hex characters
pub type JobId = String;

/// Key-value inputs handed to a job body
pub type JobInputs = Map<String, Value>;

/// Point-in-time view of a job record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: JobId,
    pub kind: String,
    pub status: JobStatus,
    pub inputs: JobInputs,
    pub log_lines: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// `{jobId, status}` pair returned by submit, status and cancel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// A file found under a job's working directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// File name without directories
    pub name: String,
    /// Path relative to the work dir, always `/`-separated
    pub rel_path: String,
    pub size_bytes: u64,
    /// Where the host serves the file
    pub uri: String,
}
