//! Job lifecycle type definitions
//!
//! Supporting types shared by the job executor and anything that observes it.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Job status state machine
///
/// ```text
/// Pending -> Running -> Completed
///                    -> Failed
///                    -> Cancelled
/// Pending -> Cancelled
/// ```
///
/// Terminal states are sinks: once reached, status never changes again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum JobStatus {
    /// Submitted, waiting for a worker
    Pending,
    /// Body is executing
    Running,
    /// Body returned normally
    Completed,
    /// Body returned an error or panicked
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl JobStatus {
    /// Whether this status is a sink of the state machine
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Position in the partial order Pending < Running < {terminal}
    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 2,
        }
    }

    /// Whether `self -> next` is a legal, strictly forward transition
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Cancelled => "Cancelled",
        }
    }

    /// Final log line written when the job reaches this (terminal) status
    pub fn marker_line(self) -> String {
        format!("status={}", self.as_str())
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(JobStatus::Pending),
            "Running" => Ok(JobStatus::Running),
            "Completed" => Ok(JobStatus::Completed),
            "Failed" => Ok(JobStatus::Failed),
            "Cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}
