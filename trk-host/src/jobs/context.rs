//! Handle given to a running job body

use anyhow::{anyhow, bail, Context};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use trk_common::events::JobStatus;

use super::executor::JobExecutor;
use super::registry::Job;
use crate::models::{JobId, JobInputs};

/// Result of waiting on a sub-job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubJobOutcome {
    /// The sub-job reached a terminal state within the wait
    Finished { job_id: JobId, status: JobStatus },
    /// The wait ran out; the sub-job keeps running on its own
    TimedOut { job_id: JobId },
}

/// Bound to one job: logging, inputs, work dir and cancellation
#[derive(Clone)]
pub struct RunContext {
    job: Arc<Job>,
    executor: JobExecutor,
}

impl RunContext {
    pub(crate) fn new(job: Arc<Job>, executor: JobExecutor) -> Self {
        Self { job, executor }
    }

    pub fn job_id(&self) -> &str {
        self.job.id()
    }

    pub fn work_dir(&self) -> &Path {
        self.job.work_dir()
    }

    pub fn inputs(&self) -> &JobInputs {
        self.job.inputs()
    }

    pub fn input(&self, key: &str) -> Option<&Value> {
        self.job.inputs().get(key)
    }

    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input(key).and_then(Value::as_str)
    }

    /// String input that must be present
    pub fn require_input_str(&self, key: &str) -> anyhow::Result<&str> {
        self.input_str(key)
            .ok_or_else(|| anyhow!("missing required input '{}'", key))
    }

    /// Append a line to this job's log
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(job_id = %self.job.id(), "{}", message);
        if let Err(e) = self.job.append_log(message) {
            // Only reachable from work that outlived its job
            tracing::warn!(job_id = %self.job.id(), "Dropped log line: {}", e);
        }
    }

    /// Whether cancellation was requested; bodies check this at safe points
    pub fn is_cancelled(&self) -> bool {
        self.job.cancel_token().is_cancelled()
    }

    /// Token for `select!`-style waits that should stop on cancellation
    pub fn cancellation_token(&self) -> CancellationToken {
        self.job.cancel_token().clone()
    }

    /// Write `value` as pretty JSON to `<work_dir>/<file_name>`
    pub async fn emit_json(&self, file_name: &str, value: &Value) -> anyhow::Result<PathBuf> {
        let path = self.work_dir().join(plain_file_name(file_name)?);
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        self.log(format!("wrote {}", file_name));
        Ok(path)
    }

    /// Copy an external file into `<work_dir>/artifacts/`
    pub async fn emit_artifact(&self, source: &Path) -> anyhow::Result<PathBuf> {
        let file_name = source
            .file_name()
            .ok_or_else(|| anyhow!("artifact source has no file name: {}", source.display()))?;
        let dir = self.work_dir().join("artifacts");
        tokio::fs::create_dir_all(&dir).await?;
        let dest = dir.join(file_name);
        tokio::fs::copy(source, &dest)
            .await
            .with_context(|| format!("copying {}", source.display()))?;
        self.log(format!("artifact artifacts/{}", file_name.to_string_lossy()));
        Ok(dest)
    }

    /// Submit another job and wait for it, at most `timeout`
    ///
    /// The sub-job gets its own work dir. If this job is cancelled during the
    /// wait, the sub-job is cancelled too and reported as `Cancelled`.
    pub async fn run_sub_job(
        &self,
        kind: &str,
        inputs: JobInputs,
        timeout: Duration,
    ) -> anyhow::Result<SubJobOutcome> {
        let sub = self.executor.submit_sub_job(kind, inputs).await?;
        let job_id = sub.id().to_string();
        self.log(format!("started sub-job {} ({})", job_id, kind));

        let token = self.cancellation_token();
        tokio::select! {
            outcome = sub.wait_for_terminal(Some(timeout)) => Ok(match outcome {
                Some(status) => SubJobOutcome::Finished { job_id, status },
                None => SubJobOutcome::TimedOut { job_id },
            }),
            _ = token.cancelled() => {
                // Already-finished sub-jobs report a conflict here; nothing to undo
                let _ = self.executor.registry().cancel(&job_id).await;
                let status = sub
                    .wait_for_terminal(Some(Duration::from_secs(5)))
                    .await
                    .unwrap_or(JobStatus::Cancelled);
                Ok(SubJobOutcome::Finished { job_id, status })
            }
        }
    }

    pub(crate) fn executor(&self) -> &JobExecutor {
        &self.executor
    }
}

/// Reject anything but a single plain file name
fn plain_file_name(name: &str) -> anyhow::Result<&str> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => bail!("not a plain file name: {}", name),
    }
}
