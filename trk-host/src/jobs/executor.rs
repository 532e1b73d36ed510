//! Job executor
//!
//! Runs job bodies on spawned tokio tasks and drives the job state machine:
//!
//! ```text
//! Pending ──permit──▶ Running ──ok──────▶ Completed
//!    │                   ├──error/panic─▶ Failed
//!    └──cancel──▶ Cancelled ◀──cancel─┘
//! ```
//!
//! Failures never reach the submitter: they end up in the job's own log as
//! an `ERROR: ...` line followed by the `status=Failed` marker.

use std::any::Any;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};
use trk_common::events::JobStatus;
use trk_common::{Error, Result};

use super::context::RunContext;
use super::registry::{Job, JobRegistry};
use crate::experiments::{Experiment, ExperimentRegistry};
use crate::models::JobInputs;

/// Whether a job counts against `max_concurrent`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Limited,
    /// Sub-job of a job that already holds a permit
    Nested,
}

/// Schedules job bodies, at most `max_concurrent` at a time
#[derive(Clone)]
pub struct JobExecutor {
    registry: JobRegistry,
    experiments: Arc<ExperimentRegistry>,
    permits: Arc<Semaphore>,
}

impl JobExecutor {
    pub fn new(
        registry: JobRegistry,
        experiments: Arc<ExperimentRegistry>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            registry,
            experiments,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn experiments(&self) -> &ExperimentRegistry {
        &self.experiments
    }

    /// Submit a job for a registered experiment and start it
    ///
    /// Unknown kinds are rejected before anything is allocated.
    pub async fn submit(&self, kind: &str, inputs: JobInputs) -> Result<Arc<Job>> {
        self.submit_with(kind, inputs, Admission::Limited).await
    }

    /// Submit a sub-job on behalf of a running job
    ///
    /// The parent already holds a permit for as long as it waits, so the
    /// sub-job starts at once instead of queueing behind its own parent.
    pub(crate) async fn submit_sub_job(&self, kind: &str, inputs: JobInputs) -> Result<Arc<Job>> {
        self.submit_with(kind, inputs, Admission::Nested).await
    }

    async fn submit_with(
        &self,
        kind: &str,
        inputs: JobInputs,
        admission: Admission,
    ) -> Result<Arc<Job>> {
        let experiment = self
            .experiments
            .get(kind)
            .ok_or_else(|| Error::InvalidInput(format!("unknown experiment '{}'", kind)))?;

        let job = self.registry.submit(kind, inputs).await?;
        self.spawn(Arc::clone(&job), experiment, admission);
        Ok(job)
    }

    /// Run `body` for `job` in the background
    ///
    /// Returns as soon as the task is spawned. The job stays `Pending` until a
    /// concurrency permit is available.
    pub fn start(&self, job: Arc<Job>, body: Arc<dyn Experiment>) -> JoinHandle<()> {
        self.spawn(job, body, Admission::Limited)
    }

    fn spawn(
        &self,
        job: Arc<Job>,
        body: Arc<dyn Experiment>,
        admission: Admission,
    ) -> JoinHandle<()> {
        let executor = self.clone();
        tokio::spawn(async move {
            let _permit = match admission {
                Admission::Nested => None,
                Admission::Limited => match Arc::clone(&executor.permits).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(e) => {
                        error!(job_id = %job.id(), "Executor closed: {}", e);
                        let _ = job.append_log(format!("ERROR: executor closed: {}", e));
                        job.transition(JobStatus::Running);
                        job.transition(JobStatus::Failed);
                        return;
                    }
                },
            };

            if !job.transition(JobStatus::Running) {
                info!(job_id = %job.id(), status = %job.status(), "Job left Pending before it started");
                return;
            }
            info!(job_id = %job.id(), kind = %job.kind(), "Job started");

            let ctx = RunContext::new(Arc::clone(&job), executor.clone());
            // Own task so a panicking body only takes down itself
            let body_task = tokio::spawn(async move {
                body.validate(&ctx).await?;
                body.run(&ctx).await
            });

            let outcome = body_task.await;
            finish(&job, outcome);
        })
    }
}

/// Map the body's outcome onto a terminal status
fn finish(job: &Job, outcome: std::result::Result<anyhow::Result<()>, JoinError>) {
    let cancelled = job.cancel_token().is_cancelled();

    let status = match outcome {
        Ok(Ok(())) if cancelled => JobStatus::Cancelled,
        Ok(Ok(())) => JobStatus::Completed,
        Ok(Err(e)) if cancelled => {
            let _ = job.append_log(format!("cancelled: {:#}", e));
            JobStatus::Cancelled
        }
        Ok(Err(e)) => {
            error!(job_id = %job.id(), "Job failed: {:#}", e);
            let _ = job.append_log(format!("ERROR: {:#}", e));
            JobStatus::Failed
        }
        Err(join_error) => {
            let message = if join_error.is_panic() {
                format!("panic: {}", panic_message(join_error.into_panic()))
            } else {
                "body task aborted".to_string()
            };
            error!(job_id = %job.id(), "Job body crashed: {}", message);
            let _ = job.append_log(format!("ERROR: {}", message));
            JobStatus::Failed
        }
    };

    if job.transition(status) {
        info!(job_id = %job.id(), status = %status, "Job finished");
    } else {
        warn!(job_id = %job.id(), status = %job.status(), "Job was already terminal");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiments::from_fn;
    use crate::jobs::stream;
    use std::time::Duration;
    use tempfile::TempDir;
    use trk_common::events::EventBus;

    fn executor(temp: &TempDir, max_concurrent: usize) -> JobExecutor {
        let registry = JobRegistry::new(temp.path().join("runs"), EventBus::new(64));
        JobExecutor::new(registry, Arc::new(ExperimentRegistry::new()), max_concurrent)
    }

    #[tokio::test]
    async fn test_successful_body_completes() {
        let temp = TempDir::new().unwrap();
        let executor = executor(&temp, 2);
        let job = executor.registry().submit("inline", JobInputs::new()).await.unwrap();

        let body = from_fn("inline", |ctx: RunContext| async move {
            ctx.log("hello");
            Ok(())
        });
        executor.start(Arc::clone(&job), body).await.unwrap();

        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.log_lines(), vec!["hello", "status=Completed"]);
    }

    #[tokio::test]
    async fn test_panicking_body_fails_job_only() {
        let temp = TempDir::new().unwrap();
        let executor = executor(&temp, 2);
        let job = executor.registry().submit("inline", JobInputs::new()).await.unwrap();

        let body = from_fn("inline", |_ctx: RunContext| async move {
            if true {
                panic!("kaboom");
            }
            Ok(())
        });
        executor.start(Arc::clone(&job), body).await.unwrap();

        assert_eq!(job.status(), JobStatus::Failed);
        let lines = job.log_lines();
        assert_eq!(lines[0], "ERROR: panic: kaboom");
        assert_eq!(lines[1], "status=Failed");
    }

    #[tokio::test]
    async fn test_unknown_kind_is_rejected_without_allocation() {
        let temp = TempDir::new().unwrap();
        let executor = executor(&temp, 1);

        let err = executor.submit("nope", JobInputs::new()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(executor.registry().list().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_limit_keeps_jobs_pending() {
        let temp = TempDir::new().unwrap();
        let executor = executor(&temp, 1);
        let gate = Arc::new(tokio::sync::Notify::new());

        let blocking = {
            let gate = Arc::clone(&gate);
            from_fn("block", move |_ctx: RunContext| {
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    Ok(())
                }
            })
        };
        let first = executor.registry().submit("block", JobInputs::new()).await.unwrap();
        let second = executor.registry().submit("block", JobInputs::new()).await.unwrap();
        executor.start(Arc::clone(&first), Arc::clone(&blocking));
        executor.start(Arc::clone(&second), blocking);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let statuses = [first.status(), second.status()];
        assert_eq!(statuses.iter().filter(|s| **s == JobStatus::Running).count(), 1);
        assert_eq!(statuses.iter().filter(|s| **s == JobStatus::Pending).count(), 1);

        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        for job in [first, second] {
            assert_eq!(
                job.wait_for_terminal(Some(Duration::from_secs(5))).await,
                Some(JobStatus::Completed)
            );
        }
    }

    #[tokio::test]
    async fn test_cooperative_cancel_of_running_job() {
        let temp = TempDir::new().unwrap();
        let executor = executor(&temp, 1);
        let job = executor.registry().submit("loop", JobInputs::new()).await.unwrap();

        let body = from_fn("loop", |ctx: RunContext| async move {
            ctx.log("waiting");
            ctx.cancellation_token().cancelled().await;
            ctx.log("stopping");
            Ok(())
        });
        let handle = executor.start(Arc::clone(&job), body);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            executor.registry().cancel(job.id()).await.unwrap(),
            JobStatus::Running
        );
        handle.await.unwrap();

        assert_eq!(job.status(), JobStatus::Cancelled);
        assert_eq!(
            stream::collect(job).await,
            vec!["waiting", "stopping", "status=Cancelled"]
        );
    }
}
