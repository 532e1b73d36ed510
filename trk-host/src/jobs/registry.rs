//! Job registry
//!
//! Owns the id → [`Job`] table. The registry is created once at startup and
//! handed to whoever needs it through [`crate::AppState`]; there is no
//! process-global job table.
//!
//! Each [`Job`] carries its own status (a `watch` channel, so waiters can
//! block on the terminal state), an append-only log, and a cancellation token
//! the body checks cooperatively.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trk_common::events::{EventBus, JobStatus, TrkEvent};
use trk_common::{Error, Result};

use crate::models::{JobId, JobInputs, JobSummary};

/// Attempts at finding an unused work dir name before giving up
const MAX_ID_ATTEMPTS: usize = 8;

#[derive(Debug, Default)]
struct JobState {
    log: Vec<String>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

/// A tracked unit of background work
#[derive(Debug)]
pub struct Job {
    id: JobId,
    kind: String,
    inputs: JobInputs,
    work_dir: PathBuf,
    created_at: DateTime<Utc>,
    state: Mutex<JobState>,
    status_tx: watch::Sender<JobStatus>,
    /// Number of log lines; bumped on every append so stream consumers wake up
    log_tx: watch::Sender<usize>,
    cancel_token: CancellationToken,
    event_bus: EventBus,
}

impl Job {
    fn new(
        id: JobId,
        kind: String,
        inputs: JobInputs,
        work_dir: PathBuf,
        event_bus: EventBus,
    ) -> Self {
        let (status_tx, _) = watch::channel(JobStatus::Pending);
        let (log_tx, _) = watch::channel(0);
        Self {
            id,
            kind,
            inputs,
            work_dir,
            created_at: Utc::now(),
            state: Mutex::new(JobState::default()),
            status_tx,
            log_tx,
            cancel_token: CancellationToken::new(),
            event_bus,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, JobState> {
        // A panicking body never holds this lock, but stay usable regardless
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn inputs(&self) -> &JobInputs {
        &self.inputs
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> JobStatus {
        *self.status_tx.borrow()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Append one line to the log and wake stream consumers
    ///
    /// Fails with `Conflict` once the job is terminal: the status marker is
    /// always the last line of a finished job's log.
    pub fn append_log(&self, line: impl Into<String>) -> Result<()> {
        let mut state = self.lock_state();
        if self.status().is_terminal() {
            return Err(Error::Conflict(format!(
                "job {} already finished, log is closed",
                self.id
            )));
        }
        state.log.push(line.into());
        self.log_tx.send_replace(state.log.len());
        Ok(())
    }

    /// Copy of the log lines emitted so far
    pub fn log_lines(&self) -> Vec<String> {
        self.lock_state().log.clone()
    }

    /// Lines from `cursor` on, plus whether the log is closed
    ///
    /// Status and lines are read under the same lock the terminal transition
    /// takes, so a closed log always includes its marker line.
    pub(crate) fn read_log_from(&self, cursor: usize) -> (Vec<String>, bool) {
        let state = self.lock_state();
        let lines = state.log.get(cursor..).map(<[String]>::to_vec).unwrap_or_default();
        (lines, self.status().is_terminal())
    }

    pub(crate) fn subscribe_log(&self) -> watch::Receiver<usize> {
        self.log_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<JobStatus> {
        self.status_tx.subscribe()
    }

    /// Move the job forward in its state machine
    ///
    /// Returns `false` (and changes nothing) if the move is not a strictly
    /// forward step. Reaching a terminal state appends the `status=<Status>`
    /// marker in the same critical section, so the completion signal fires
    /// exactly once and the marker is the final log line.
    pub(crate) fn transition(&self, next: JobStatus) -> bool {
        self.transition_if(next, |_| true)
    }

    /// Like [`Job::transition`], but only out of `from`
    ///
    /// The status check and the move are one atomic step, so a job that
    /// started meanwhile is left alone.
    pub(crate) fn transition_from(&self, from: JobStatus, next: JobStatus) -> bool {
        self.transition_if(next, |current| current == from)
    }

    fn transition_if(&self, next: JobStatus, allowed: impl Fn(JobStatus) -> bool) -> bool {
        let mut state = self.lock_state();
        let mut old = next;
        let changed = self.status_tx.send_if_modified(|current| {
            if allowed(*current) && current.can_transition_to(next) {
                old = *current;
                *current = next;
                true
            } else {
                false
            }
        });
        if !changed {
            return false;
        }

        let now = Utc::now();
        if next == JobStatus::Running {
            state.started_at = Some(now);
        }
        if next.is_terminal() {
            state.ended_at = Some(now);
            state.log.push(next.marker_line());
            self.log_tx.send_replace(state.log.len());
        }
        drop(state);

        debug!(job_id = %self.id, from = %old, to = %next, "Job status changed");
        self.event_bus.emit_lossy(TrkEvent::JobStatusChanged {
            job_id: self.id.clone(),
            old_status: old,
            new_status: next,
            timestamp: now,
        });
        true
    }

    /// Wait until the job is terminal, or until `timeout` elapses
    ///
    /// Returns `None` on timeout. The job itself is unaffected by the timeout.
    pub async fn wait_for_terminal(&self, timeout: Option<Duration>) -> Option<JobStatus> {
        let mut rx = self.status_tx.subscribe();
        let wait = async move {
            rx.wait_for(|status| status.is_terminal())
                .await
                .map(|status| *status)
                .ok()
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.ok().flatten(),
            None => wait.await,
        }
    }

    pub fn summary(&self) -> JobSummary {
        let state = self.lock_state();
        JobSummary {
            job_id: self.id.clone(),
            kind: self.kind.clone(),
            status: self.status(),
            inputs: self.inputs.clone(),
            log_lines: state.log.len(),
            created_at: self.created_at,
            started_at: state.started_at,
            ended_at: state.ended_at,
        }
    }
}

/// In-memory table of job records
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, Arc<Job>>>>,
    runs_dir: PathBuf,
    event_bus: EventBus,
}

impl JobRegistry {
    /// Registry whose jobs get work dirs under `runs_dir`
    pub fn new(runs_dir: PathBuf, event_bus: EventBus) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            runs_dir,
            event_bus,
        }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Allocate a job record and its working directory
    ///
    /// Returns immediately with the job in `Pending`. The only failure is the
    /// work dir allocation, reported as `Error::Resource`.
    pub async fn submit(&self, kind: impl Into<String>, inputs: JobInputs) -> Result<Arc<Job>> {
        let kind = kind.into();

        tokio::fs::create_dir_all(&self.runs_dir).await.map_err(|e| {
            Error::Resource(format!(
                "cannot create runs folder {}: {}",
                self.runs_dir.display(),
                e
            ))
        })?;

        let (id, work_dir) = self.allocate_work_dir().await?;
        let job = Arc::new(Job::new(
            id.clone(),
            kind.clone(),
            inputs,
            work_dir,
            self.event_bus.clone(),
        ));

        self.jobs.write().await.insert(id.clone(), Arc::clone(&job));

        info!(job_id = %id, kind = %kind, work_dir = %job.work_dir().display(), "Job submitted");
        self.event_bus.emit_lossy(TrkEvent::JobSubmitted {
            job_id: id,
            kind,
            timestamp: job.created_at(),
        });

        Ok(job)
    }

    /// Create a fresh, never-before-used directory for a new id
    ///
    /// `create_dir` (not `create_dir_all`) fails on an existing path, so a
    /// colliding id can never share another job's directory.
    async fn allocate_work_dir(&self) -> Result<(JobId, PathBuf)> {
        let mut last_error = None;
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = trk_common::uuid_utils::short_id();
            let work_dir = self.runs_dir.join(&id);
            match tokio::fs::create_dir(&work_dir).await {
                Ok(()) => return Ok((id, work_dir)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    warn!(job_id = %id, "Work dir already exists, drawing a new id");
                    last_error = Some(e);
                }
                Err(e) => {
                    return Err(Error::Resource(format!(
                        "cannot create work dir {}: {}",
                        work_dir.display(),
                        e
                    )))
                }
            }
        }
        Err(Error::Resource(format!(
            "no free work dir after {} attempts: {:?}",
            MAX_ID_ATTEMPTS, last_error
        )))
    }

    pub async fn get(&self, job_id: &str) -> Result<Arc<Job>> {
        if !trk_common::uuid_utils::is_short_id(job_id) {
            return Err(Error::not_found("job", job_id));
        }
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| Error::not_found("job", job_id))
    }

    pub async fn append_log(&self, job_id: &str, line: impl Into<String>) -> Result<()> {
        self.get(job_id).await?.append_log(line)
    }

    /// Summaries of every known job, newest first
    pub async fn list(&self) -> Vec<JobSummary> {
        let mut summaries: Vec<JobSummary> =
            self.jobs.read().await.values().map(|job| job.summary()).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// Request cancellation
    ///
    /// A `Pending` job is cancelled on the spot. A `Running` job has its
    /// token tripped and ends `Cancelled` once its body notices and returns.
    /// Finished jobs cannot be cancelled.
    pub async fn cancel(&self, job_id: &str) -> Result<JobStatus> {
        let job = self.get(job_id).await?;
        job.cancel_token().cancel();

        if job.transition_from(JobStatus::Pending, JobStatus::Cancelled) {
            info!(job_id = %job_id, "Pending job cancelled");
            return Ok(JobStatus::Cancelled);
        }

        let status = job.status();
        if status.is_terminal() {
            return Err(Error::Conflict(format!(
                "job {} already finished with status {}",
                job_id, status
            )));
        }

        info!(job_id = %job_id, "Cancellation requested for running job");
        Ok(status)
    }

    /// Bounded wait for another job to finish; `None` on timeout
    pub async fn wait_for_terminal(
        &self,
        job_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<JobStatus>> {
        let job = self.get(job_id).await?;
        Ok(job.wait_for_terminal(timeout).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(temp: &TempDir) -> JobRegistry {
        JobRegistry::new(temp.path().join("runs"), EventBus::new(16))
    }

    #[tokio::test]
    async fn test_submit_creates_pending_job_with_work_dir() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);

        let job = registry.submit("noop", JobInputs::new()).await.unwrap();

        assert_eq!(job.status(), JobStatus::Pending);
        assert!(job.work_dir().is_dir());
        assert!(job.work_dir().starts_with(registry.runs_dir()));
        assert_eq!(registry.get(job.id()).await.unwrap().id(), job.id());
    }

    #[tokio::test]
    async fn test_get_unknown_job_is_not_found() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        assert!(matches!(
            registry.get("000000000000").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_reports_resource_error() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let registry = JobRegistry::new(blocker.join("runs"), EventBus::new(4));

        let err = registry.submit("noop", JobInputs::new()).await.unwrap_err();
        assert!(matches!(err, Error::Resource(_)));
    }

    #[tokio::test]
    async fn test_transitions_are_monotonic() {
        let temp = TempDir::new().unwrap();
        let job = registry(&temp).submit("noop", JobInputs::new()).await.unwrap();

        assert!(job.transition(JobStatus::Running));
        assert!(!job.transition(JobStatus::Pending));
        assert!(job.transition(JobStatus::Completed));
        assert!(!job.transition(JobStatus::Failed));
        assert!(!job.transition(JobStatus::Running));
        assert_eq!(job.status(), JobStatus::Completed);

        let summary = job.summary();
        assert!(summary.started_at.is_some());
        assert!(summary.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_marker_is_last_line_and_log_closes() {
        let temp = TempDir::new().unwrap();
        let job = registry(&temp).submit("noop", JobInputs::new()).await.unwrap();

        job.append_log("one").unwrap();
        job.transition(JobStatus::Running);
        job.append_log("two").unwrap();
        job.transition(JobStatus::Failed);

        assert!(matches!(job.append_log("late"), Err(Error::Conflict(_))));
        assert_eq!(job.log_lines(), vec!["one", "two", "status=Failed"]);
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let job = registry.submit("noop", JobInputs::new()).await.unwrap();

        assert_eq!(registry.cancel(job.id()).await.unwrap(), JobStatus::Cancelled);
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert!(job.cancel_token().is_cancelled());
        assert!(matches!(
            registry.cancel(job.id()).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_running_job_only_trips_token() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let job = registry.submit("noop", JobInputs::new()).await.unwrap();
        job.transition(JobStatus::Running);

        assert_eq!(registry.cancel(job.id()).await.unwrap(), JobStatus::Running);
        assert!(job.cancel_token().is_cancelled());
        assert_eq!(job.status(), JobStatus::Running);

        // The body may still log while it winds down
        job.append_log("cleaning up").unwrap();
        assert!(job.transition(JobStatus::Cancelled));
        assert_eq!(job.log_lines(), vec!["cleaning up", "status=Cancelled"]);
    }

    #[tokio::test]
    async fn test_transition_from_requires_current_status() {
        let temp = TempDir::new().unwrap();
        let job = registry(&temp).submit("noop", JobInputs::new()).await.unwrap();

        assert!(job.transition(JobStatus::Running));
        assert!(!job.transition_from(JobStatus::Pending, JobStatus::Cancelled));
        assert_eq!(job.status(), JobStatus::Running);
        assert!(job.log_lines().is_empty());
    }

    #[tokio::test]
    async fn test_job_debug_output_names_job() {
        let temp = TempDir::new().unwrap();
        let job = registry(&temp).submit("noop", JobInputs::new()).await.unwrap();
        let rendered = format!("{:?}", job);
        assert!(rendered.contains(job.id()));
        assert!(rendered.contains("noop"));
    }

    #[tokio::test]
    async fn test_wait_for_terminal_times_out_without_side_effects() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let job = registry.submit("noop", JobInputs::new()).await.unwrap();

        let outcome = registry
            .wait_for_terminal(job.id(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(outcome, None);
        assert_eq!(job.status(), JobStatus::Pending);

        let waiter = {
            let job = Arc::clone(&job);
            tokio::spawn(async move { job.wait_for_terminal(None).await })
        };
        job.transition(JobStatus::Running);
        job.transition(JobStatus::Completed);
        assert_eq!(waiter.await.unwrap(), Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let first = registry.submit("a", JobInputs::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = registry.submit("b", JobInputs::new()).await.unwrap();

        let ids: Vec<String> = registry.list().await.into_iter().map(|s| s.job_id).collect();
        assert_eq!(ids, vec![second.id().to_string(), first.id().to_string()]);
    }

    #[tokio::test]
    async fn test_status_events_are_broadcast() {
        let temp = TempDir::new().unwrap();
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let registry = JobRegistry::new(temp.path().join("runs"), bus);

        let job = registry.submit("noop", JobInputs::new()).await.unwrap();
        job.transition(JobStatus::Running);

        assert_eq!(rx.recv().await.unwrap().event_type(), "JobSubmitted");
        match rx.recv().await.unwrap() {
            TrkEvent::JobStatusChanged { old_status, new_status, .. } => {
                assert_eq!(old_status, JobStatus::Pending);
                assert_eq!(new_status, JobStatus::Running);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
