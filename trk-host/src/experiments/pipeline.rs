//! `pipeline`: runs a list of experiments as sub-jobs, one after another
//!
//! Inputs: `{"steps": [{"op": "<experiment id>", "in": {...}}, ...]}` and an
//! optional `step_timeout_secs` overriding the configured wait per step.
//!
//! Each step waits for its sub-job for a bounded time. A step that outlives
//! the wait does not fail the pipeline: a warning is logged and the next step
//! starts without that step's output. A failed step fails the pipeline.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use trk_common::events::JobStatus;

use super::Experiment;
use crate::jobs::{RunContext, SubJobOutcome};
use crate::models::JobInputs;

pub const PIPELINE_ID: &str = "pipeline";

#[derive(Debug, Clone, Deserialize)]
struct Step {
    op: String,
    #[serde(default, rename = "in")]
    inputs: JobInputs,
}

pub struct Pipeline {
    step_timeout: Duration,
}

impl Pipeline {
    pub fn new(step_timeout: Duration) -> Self {
        Self { step_timeout }
    }

    fn steps(ctx: &RunContext) -> Result<Vec<Step>> {
        let raw = ctx
            .input("steps")
            .cloned()
            .ok_or_else(|| anyhow!("missing required input 'steps'"))?;
        let steps: Vec<Step> =
            serde_json::from_value(raw).map_err(|e| anyhow!("invalid steps: {}", e))?;
        Ok(steps)
    }

    fn step_timeout(&self, ctx: &RunContext) -> Result<Duration> {
        match ctx.input("step_timeout_secs") {
            None | Some(Value::Null) => Ok(self.step_timeout),
            Some(value) => value
                .as_f64()
                .filter(|secs| *secs > 0.0)
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| anyhow!("step_timeout_secs must be a positive number")),
        }
    }
}

#[async_trait]
impl Experiment for Pipeline {
    fn id(&self) -> &str {
        PIPELINE_ID
    }

    fn description(&self) -> &str {
        "Run experiments in sequence as sub-jobs"
    }

    async fn validate(&self, ctx: &RunContext) -> Result<()> {
        let steps = Self::steps(ctx)?;
        if steps.is_empty() {
            bail!("pipeline needs at least one step");
        }
        for (i, step) in steps.iter().enumerate() {
            if step.op == PIPELINE_ID {
                bail!("step {} cannot be a nested pipeline", i + 1);
            }
            if !ctx.executor().experiments().contains(&step.op) {
                bail!("step {} uses unknown experiment '{}'", i + 1, step.op);
            }
        }
        self.step_timeout(ctx)?;
        Ok(())
    }

    async fn run(&self, ctx: &RunContext) -> Result<()> {
        let steps = Self::steps(ctx)?;
        let timeout = self.step_timeout(ctx)?;
        let total = steps.len();

        for (i, step) in steps.into_iter().enumerate() {
            if ctx.is_cancelled() {
                ctx.log(format!("cancelled before step {}/{}", i + 1, total));
                return Ok(());
            }

            ctx.log(format!("step {}/{}: {}", i + 1, total, step.op));
            match ctx.run_sub_job(&step.op, step.inputs, timeout).await? {
                SubJobOutcome::Finished { status: JobStatus::Completed, job_id } => {
                    ctx.log(format!("step {}/{} completed (job {})", i + 1, total, job_id));
                }
                SubJobOutcome::Finished { status: JobStatus::Cancelled, job_id }
                    if ctx.is_cancelled() =>
                {
                    ctx.log(format!("step {}/{} cancelled (job {})", i + 1, total, job_id));
                    return Ok(());
                }
                SubJobOutcome::Finished { status, job_id } => {
                    bail!("step {} ({}) ended {} (job {})", i + 1, step.op, status, job_id);
                }
                SubJobOutcome::TimedOut { job_id } => {
                    tracing::warn!(
                        job_id = %ctx.job_id(),
                        sub_job_id = %job_id,
                        "Pipeline step timed out, continuing"
                    );
                    ctx.log(format!(
                        "WARNING: step {}/{} ({}) still running after {:.1}s; continuing without its output (job {})",
                        i + 1,
                        total,
                        step.op,
                        timeout.as_secs_f64(),
                        job_id
                    ));
                }
            }
        }

        ctx.log(format!("pipeline finished {} steps", total));
        Ok(())
    }
}
