//! External-tool experiments
//!
//! Launches a configured program, streams its stdout and stderr line by line
//! into the job log and fails the job on a non-zero exit. Arguments may hold
//! `{name}` placeholders filled from the job inputs, plus `{work_dir}` and
//! `{job_id}`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use trk_common::config::CommandExperimentConfig;

use super::Experiment;
use crate::jobs::RunContext;

pub struct CommandExperiment {
    config: CommandExperimentConfig,
    description: String,
}

impl CommandExperiment {
    pub fn new(config: CommandExperimentConfig) -> Self {
        let description = config
            .description
            .clone()
            .unwrap_or_else(|| format!("Runs {}", config.program));
        Self {
            config,
            description,
        }
    }

    fn build_command(&self, ctx: &RunContext) -> Command {
        let mut cmd = Command::new(render(&self.config.program, ctx));
        cmd.args(self.config.args.iter().map(|arg| render(arg, ctx)));
        cmd.current_dir(
            self.config
                .working_dir
                .clone()
                .unwrap_or_else(|| ctx.work_dir().to_path_buf()),
        );
        cmd.envs(&self.config.env);
        cmd.env("TRK_JOB_ID", ctx.job_id());
        cmd.env("TRK_WORK_DIR", ctx.work_dir());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Experiment for CommandExperiment {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn validate(&self, ctx: &RunContext) -> Result<()> {
        let missing: Vec<&str> = self
            .config
            .required_inputs
            .iter()
            .filter(|key| ctx.input(key).map_or(true, Value::is_null))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            bail!("missing required inputs: {}", missing.join(", "));
        }
        Ok(())
    }

    async fn run(&self, ctx: &RunContext) -> Result<()> {
        let mut cmd = self.build_command(ctx);
        ctx.log(format!("$ {}", self.config.program));

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to launch {}", self.config.program))?;
        let stdout = child.stdout.take().context("child stdout not captured")?;
        let stderr = child.stderr.take().context("child stderr not captured")?;
        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let (mut out_done, mut err_done) = (false, false);
        let token = ctx.cancellation_token();

        while !(out_done && err_done) {
            tokio::select! {
                line = out_lines.next_line(), if !out_done => match line? {
                    Some(line) => ctx.log(line),
                    None => out_done = true,
                },
                line = err_lines.next_line(), if !err_done => match line? {
                    Some(line) => ctx.log(line),
                    None => err_done = true,
                },
                _ = token.cancelled() => {
                    child.kill().await?;
                    bail!("{} killed after cancellation", self.config.program);
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            bail!("{} exited with {}", self.config.program, status);
        }
        Ok(())
    }
}

/// Replace `{name}` placeholders; unknown names are left untouched
fn render(template: &str, ctx: &RunContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match lookup(key, ctx) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn lookup(key: &str, ctx: &RunContext) -> Option<String> {
    match key {
        "work_dir" => Some(ctx.work_dir().display().to_string()),
        "job_id" => Some(ctx.job_id().to_string()),
        _ => match ctx.input(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        },
    }
}
