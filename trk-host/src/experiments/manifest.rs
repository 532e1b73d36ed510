//! `emit-manifest`: writes `metadata.json` describing the job

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::Experiment;
use crate::jobs::RunContext;

pub const MANIFEST_FILE: &str = "metadata.json";

pub struct EmitManifest;

#[async_trait]
impl Experiment for EmitManifest {
    fn id(&self) -> &str {
        "emit-manifest"
    }

    fn description(&self) -> &str {
        "Write metadata.json with the job inputs"
    }

    async fn run(&self, ctx: &RunContext) -> Result<()> {
        ctx.log("collecting metadata");
        let manifest = json!({
            "jobId": ctx.job_id(),
            "inputs": ctx.inputs(),
            "createdAt": trk_common::time::to_rfc3339_micros(trk_common::time::now()),
        });
        ctx.emit_json(MANIFEST_FILE, &manifest).await?;
        Ok(())
    }
}
