//! Experiments: named job bodies resolved at startup
//!
//! An experiment is anything implementing [`Experiment`]. The host registers
//! the built-ins (`pipeline`, `emit-manifest`) plus one [`CommandExperiment`]
//! per `[[experiments]]` entry in the TOML config. External audio tools (stem
//! separation, speech-to-text, MIDI conversion) are wired in that way.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use trk_common::config::TomlConfig;
use trk_common::Error;

use crate::jobs::RunContext;

pub mod command;
pub mod manifest;
pub mod pipeline;

pub use command::CommandExperiment;
pub use manifest::EmitManifest;
pub use pipeline::Pipeline;

/// A job body: all experiments implement this
#[async_trait]
pub trait Experiment: Send + Sync {
    /// Registry key, also the job's `kind`
    fn id(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Check inputs before `run`; an error fails the job the same way
    async fn validate(&self, _ctx: &RunContext) -> Result<()> {
        Ok(())
    }

    /// Do the work, logging through `ctx`
    ///
    /// Long-running bodies should check `ctx.is_cancelled()` at safe points.
    async fn run(&self, ctx: &RunContext) -> Result<()>;
}

/// Experiment built from a closure
pub struct FnExperiment<F> {
    id: String,
    body: F,
}

#[async_trait]
impl<F, Fut> Experiment for FnExperiment<F>
where
    F: Fn(RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, ctx: &RunContext) -> Result<()> {
        (self.body)(ctx.clone()).await
    }
}

/// Wrap a closure as an experiment
pub fn from_fn<F, Fut>(id: impl Into<String>, body: F) -> Arc<dyn Experiment>
where
    F: Fn(RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnExperiment {
        id: id.into(),
        body,
    })
}

/// `{id, description}` as listed by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperimentInfo {
    pub id: String,
    pub description: String,
}

/// Lookup of experiments by id
#[derive(Default)]
pub struct ExperimentRegistry {
    experiments: BTreeMap<String, Arc<dyn Experiment>>,
}

impl ExperimentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-ins plus the command experiments from `config`
    pub fn from_config(config: &TomlConfig) -> trk_common::Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(EmitManifest))?;
        registry.register(Arc::new(Pipeline::new(Duration::from_secs(
            config.pipeline_step_timeout_secs,
        ))))?;
        for entry in &config.experiments {
            registry.register(Arc::new(CommandExperiment::new(entry.clone())))?;
        }
        Ok(registry)
    }

    /// Add an experiment; ids must be unique
    pub fn register(&mut self, experiment: Arc<dyn Experiment>) -> trk_common::Result<()> {
        let id = experiment.id().to_string();
        if id.is_empty() {
            return Err(Error::Config("experiment id must not be empty".to_string()));
        }
        if self.experiments.contains_key(&id) {
            return Err(Error::Config(format!("duplicate experiment id '{}'", id)));
        }
        tracing::debug!(experiment = %id, "Experiment registered");
        self.experiments.insert(id, experiment);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Experiment>> {
        self.experiments.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.experiments.contains_key(id)
    }

    /// Registered experiments, sorted by id
    pub fn list(&self) -> Vec<ExperimentInfo> {
        self.experiments
            .values()
            .map(|e| ExperimentInfo {
                id: e.id().to_string(),
                description: e.description().to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}
