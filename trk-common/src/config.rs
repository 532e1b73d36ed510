//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`TRK_ROOT_FOLDER`)
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unparsable TOML file never stops startup: a warning is logged
//! and compiled defaults are used instead.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "TRK_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "trk.db";

/// Directory (inside the root folder) holding one work dir per job
pub const RUNS_DIR: &str = "runs";

/// Default HTTP port for the host
pub const DEFAULT_PORT: u16 = 8000;

/// Logging section of the TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. "info" or "trk_host=debug"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// An external tool exposed as a named experiment
///
/// Arguments may contain `{name}` placeholders that are replaced by the job's
/// input of the same name, and `{work_dir}` which is replaced by the job's
/// working directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandExperimentConfig {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Process working directory; defaults to the job's work dir
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Inputs that must be present before the tool is launched
    #[serde(default)]
    pub required_inputs: Vec<String>,
}

/// Contents of `trk-host.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Upper bound on job bodies running at the same time
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Bounded wait applied by the pipeline experiment to each sub-job
    #[serde(default = "default_pipeline_step_timeout_secs")]
    pub pipeline_step_timeout_secs: u64,
    #[serde(default)]
    pub experiments: Vec<CommandExperimentConfig>,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_pipeline_step_timeout_secs() -> u64 {
    600
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            bind_address: default_bind_address(),
            port: default_port(),
            logging: LoggingConfig::default(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            pipeline_step_timeout_secs: default_pipeline_step_timeout_secs(),
            experiments: Vec::new(),
        }
    }
}

/// Default location of the TOML file for a module (`~/.config/trk/<module>.toml`)
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("trk").join(format!("{}.toml", module_name)))
}

/// Load TOML config with graceful degradation
///
/// Missing file or parse errors log a warning and yield defaults.
pub fn load_toml_config(path: &Path) -> TomlConfig {
    if !path.exists() {
        warn!(
            "Config file not found at {}, using compiled defaults",
            path.display()
        );
        return TomlConfig::default();
    }

    match read_toml_config(path) {
        Ok(config) => {
            info!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("{} - using compiled defaults", e);
            TomlConfig::default()
        }
    }
}

/// Read and parse a TOML config file, surfacing errors
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Write TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolves the root folder following the priority order in the module docs
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(cli_arg: Option<PathBuf>, toml_config: &TomlConfig) -> Self {
        Self {
            cli_arg,
            toml_root: toml_config.root_folder.clone(),
        }
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("Root folder from command line: {}", path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!("Root folder from {}: {}", ROOT_FOLDER_ENV, path);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            info!("Root folder from TOML config: {}", path.display());
            return path.clone();
        }

        let path = default_root_folder();
        info!("Root folder from compiled default: {}", path.display());
        path
    }
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("trk"))
        .unwrap_or_else(|| PathBuf::from("./trk_data"))
}

/// Creates the root folder layout on first start
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder and its `runs/` directory if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder).map_err(|e| {
            Error::Resource(format!(
                "Failed to create root folder {}: {}",
                self.root_folder.display(),
                e
            ))
        })?;
        std::fs::create_dir_all(self.runs_path()).map_err(|e| {
            Error::Resource(format!(
                "Failed to create runs folder {}: {}",
                self.runs_path().display(),
                e
            ))
        })?;
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    pub fn runs_path(&self) -> PathBuf {
        self.root_folder.join(RUNS_DIR)
    }
}
