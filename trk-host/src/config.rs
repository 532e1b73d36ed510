//! Command line and config file handling for trk-host
//!
//! Settings come from the command line first, then the TOML file
//! (`~/.config/trk/trk-host.toml` unless `--config` names another), then
//! compiled defaults. The root folder additionally honours `TRK_ROOT_FOLDER`.

use clap::Parser;
use std::path::PathBuf;
use trk_common::config::{
    default_config_path, read_toml_config, RootFolderResolver, TomlConfig,
};
use trk_common::{Error, Result};

/// Module name used for the config file name and in logs
pub const MODULE_NAME: &str = "trk-host";

/// Command-line arguments for trk-host
#[derive(Parser, Debug, Default)]
#[command(name = "trk-host")]
#[command(about = "Local creative-production host: background jobs and palette documents")]
#[command(version)]
pub struct Args {
    /// Root folder holding trk.db and the job runs/ directory
    #[arg(short, long)]
    pub root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "TRK_PORT")]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    pub bind_address: Option<String>,
}

/// Loaded TOML plus what went wrong loading it
///
/// Loading happens before logging is set up, so problems are kept here and
/// reported by the caller once tracing is initialized.
#[derive(Debug)]
pub struct LoadedConfig {
    pub toml: TomlConfig,
    pub source: Option<PathBuf>,
    pub problem: Option<String>,
}

impl LoadedConfig {
    /// Read the config file named on the command line, or the default one
    ///
    /// An explicitly named file must exist and parse. The default file is
    /// optional; its absence or breakage falls back to defaults.
    pub fn load(args: &Args) -> Result<Self> {
        if let Some(path) = &args.config {
            let toml = read_toml_config(path)?;
            return Ok(Self {
                toml,
                source: Some(path.clone()),
                problem: None,
            });
        }

        let Some(path) = default_config_path(MODULE_NAME) else {
            return Ok(Self {
                toml: TomlConfig::default(),
                source: None,
                problem: Some("no config directory on this platform, using defaults".to_string()),
            });
        };

        if !path.exists() {
            return Ok(Self {
                toml: TomlConfig::default(),
                source: None,
                problem: Some(format!(
                    "config file not found at {}, using defaults",
                    path.display()
                )),
            });
        }

        match read_toml_config(&path) {
            Ok(toml) => Ok(Self {
                toml,
                source: Some(path),
                problem: None,
            }),
            Err(e) => Ok(Self {
                toml: TomlConfig::default(),
                source: None,
                problem: Some(format!("{} - using defaults", e)),
            }),
        }
    }
}

/// Effective settings after merging command line, env and TOML
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub root_folder: PathBuf,
    pub bind_address: String,
    pub port: u16,
    pub log_level: String,
    pub toml: TomlConfig,
}

impl HostConfig {
    pub fn resolve(args: &Args, toml: TomlConfig) -> Result<Self> {
        if toml.max_concurrent_jobs == 0 {
            return Err(Error::Config(
                "max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if toml.pipeline_step_timeout_secs == 0 {
            return Err(Error::Config(
                "pipeline_step_timeout_secs must be at least 1".to_string(),
            ));
        }

        let root_folder = RootFolderResolver::new(args.root_folder.clone(), &toml).resolve();
        Ok(Self {
            root_folder,
            bind_address: args
                .bind_address
                .clone()
                .unwrap_or_else(|| toml.bind_address.clone()),
            port: args.port.unwrap_or(toml.port),
            log_level: toml.logging.level.clone(),
            toml,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
