//! Configuration resolution and graceful degradation tests
//!
//! Tests that touch `TRK_ROOT_FOLDER` are marked `#[serial]` so they do not
//! race each other on the process environment.

use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;
use trk_common::config::{
    load_toml_config, read_toml_config, write_toml_config, CommandExperimentConfig,
    RootFolderInitializer, RootFolderResolver, TomlConfig, DEFAULT_PORT, ROOT_FOLDER_ENV,
};

#[test]
#[serial]
fn test_cli_argument_has_highest_priority() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/trk-from-env");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/trk-from-toml")),
        ..TomlConfig::default()
    };

    let resolver = RootFolderResolver::new(Some(PathBuf::from("/tmp/trk-from-cli")), &toml);
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/trk-from-cli"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_env_var_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/trk-from-env");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/trk-from-toml")),
        ..TomlConfig::default()
    };

    let resolver = RootFolderResolver::new(None, &toml);
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/trk-from-env"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_toml_used_when_no_cli_or_env() {
    env::remove_var(ROOT_FOLDER_ENV);
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/trk-from-toml")),
        ..TomlConfig::default()
    };

    let resolver = RootFolderResolver::new(None, &toml);
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/trk-from-toml"));
}

#[test]
#[serial]
fn test_compiled_default_is_last_resort() {
    env::remove_var(ROOT_FOLDER_ENV);
    let resolver = RootFolderResolver::new(None, &TomlConfig::default());
    let root = resolver.resolve();

    assert!(!root.as_os_str().is_empty());
    assert_eq!(root, trk_common::config::default_root_folder());
}

#[test]
fn test_missing_config_file_yields_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = load_toml_config(&temp_dir.path().join("absent.toml"));

    assert_eq!(config, TomlConfig::default());
    assert_eq!(config.port, DEFAULT_PORT);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_malformed_config_file_yields_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "port = \"not a number").unwrap();

    assert!(read_toml_config(&path).is_err());
    assert_eq!(load_toml_config(&path), TomlConfig::default());
}

#[test]
fn test_partial_config_fills_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("trk-host.toml");
    std::fs::write(
        &path,
        r#"
port = 9100
max_concurrent_jobs = 2

[[experiments]]
id = "stems"
program = "demucs"
args = ["-o", "{work_dir}", "{audio}"]
required_inputs = ["audio"]
"#,
    )
    .unwrap();

    let config = read_toml_config(&path).unwrap();
    assert_eq!(config.port, 9100);
    assert_eq!(config.max_concurrent_jobs, 2);
    assert_eq!(config.bind_address, "127.0.0.1");
    assert_eq!(config.experiments.len(), 1);
    assert_eq!(config.experiments[0].id, "stems");
    assert_eq!(config.experiments[0].required_inputs, vec!["audio".to_string()]);
    assert!(config.experiments[0].working_dir.is_none());
}

#[test]
fn test_write_then_read_preserves_experiments() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("trk-host.toml");

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/data/trk")),
        experiments: vec![CommandExperimentConfig {
            id: "transcribe".to_string(),
            description: Some("Speech to text".to_string()),
            program: "whisperx".to_string(),
            args: vec!["{audio}".to_string()],
            working_dir: None,
            env: Default::default(),
            required_inputs: vec!["audio".to_string()],
        }],
        ..TomlConfig::default()
    };

    write_toml_config(&config, &path).unwrap();
    assert!(!path.with_extension("toml.tmp").exists());
    assert_eq!(read_toml_config(&path).unwrap(), config);
}

#[test]
fn test_initializer_creates_root_and_runs() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("trk-root");

    let initializer = RootFolderInitializer::new(root.clone());
    initializer.ensure_directory_exists().unwrap();
    // Idempotent
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert!(initializer.runs_path().is_dir());
    assert_eq!(initializer.database_path(), root.join("trk.db"));
}

#[test]
fn test_initializer_reports_resource_error() {
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("file");
    std::fs::write(&blocker, b"x").unwrap();

    let initializer = RootFolderInitializer::new(blocker.join("root"));
    let err = initializer.ensure_directory_exists().unwrap_err();
    assert!(matches!(err, trk_common::Error::Resource(_)));
}
