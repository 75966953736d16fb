//! Configuration resolution and graceful degradation tests
//!
//! Tests that touch GATEKEEP_CONFIG are marked #[serial] so they never race
//! on the process environment.

use gatekeep_common::config::{
    load_toml_config, resolve_config_path, TomlConfig, CONFIG_ENV_VAR, MAX_LOOKBACK_HOURS,
};
use gatekeep_common::Error;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
#[serial]
fn test_cli_path_has_highest_priority() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");
    let resolved = resolve_config_path(Some(Path::new("/tmp/from-cli.toml")));
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-cli.toml")));
    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_beats_platform_default() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");
    let resolved = resolve_config_path(None);
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-env.toml")));
    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_platform_default_when_nothing_set() {
    env::remove_var(CONFIG_ENV_VAR);
    if let Some(path) = resolve_config_path(None) {
        assert!(path.ends_with("gatekeep/gatekeep.toml"));
    }
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let config = load_toml_config(Some(dir.path().join("absent.toml").as_path())).unwrap();
    assert_eq!(config.port, TomlConfig::default().port);
    assert_eq!(config.scheduler.interval_secs, 30);
}

#[test]
fn test_file_values_are_applied() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gatekeep.toml");
    std::fs::write(
        &path,
        r#"
        database_path = "/var/lib/gatekeep/venue.db"

        [scheduler]
        interval_secs = 10
        event_ids = ["festival-2026"]

        [promotion]
        enforced_min_confidence = 0.8
        "#,
    )
    .unwrap();

    let config = load_toml_config(Some(path.as_path())).unwrap();
    assert_eq!(config.resolved_database_path(), PathBuf::from("/var/lib/gatekeep/venue.db"));
    assert_eq!(config.scheduler.interval_secs, 10);
    assert_eq!(config.scheduler.event_ids, vec!["festival-2026".to_string()]);
    assert_eq!(config.promotion.enforced_min_confidence, 0.8);
    assert_eq!(config.promotion.probation_min_samples, 5);
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gatekeep.toml");
    std::fs::write(&path, "port = \"not a number\"").unwrap();

    assert!(matches!(load_toml_config(Some(path.as_path())), Err(Error::Config(_))));
}

#[test]
fn test_invalid_thresholds_are_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gatekeep.toml");
    std::fs::write(&path, "[scoring]\nsample_weight = 0.9\n").unwrap();

    assert!(load_toml_config(Some(path.as_path())).is_err());
}

#[test]
fn test_nan_values_are_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gatekeep.toml");
    std::fs::write(&path, "[clustering]\nradius_m = nan\n").unwrap();
    assert!(matches!(load_toml_config(Some(path.as_path())), Err(Error::Config(_))));

    let mut config = TomlConfig::default();
    config.scoring.default_accuracy_m = f64::NAN;
    assert!(config.validate().is_err());

    let mut config = TomlConfig::default();
    config.scoring.sample_scale = f64::INFINITY;
    assert!(config.validate().is_err());
}

#[test]
fn test_lookback_hours_is_bounded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gatekeep.toml");
    std::fs::write(&path, "[scheduler]\nlookback_hours = 10000000\n").unwrap();
    assert!(matches!(load_toml_config(Some(path.as_path())), Err(Error::Config(_))));

    let mut config = TomlConfig::default();
    config.scheduler.lookback_hours = MAX_LOOKBACK_HOURS;
    assert!(config.validate().is_ok());
}
