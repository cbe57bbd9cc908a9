//! Harness config loading tests
//!
//! Tests touching process environment variables run serially.

use cwh_common::config::CONFIG_ENV_VAR;
use cwh_runner::config::{HarnessConfig, SkipRule, DEVICE_NAME_ENV_VAR, RUNNING_IN_VM_ENV_VAR};
use cwh_runner::Error;
use serial_test::serial;
use std::env;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn clear_env() {
    env::remove_var(CONFIG_ENV_VAR);
    env::remove_var(RUNNING_IN_VM_ENV_VAR);
    env::remove_var(DEVICE_NAME_ENV_VAR);
}

const SAMPLE: &str = r#"
[harness]
poll_interval_ms = 100
log_level = "debug"

[environment]
supported_types = ['audio/mp4; codecs="ac-3"']
device = { name = "Chromecast", version = 2 }

[environment.key_systems]
"com.widevine.alpha" = true

[simulation]
startup_delay_ms = 1000

[[scenario]]
id = "ac3"
content = "dash-audio-ac3/dash.mpd"
required_types = ['audio/mp4; codecs="ac-3"']
skip = [
    { rule = "exclude_device", name = "Tizen", version = 3, reason = "no AC-3 on Tizen 3" },
]
"#;

#[test]
#[serial]
fn test_load_from_cli_path() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("harness.toml");
    fs::write(&path, SAMPLE).unwrap();

    let config = HarnessConfig::load(Some(&path)).unwrap();

    assert_eq!(config.poll_interval(), Duration::from_millis(100));
    assert_eq!(config.harness.log_level, "debug");
    assert_eq!(config.environment.device.name, "Chromecast");
    assert_eq!(config.environment.device.version, Some(2));
    assert!(config.environment.supports_key_system("com.widevine.alpha"));
    assert_eq!(config.simulation.startup_delay_ms, 1000);
    assert_eq!(
        config.scenarios[0].skip,
        vec![SkipRule::ExcludeDevice {
            name: "Tizen".to_string(),
            version: Some(3),
            reason: "no AC-3 on Tizen 3".to_string(),
        }]
    );
    assert_eq!(config.matrix().unwrap().ids(), vec!["ac3"]);
}

#[test]
#[serial]
fn test_load_from_env_var() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("env.toml");
    fs::write(&path, SAMPLE).unwrap();
    env::set_var(CONFIG_ENV_VAR, &path);

    let config = HarnessConfig::load(None).unwrap();
    assert_eq!(config.harness.log_level, "debug");

    clear_env();
}

#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("harness.toml");
    fs::write(&path, SAMPLE).unwrap();
    env::set_var(RUNNING_IN_VM_ENV_VAR, "1");
    env::set_var(DEVICE_NAME_ENV_VAR, "Tizen");

    let config = HarnessConfig::load(Some(&path)).unwrap();
    assert!(config.environment.running_in_vm);
    assert_eq!(config.environment.device.name, "Tizen");
    // Version still comes from the file
    assert_eq!(config.environment.device.version, Some(2));

    clear_env();
}

#[test]
#[serial]
fn test_missing_explicit_file_is_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let err = HarnessConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(matches!(err, Error::Common(cwh_common::Error::NotFound(_))));
    assert_eq!(err.category(), cwh_runner::FailureCategory::ConfigurationError);
}

#[test]
#[serial]
fn test_malformed_file_is_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[harness\npoll_interval_ms = ").unwrap();
    assert!(matches!(
        HarnessConfig::load(Some(&path)),
        Err(Error::Common(cwh_common::Error::Toml(_)))
    ));
}
