//! Harness configuration
//!
//! TOML layout:
//!
//! ```toml
//! [harness]
//! poll_interval_ms = 250
//! log_level = "info"
//! asset_root = "/base/test/test/assets"
//!
//! [environment]
//! running_in_vm = false
//! supported_types = ['audio/mp4; codecs="ac-3"']
//! device = { name = "Chrome", version = 120 }
//! key_systems = { "com.widevine.alpha" = true }
//!
//! [simulation]
//! startup_delay_ms = 500
//!
//! [[scenario]]
//! id = "ac3"
//! content = "dash-audio-ac3/dash.mpd"
//! required_types = ['audio/mp4; codecs="ac-3"']
//! skip = [{ rule = "exclude_vm", reason = "no decoder in VMs" }]
//! ```
//!
//! Without `[[scenario]]` tables the built-in workaround matrix is used.

use crate::backend::simulated::SimulationConfig;
use crate::error::{Error, Result};
use crate::lifecycle::LifecycleOptions;
use crate::player::{LoadMode, PlayerConfig, StreamingConfig};
use crate::scenario::skip::{excluded_device, excluded_in_vm};
use crate::scenario::{builtin, Environment, Scenario, ScenarioMatrix};
use cwh_common::config::{env_flag, load_or_default, CONFIG_ENV_VAR};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Forces the running-in-VM flag regardless of the config file
pub const RUNNING_IN_VM_ENV_VAR: &str = "CWH_RUNNING_IN_VM";

/// Overrides the device name regardless of the config file
pub const DEVICE_NAME_ENV_VAR: &str = "CWH_DEVICE_NAME";

pub const DEFAULT_ASSET_ROOT: &str = "/base/test/test/assets";

/// Complete harness configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub harness: HarnessSection,
    pub environment: Environment,
    pub simulation: SimulationConfig,
    #[serde(rename = "scenario")]
    pub scenarios: Vec<ScenarioSpec>,
}

/// `[harness]` table
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HarnessSection {
    pub poll_interval_ms: u64,
    pub log_level: String,
    /// Root prepended to relative content locators
    pub asset_root: String,
    /// Movement window for TOML scenarios that do not set their own
    pub movement_timeout_secs: f64,
    /// Threshold window for TOML scenarios that do not set their own
    pub overall_timeout_secs: f64,
    /// Streaming options every scenario starts from
    pub streaming: StreamingConfig,
}

impl Default for HarnessSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            log_level: "info".to_string(),
            asset_root: DEFAULT_ASSET_ROOT.to_string(),
            movement_timeout_secs: 10.0,
            overall_timeout_secs: 30.0,
            streaming: StreamingConfig::strict(),
        }
    }
}

/// One `[[scenario]]` table
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioSpec {
    pub id: String,
    /// Absolute path, URL, or path relative to `asset_root`
    pub content: String,
    #[serde(default)]
    pub required_types: Vec<String>,
    pub key_system: Option<String>,
    pub license_server: Option<String>,
    pub server_certificate: Option<PathBuf>,
    pub streaming: Option<StreamingConfig>,
    #[serde(default)]
    pub skip: Vec<SkipRule>,
    pub movement_timeout_secs: Option<f64>,
    #[serde(default = "default_play_seconds")]
    pub play_seconds: f64,
    pub overall_timeout_secs: Option<f64>,
    pub expect_live: Option<bool>,
    pub expect_load_mode: Option<LoadMode>,
    #[serde(default)]
    pub require_key_status_change: bool,
}

fn default_play_seconds() -> f64 {
    5.0
}

/// Declarative skip predicate
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SkipRule {
    ExcludeDevice {
        name: String,
        version: Option<u32>,
        reason: String,
    },
    ExcludeVm {
        reason: String,
    },
}

impl HarnessConfig {
    /// Resolve, load and apply environment overrides
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config: HarnessConfig = load_or_default(cli_path, CONFIG_ENV_VAR)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(in_vm) = env_flag(RUNNING_IN_VM_ENV_VAR) {
            info!(in_vm, "running-in-VM flag set from environment");
            self.environment.running_in_vm = in_vm;
        }
        if let Ok(name) = std::env::var(DEVICE_NAME_ENV_VAR) {
            if !name.is_empty() {
                info!(device = %name, "device name set from environment");
                self.environment.device.name = name;
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.harness.poll_interval_ms)
    }

    pub fn lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            poll_interval: self.poll_interval(),
            base_config: PlayerConfig {
                streaming: self.harness.streaming.clone(),
                ..PlayerConfig::default()
            },
        }
    }

    /// Scenarios from `[[scenario]]` tables, or the built-in matrix
    pub fn matrix(&self) -> Result<ScenarioMatrix> {
        if self.scenarios.is_empty() {
            return builtin::content_workarounds_matrix(&self.harness.asset_root);
        }
        let mut matrix = ScenarioMatrix::new();
        for spec in &self.scenarios {
            matrix.insert(spec.to_scenario(&self.harness)?)?;
        }
        Ok(matrix)
    }
}

impl ScenarioSpec {
    pub fn to_scenario(&self, harness: &HarnessSection) -> Result<Scenario> {
        if self.id.trim().is_empty() {
            return Err(Error::Configuration("Scenario id must not be empty".to_string()));
        }

        let mut builder = Scenario::builder(&self.id, resolve_content(&harness.asset_root, &self.content));
        for mime_type in &self.required_types {
            builder = builder.require_mime_type(mime_type);
        }

        match (&self.key_system, &self.license_server) {
            (Some(key_system), server) => {
                builder = builder.key_system(key_system);
                if let Some(server) = server {
                    builder = builder.license_server(key_system, server);
                }
            }
            (None, Some(_)) => {
                return Err(Error::Configuration(format!(
                    "Scenario '{}' sets license_server without key_system",
                    self.id
                )));
            }
            (None, None) => {}
        }

        if let Some(certificate) = &self.server_certificate {
            if self.key_system.is_none() {
                return Err(Error::Configuration(format!(
                    "Scenario '{}' sets server_certificate without key_system",
                    self.id
                )));
            }
            let path = if certificate.is_relative() {
                Path::new(&harness.asset_root).join(certificate)
            } else {
                certificate.clone()
            };
            builder = builder.server_certificate(path);
        }

        if let Some(streaming) = &self.streaming {
            builder = builder.streaming(streaming.clone());
        }

        for rule in &self.skip {
            builder = builder.skip_if(match rule {
                SkipRule::ExcludeDevice { name, version, reason } => excluded_device(name, *version, reason),
                SkipRule::ExcludeVm { reason } => excluded_in_vm(reason),
            });
        }

        let movement = seconds(
            &self.id,
            "movement_timeout_secs",
            self.movement_timeout_secs.unwrap_or(harness.movement_timeout_secs),
        )?;
        let overall = seconds(
            &self.id,
            "overall_timeout_secs",
            self.overall_timeout_secs.unwrap_or(harness.overall_timeout_secs),
        )?;
        if !self.play_seconds.is_finite() || self.play_seconds < 0.0 {
            return Err(Error::Configuration(format!(
                "Scenario '{}' has invalid play_seconds {}",
                self.id, self.play_seconds
            )));
        }
        builder = builder.movement_timeout(movement).play_for(self.play_seconds, overall);

        if let Some(live) = self.expect_live {
            builder = builder.expect_live(live);
        }
        if let Some(mode) = self.expect_load_mode {
            builder = builder.expect_load_mode(mode);
        }
        if self.require_key_status_change {
            builder = builder.require_key_status_change();
        }

        Ok(builder.build())
    }
}

fn seconds(id: &str, field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| Error::Configuration(format!("Scenario '{id}' has invalid {field} {value}: {e}")))
}

fn resolve_content(asset_root: &str, content: &str) -> String {
    if content.starts_with('/') || content.contains("://") {
        content.to_string()
    } else {
        format!("{}/{}", asset_root.trim_end_matches('/'), content)
    }
}
