//! # Scenarios
//!
//! A [`Scenario`] is an immutable description of one test case: which content
//! to load, which codecs or key system it needs, what configuration to apply,
//! the skip predicates deciding whether it can run here, and what the playback
//! assertions expect.
//!
//! Scenarios are grouped in a [`ScenarioMatrix`] that preserves declaration
//! order.

pub mod builtin;
pub mod matrix;
pub mod skip;

pub use matrix::ScenarioMatrix;
pub use skip::{DeviceInfo, Environment, SkipDecision, SkipPredicate};

use crate::player::{DrmConfig, LoadMode, PlayerConfig, StreamingConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default window for playback to start
pub const DEFAULT_MOVEMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default overall window for the threshold wait
pub const DEFAULT_OVERALL_TIMEOUT: Duration = Duration::from_secs(30);

/// What the playback assertions expect once content is loaded
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackExpectations {
    /// Playhead must leave its initial value within this window
    pub movement_timeout: Duration,
    /// Seconds of playback required (end of stream also satisfies it)
    pub play_seconds: f64,
    /// Window for `play_seconds` of playback
    pub overall_timeout: Duration,
    /// Expected `is_live()` after load
    pub expect_live: Option<bool>,
    /// Expected `load_mode()` after load
    pub expect_load_mode: Option<LoadMode>,
    /// At least one `keystatuschanged` must fire during the scenario
    pub require_key_status_change: bool,
}

impl Default for PlaybackExpectations {
    fn default() -> Self {
        Self {
            movement_timeout: DEFAULT_MOVEMENT_TIMEOUT,
            play_seconds: 5.0,
            overall_timeout: DEFAULT_OVERALL_TIMEOUT,
            expect_live: None,
            expect_load_mode: None,
            require_key_status_change: false,
        }
    }
}

/// One configured test case
#[derive(Debug, Clone)]
pub struct Scenario {
    id: String,
    content: String,
    required_types: Vec<String>,
    key_system: Option<String>,
    streaming: Option<StreamingConfig>,
    drm: DrmConfig,
    server_certificate: Option<PathBuf>,
    skip_predicates: Vec<SkipPredicate>,
    expectations: PlaybackExpectations,
}

impl Scenario {
    pub fn builder(id: impl Into<String>, content: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder {
            scenario: Scenario {
                id: id.into(),
                content: content.into(),
                required_types: Vec::new(),
                key_system: None,
                streaming: None,
                drm: DrmConfig::default(),
                server_certificate: None,
                skip_predicates: Vec::new(),
                expectations: PlaybackExpectations::default(),
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Content locator passed to `load`
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn required_types(&self) -> &[String] {
        &self.required_types
    }

    pub fn key_system(&self) -> Option<&str> {
        self.key_system.as_deref()
    }

    /// Streaming override, if the scenario needs something other than the base
    pub fn streaming(&self) -> Option<&StreamingConfig> {
        self.streaming.as_ref()
    }

    pub fn drm(&self) -> &DrmConfig {
        &self.drm
    }

    /// Configuration payload for this scenario on top of `base`
    ///
    /// The server certificate is not included; it is read just before configure.
    pub fn player_config(&self, base: &PlayerConfig) -> PlayerConfig {
        base.with_overrides(self.streaming.as_ref(), &self.drm)
    }

    /// Certificate file injected into the key system's advanced DRM options
    pub fn server_certificate(&self) -> Option<&Path> {
        self.server_certificate.as_deref()
    }

    pub fn skip_predicates(&self) -> &[SkipPredicate] {
        &self.skip_predicates
    }

    pub fn expectations(&self) -> &PlaybackExpectations {
        &self.expectations
    }
}

/// Builder for [`Scenario`]
///
/// The built scenario is never mutated afterwards.
#[derive(Debug)]
pub struct ScenarioBuilder {
    scenario: Scenario,
}

impl ScenarioBuilder {
    /// Require a MIME type; also installs the matching skip predicate
    pub fn require_mime_type(mut self, mime_type: &str) -> Self {
        self.scenario.required_types.push(mime_type.to_string());
        self.scenario
            .skip_predicates
            .push(skip::requires_mime_type(mime_type));
        self
    }

    /// Require a key system; also installs the matching skip predicate
    pub fn key_system(mut self, key_system: &str) -> Self {
        self.scenario.key_system = Some(key_system.to_string());
        self.scenario
            .skip_predicates
            .push(skip::requires_key_system(key_system));
        self
    }

    pub fn streaming(mut self, streaming: StreamingConfig) -> Self {
        self.scenario.streaming = Some(streaming);
        self
    }

    pub fn drm(mut self, drm: DrmConfig) -> Self {
        self.scenario.drm = drm;
        self
    }

    pub fn license_server(mut self, key_system: &str, url: &str) -> Self {
        self.scenario
            .drm
            .servers
            .insert(key_system.to_string(), url.to_string());
        self
    }

    pub fn server_certificate(mut self, path: impl Into<PathBuf>) -> Self {
        self.scenario.server_certificate = Some(path.into());
        self
    }

    pub fn skip_if(mut self, predicate: SkipPredicate) -> Self {
        self.scenario.skip_predicates.push(predicate);
        self
    }

    pub fn expectations(mut self, expectations: PlaybackExpectations) -> Self {
        self.scenario.expectations = expectations;
        self
    }

    pub fn movement_timeout(mut self, timeout: Duration) -> Self {
        self.scenario.expectations.movement_timeout = timeout;
        self
    }

    /// Play for `seconds` within `overall_timeout`
    pub fn play_for(mut self, seconds: f64, overall_timeout: Duration) -> Self {
        self.scenario.expectations.play_seconds = seconds;
        self.scenario.expectations.overall_timeout = overall_timeout;
        self
    }

    pub fn expect_live(mut self, live: bool) -> Self {
        self.scenario.expectations.expect_live = Some(live);
        self
    }

    pub fn expect_load_mode(mut self, mode: LoadMode) -> Self {
        self.scenario.expectations.expect_load_mode = Some(mode);
        self
    }

    pub fn require_key_status_change(mut self) -> Self {
        self.scenario.expectations.require_key_status_change = true;
        self
    }

    pub fn build(self) -> Scenario {
        self.scenario
    }
}
