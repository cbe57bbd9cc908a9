//! Capability interfaces for the media collaborators
//!
//! The harness never talks to a concrete media stack. It drives a
//! [`MediaPlayer`] attached to a [`MediaSurface`], both created by a
//! [`MediaBackend`]; tests substitute their own doubles behind these traits.

use crate::error::Result;
use async_trait::async_trait;
use cwh_common::events::EventSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Rendering surface the player is attached to (the video element)
///
/// Exposes the externally observable playback position and ended flag.
#[async_trait]
pub trait MediaSurface: EventSource {
    /// Current playback position in seconds; never decreases during playback
    fn position(&self) -> f64;

    /// True once playback has reached end of stream
    fn ended(&self) -> bool;

    /// Start playback
    async fn play(&self) -> Result<()>;
}

/// Player under test
///
/// Emits `"error"` and `"keystatuschanged"` events on its own event target.
#[async_trait]
pub trait MediaPlayer: EventSource {
    async fn attach(&self, surface: Arc<dyn MediaSurface>) -> Result<()>;

    /// Apply configuration; a rejected configuration is a `Configuration` error
    fn configure(&self, config: &PlayerConfig) -> Result<()>;

    /// Load content; fails with a `Load` error on unsupported or unreachable content
    async fn load(&self, locator: &str) -> Result<()>;

    fn is_live(&self) -> bool;

    fn load_mode(&self) -> LoadMode;

    async fn unload(&self) -> Result<()>;

    async fn destroy(&self) -> Result<()>;
}

/// Factory for players and the surface they render to
pub trait MediaBackend: Send + Sync {
    /// Short backend name for reports
    fn name(&self) -> &str;

    /// Create a fresh player for one scenario
    fn create_player(&self) -> Result<Arc<dyn MediaPlayer>>;

    /// Surface shared by successive scenarios
    fn surface(&self) -> Arc<dyn MediaSurface>;
}

/// How the player is feeding the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    Destroyed,
    NotLoaded,
    SrcEquals,
    MediaSource,
}

impl std::fmt::Display for LoadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadMode::Destroyed => write!(f, "DESTROYED"),
            LoadMode::NotLoaded => write!(f, "NOT_LOADED"),
            LoadMode::SrcEquals => write!(f, "SRC_EQUALS"),
            LoadMode::MediaSource => write!(f, "MEDIA_SOURCE"),
        }
    }
}

/// Complete player configuration payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub drm: DrmConfig,
}

impl PlayerConfig {
    /// Apply a scenario's overrides on top of this base configuration
    ///
    /// A streaming override replaces the base streaming options wholesale; DRM
    /// servers and advanced entries are merged per key system.
    pub fn with_overrides(&self, streaming: Option<&StreamingConfig>, drm: &DrmConfig) -> PlayerConfig {
        let mut merged = self.clone();
        if let Some(streaming) = streaming {
            merged.streaming = streaming.clone();
        }
        merged
            .drm
            .servers
            .extend(drm.servers.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
            .drm
            .advanced
            .extend(drm.advanced.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

/// Streaming feature toggles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Let the player recreate MediaSource after decode errors
    pub allow_media_source_recoveries: bool,
    pub cross_boundary_strategy: CrossBoundaryStrategy,
    /// Stall detection and jumping
    pub stall_enabled: bool,
    /// Prefer native HLS playback when FairPlay is in use
    pub use_native_hls_for_fair_play: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            allow_media_source_recoveries: true,
            cross_boundary_strategy: CrossBoundaryStrategy::Keep,
            stall_enabled: true,
            use_native_hls_for_fair_play: true,
        }
    }
}

impl StreamingConfig {
    /// Settings every workaround scenario runs with
    ///
    /// Recovery and stall handling are off so a broken workaround surfaces as
    /// an error instead of being papered over.
    pub fn strict() -> Self {
        Self {
            allow_media_source_recoveries: false,
            cross_boundary_strategy: CrossBoundaryStrategy::Keep,
            stall_enabled: false,
            use_native_hls_for_fair_play: false,
        }
    }
}

/// Behaviour when playback crosses between clear and encrypted periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossBoundaryStrategy {
    Keep,
    Reset,
    ResetToEncrypted,
    ResetOnEncryptionChange,
}

/// DRM configuration
///
/// Server URLs and certificates are opaque and passed through unmodified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrmConfig {
    /// Key system id → license server URL
    #[serde(default)]
    pub servers: BTreeMap<String, String>,
    /// Key system id → advanced options
    #[serde(default)]
    pub advanced: BTreeMap<String, AdvancedDrmConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvancedDrmConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_certificate: Option<Vec<u8>>,
}
