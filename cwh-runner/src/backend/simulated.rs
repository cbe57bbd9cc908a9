//! Simulated player and surface
//!
//! Playback is a pure function of tokio time: after `play()` the position stays
//! at zero for the startup delay, then advances one second per second until the
//! content duration. A background task dispatches `playing`, `timeupdate` every
//! tick and `ended` once at the end.
//!
//! Load behaviour mirrors what the workaround suite checks:
//! - unknown locator → network load error
//! - codec not decodable on the platform → media load error
//! - encrypted content → needs a license server for a supported key system,
//!   and FairPlay additionally needs a server certificate
//! - encrypted content that loads emits one `keystatuschanged`
//! - HLS with FairPlay plays natively (src=) when native HLS is enabled

use crate::error::{Error, Result};
use crate::player::{LoadMode, MediaBackend, MediaPlayer, MediaSurface, PlayerConfig};
use crate::scenario::builtin::{self, assets, AC3_MIME_TYPE};
use crate::scenario::Environment;
use async_trait::async_trait;
use cwh_common::events::{EventSource, EventTarget, KeyStatus, MediaEvent, PlayerErrorDetail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// MIME type of the clear/encrypted test content
pub const CLEAR_ENCRYPTED_MIME_TYPE: &str = "video/mp4; codecs=\"avc1.42c01e\"";

/// Key id reported in simulated key status events
const SIMULATED_KEY_ID: &str = "0123456789abcdef0123456789abcdef";

/// `[simulation]` table
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Delay between `play()` and the playhead starting to move
    pub startup_delay_ms: u64,
    /// Interval between `timeupdate` events
    pub tick_interval_ms: u64,
    /// Time spent "fetching the manifest" in `load()`
    pub load_delay_ms: u64,
    /// Duration of every built-in catalog entry
    pub content_duration_secs: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: 500,
            tick_interval_ms: 250,
            load_delay_ms: 100,
            content_duration_secs: 60.0,
        }
    }
}

impl SimulationConfig {
    fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    fn load_delay(&self) -> Duration {
        Duration::from_millis(self.load_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Dash,
    Hls,
}

/// What the simulated network returns for one locator
#[derive(Debug, Clone, PartialEq)]
pub struct ContentProfile {
    pub manifest: ManifestKind,
    pub mime_type: String,
    /// `None` for live content
    pub duration: Option<f64>,
    pub encrypted: bool,
}

impl ContentProfile {
    pub fn vod(manifest: ManifestKind, mime_type: &str, duration: f64) -> Self {
        Self {
            manifest,
            mime_type: mime_type.to_string(),
            duration: Some(duration),
            encrypted: false,
        }
    }

    pub fn live(manifest: ManifestKind, mime_type: &str) -> Self {
        Self {
            manifest,
            mime_type: mime_type.to_string(),
            duration: None,
            encrypted: false,
        }
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn load_error(category: &str, code: u32, message: &str) -> Error {
    Error::Load(PlayerErrorDetail::critical(category, code, message))
}

#[derive(Debug, Default)]
struct SurfaceState {
    /// Content duration, `Some(None)` for live
    source: Option<Option<f64>>,
    /// Instant the playhead starts moving
    moving_from: Option<Instant>,
    ticker: Option<JoinHandle<()>>,
}

impl SurfaceState {
    fn position(&self) -> f64 {
        let Some(moving_from) = self.moving_from else {
            return 0.0;
        };
        let elapsed = Instant::now().saturating_duration_since(moving_from).as_secs_f64();
        match self.source {
            Some(Some(duration)) => elapsed.min(duration),
            _ => elapsed,
        }
    }

    fn ended(&self) -> bool {
        match self.source {
            Some(Some(duration)) => self.moving_from.is_some() && self.position() >= duration,
            _ => false,
        }
    }
}

/// Surface shared by every player the backend creates
pub struct SimulatedSurface {
    events: EventTarget,
    timing: SimulationConfig,
    state: Arc<Mutex<SurfaceState>>,
}

impl SimulatedSurface {
    fn new(timing: SimulationConfig) -> Self {
        Self {
            events: EventTarget::new(),
            timing,
            state: Arc::new(Mutex::new(SurfaceState::default())),
        }
    }

    fn set_source(&self, duration: Option<f64>) {
        self.reset();
        lock(&self.state).source = Some(duration);
    }

    /// Stop ticking and forget the source
    fn reset(&self) {
        let mut state = lock(&self.state);
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        *state = SurfaceState::default();
    }
}

impl EventSource for SimulatedSurface {
    fn event_target(&self) -> &EventTarget {
        &self.events
    }
}

#[async_trait]
impl MediaSurface for SimulatedSurface {
    fn position(&self) -> f64 {
        lock(&self.state).position()
    }

    fn ended(&self) -> bool {
        lock(&self.state).ended()
    }

    async fn play(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.source.is_none() {
            return Err(Error::Player(PlayerErrorDetail::critical(
                "media",
                3000,
                "play() called without a loaded source",
            )));
        }
        if state.moving_from.is_some() {
            return Ok(());
        }

        let startup = self.timing.startup_delay();
        state.moving_from = Some(Instant::now() + startup);

        let shared = self.state.clone();
        let events = self.events.clone();
        let tick = self.timing.tick_interval();
        state.ticker = Some(tokio::spawn(async move {
            tokio::time::sleep(startup).await;
            events.dispatch(&MediaEvent::Playing);

            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let (position, ended) = {
                    let state = lock(&shared);
                    (state.position(), state.ended())
                };
                events.dispatch(&MediaEvent::TimeUpdate { position });
                if ended {
                    events.dispatch(&MediaEvent::Ended);
                    break;
                }
            }
        }));
        debug!(?startup, "simulated playback started");
        Ok(())
    }
}

#[derive(Debug)]
struct PlayerState {
    attached: bool,
    config: PlayerConfig,
    load_mode: LoadMode,
    live: bool,
    tasks: Vec<JoinHandle<()>>,
}

impl PlayerState {
    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Player created fresh for each scenario
pub struct SimulatedPlayer {
    id: usize,
    events: EventTarget,
    surface: Arc<SimulatedSurface>,
    catalog: Arc<BTreeMap<String, ContentProfile>>,
    environment: Arc<Environment>,
    timing: SimulationConfig,
    injected_error: Option<(Duration, PlayerErrorDetail)>,
    state: Mutex<PlayerState>,
}

impl SimulatedPlayer {
    fn lock(&self) -> MutexGuard<'_, PlayerState> {
        lock(&self.state)
    }

    /// First configured license server whose key system the platform supports
    fn select_key_system(&self, config: &PlayerConfig) -> Result<String> {
        let key_system = config
            .drm
            .servers
            .keys()
            .find(|ks| self.environment.supports_key_system(ks))
            .ok_or_else(|| load_error("drm", 6012, "NO_LICENSE_SERVER_GIVEN"))?;

        if key_system == builtin::FAIRPLAY {
            let has_certificate = config
                .drm
                .advanced
                .get(key_system)
                .and_then(|advanced| advanced.server_certificate.as_ref())
                .is_some_and(|certificate| !certificate.is_empty());
            if !has_certificate {
                return Err(load_error("drm", 6004, "SERVER_CERTIFICATE_REQUIRED"));
            }
        }
        Ok(key_system.clone())
    }

    fn load_mode_for(profile: &ContentProfile, key_system: Option<&str>, config: &PlayerConfig) -> LoadMode {
        let native_fairplay = profile.manifest == ManifestKind::Hls
            && key_system == Some(builtin::FAIRPLAY)
            && config.streaming.use_native_hls_for_fair_play;
        if native_fairplay {
            LoadMode::SrcEquals
        } else {
            LoadMode::MediaSource
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.lock().load_mode == LoadMode::Destroyed {
            return Err(Error::Internal(format!("player {} is destroyed", self.id)));
        }
        Ok(())
    }
}

impl EventSource for SimulatedPlayer {
    fn event_target(&self) -> &EventTarget {
        &self.events
    }
}

#[async_trait]
impl MediaPlayer for SimulatedPlayer {
    async fn attach(&self, surface: Arc<dyn MediaSurface>) -> Result<()> {
        self.ensure_alive()?;
        if !surface.event_target().same_registry(self.surface.event_target()) {
            return Err(Error::Configuration(
                "surface was not created by the simulated backend".to_string(),
            ));
        }
        self.lock().attached = true;
        debug!(player = self.id, "attached");
        Ok(())
    }

    fn configure(&self, config: &PlayerConfig) -> Result<()> {
        self.ensure_alive()?;
        if let Some((key_system, _)) = config.drm.servers.iter().find(|(_, url)| url.trim().is_empty()) {
            return Err(Error::Configuration(format!(
                "empty license server URL for {key_system}"
            )));
        }
        self.lock().config = config.clone();
        Ok(())
    }

    async fn load(&self, locator: &str) -> Result<()> {
        let config = {
            let state = self.lock();
            if state.load_mode == LoadMode::Destroyed {
                return Err(Error::Internal(format!("player {} is destroyed", self.id)));
            }
            if !state.attached {
                return Err(load_error("player", 7004, "NO_VIDEO_ELEMENT"));
            }
            state.config.clone()
        };

        tokio::time::sleep(self.timing.load_delay()).await;

        let profile = self
            .catalog
            .get(locator)
            .ok_or_else(|| Error::Load(PlayerErrorDetail::critical("network", 1001, "BAD_HTTP_STATUS").with_data(locator)))?;
        if !self.environment.is_type_supported(&profile.mime_type) {
            return Err(Error::Load(
                PlayerErrorDetail::critical("media", 4032, "CONTENT_UNSUPPORTED_BY_BROWSER")
                    .with_data(profile.mime_type.clone()),
            ));
        }
        let key_system = if profile.encrypted {
            Some(self.select_key_system(&config)?)
        } else {
            None
        };
        let load_mode = Self::load_mode_for(profile, key_system.as_deref(), &config);

        self.surface.set_source(profile.duration);
        {
            let mut state = self.lock();
            state.load_mode = load_mode;
            state.live = profile.duration.is_none();
        }
        info!(player = self.id, locator, %load_mode, "content loaded");
        self.events.dispatch(&MediaEvent::Loaded {
            locator: locator.to_string(),
        });

        if let Some(key_system) = key_system {
            let statuses = BTreeMap::from([(SIMULATED_KEY_ID.to_string(), KeyStatus::Usable)]);
            self.events.dispatch(&MediaEvent::KeyStatusChanged { key_system, statuses });
        }

        if let Some((after, detail)) = self.injected_error.clone() {
            let events = self.events.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(after).await;
                warn!(%detail, "dispatching injected error");
                events.dispatch(&MediaEvent::Error(detail));
            });
            self.lock().tasks.push(task);
        }
        Ok(())
    }

    fn is_live(&self) -> bool {
        self.lock().live
    }

    fn load_mode(&self) -> LoadMode {
        self.lock().load_mode
    }

    async fn unload(&self) -> Result<()> {
        self.ensure_alive()?;
        {
            let mut state = self.lock();
            state.abort_tasks();
            state.load_mode = LoadMode::NotLoaded;
            state.live = false;
        }
        self.surface.reset();
        debug!(player = self.id, "unloaded");
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let mut state = self.lock();
        if state.load_mode == LoadMode::Destroyed {
            return Ok(());
        }
        state.abort_tasks();
        state.attached = false;
        state.load_mode = LoadMode::Destroyed;
        debug!(player = self.id, "destroyed");
        Ok(())
    }
}

/// Backend producing [`SimulatedPlayer`]s over one [`SimulatedSurface`]
pub struct SimulatedBackend {
    timing: SimulationConfig,
    environment: Arc<Environment>,
    catalog: BTreeMap<String, ContentProfile>,
    surface: Arc<SimulatedSurface>,
    injected_error: Option<(Duration, PlayerErrorDetail)>,
    players_created: AtomicUsize,
}

impl SimulatedBackend {
    /// Empty catalog; decodes what `environment` says the platform decodes
    pub fn new(timing: SimulationConfig, environment: Environment) -> Self {
        Self {
            surface: Arc::new(SimulatedSurface::new(timing.clone())),
            timing,
            environment: Arc::new(environment),
            catalog: BTreeMap::new(),
            injected_error: None,
            players_created: AtomicUsize::new(0),
        }
    }

    pub fn with_content(mut self, locator: impl Into<String>, profile: ContentProfile) -> Self {
        self.catalog.insert(locator.into(), profile);
        self
    }

    /// Catalog entries for the built-in workaround matrix under `asset_root`
    pub fn with_builtin_catalog(self, asset_root: &str) -> Self {
        let root = asset_root.trim_end_matches('/');
        let duration = self.timing.content_duration_secs;
        self.with_content(
            format!("{root}/{}", assets::AC3_DASH),
            ContentProfile::vod(ManifestKind::Dash, AC3_MIME_TYPE, duration),
        )
        .with_content(
            format!("{root}/{}", assets::CLEAR_ENCRYPTED_DASH),
            ContentProfile::vod(ManifestKind::Dash, CLEAR_ENCRYPTED_MIME_TYPE, duration).encrypted(),
        )
        .with_content(
            format!("{root}/{}", assets::CLEAR_ENCRYPTED_HLS),
            ContentProfile::vod(ManifestKind::Hls, CLEAR_ENCRYPTED_MIME_TYPE, duration).encrypted(),
        )
    }

    /// Every player created afterwards dispatches `detail` as an `error` event
    /// `after` its content loads
    pub fn inject_error(mut self, after: Duration, detail: PlayerErrorDetail) -> Self {
        self.injected_error = Some((after, detail));
        self
    }

    pub fn players_created(&self) -> usize {
        self.players_created.load(Ordering::SeqCst)
    }
}

impl MediaBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn create_player(&self) -> Result<Arc<dyn MediaPlayer>> {
        let id = self.players_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(SimulatedPlayer {
            id,
            events: EventTarget::new(),
            surface: self.surface.clone(),
            catalog: Arc::new(self.catalog.clone()),
            environment: self.environment.clone(),
            timing: self.timing.clone(),
            injected_error: self.injected_error.clone(),
            state: Mutex::new(PlayerState {
                attached: false,
                config: PlayerConfig::default(),
                load_mode: LoadMode::NotLoaded,
                live: false,
                tasks: Vec::new(),
            }),
        }))
    }

    fn surface(&self) -> Arc<dyn MediaSurface> {
        self.surface.clone()
    }
}
