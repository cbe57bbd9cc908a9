//! Test doubles for cwh-runner integration tests
//!
//! - FakeSurface: playhead driven by tokio time, optionally frozen or ending
//! - ScriptedPlayer: records lifecycle calls and plays back scripted failures
//! - ScriptedBackend: hands out ScriptedPlayers over one FakeSurface
//! - CallLog: ordered record of every collaborator call

#![allow(dead_code)]

use async_trait::async_trait;
use cwh_common::events::{EventSource, EventTarget, KeyStatus, MediaEvent, PlayerErrorDetail};
use cwh_runner::error::{Error, Result};
use cwh_runner::player::{LoadMode, MediaBackend, MediaPlayer, MediaSurface, PlayerConfig};
use cwh_runner::scenario::Environment;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Ordered record of collaborator calls
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl CallLog {
    pub fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }
}

/// Playhead as a function of time since construction
///
/// - `start_after`: `None` keeps the playhead frozen at zero forever
/// - `ends_after`: time at which `ended()` turns true and the playhead stops
pub struct FakeSurface {
    events: EventTarget,
    origin: Instant,
    start_after: Option<Duration>,
    ends_after: Option<Duration>,
    log: CallLog,
}

impl FakeSurface {
    /// Playhead never moves
    pub fn frozen() -> Self {
        Self {
            events: EventTarget::new(),
            origin: Instant::now(),
            start_after: None,
            ends_after: None,
            log: CallLog::default(),
        }
    }

    /// Playhead starts moving at 1 s/s after `delay`
    pub fn moving_after(delay: Duration) -> Self {
        Self {
            start_after: Some(delay),
            ..Self::frozen()
        }
    }

    pub fn ending_after(mut self, after: Duration) -> Self {
        self.ends_after = Some(after);
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    fn now(&self) -> Duration {
        let elapsed = self.origin.elapsed();
        match self.ends_after {
            Some(end) => elapsed.min(end),
            None => elapsed,
        }
    }

    /// Dispatch a surface event
    pub fn emit(&self, event: MediaEvent) {
        self.events.dispatch(&event);
    }
}

impl EventSource for FakeSurface {
    fn event_target(&self) -> &EventTarget {
        &self.events
    }
}

#[async_trait]
impl MediaSurface for FakeSurface {
    fn position(&self) -> f64 {
        match self.start_after {
            Some(start) => self.now().saturating_sub(start).as_secs_f64(),
            None => 0.0,
        }
    }

    fn ended(&self) -> bool {
        self.ends_after.is_some_and(|end| self.origin.elapsed() >= end)
    }

    async fn play(&self) -> Result<()> {
        self.log.record("play");
        Ok(())
    }
}

/// What a ScriptedPlayer does
#[derive(Clone, Default)]
pub struct PlayerScript {
    pub load_failure: Option<PlayerErrorDetail>,
    /// Errors dispatched back to back this long after load
    pub errors_after_load: Option<(Duration, Vec<PlayerErrorDetail>)>,
    pub key_status_on_load: bool,
    /// `configure()` rejects the config
    pub configure_failure: bool,
    pub panic_on_load: bool,
    pub unload_failure: bool,
    pub live: bool,
    pub load_mode: Option<LoadMode>,
}

impl PlayerScript {
    pub fn error_after_load(after: Duration, detail: PlayerErrorDetail) -> Self {
        Self {
            errors_after_load: Some((after, vec![detail])),
            ..Self::default()
        }
    }
}

pub struct ScriptedPlayer {
    events: EventTarget,
    script: PlayerScript,
    log: CallLog,
    configured: Mutex<Option<PlayerConfig>>,
    loaded: Mutex<Option<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ScriptedPlayer {
    pub fn configured(&self) -> Option<PlayerConfig> {
        self.configured.lock().unwrap().clone()
    }

    pub fn loaded(&self) -> Option<String> {
        self.loaded.lock().unwrap().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.events.listener_count()
    }
}

impl EventSource for ScriptedPlayer {
    fn event_target(&self) -> &EventTarget {
        &self.events
    }
}

#[async_trait]
impl MediaPlayer for ScriptedPlayer {
    async fn attach(&self, _surface: Arc<dyn MediaSurface>) -> Result<()> {
        self.log.record("attach");
        Ok(())
    }

    fn configure(&self, config: &PlayerConfig) -> Result<()> {
        self.log.record("configure");
        if self.script.configure_failure {
            return Err(Error::Configuration(
                "unknown streaming option".to_string(),
            ));
        }
        *self.configured.lock().unwrap() = Some(config.clone());
        Ok(())
    }

    async fn load(&self, locator: &str) -> Result<()> {
        self.log.record("load");
        if self.script.panic_on_load {
            panic!("scripted panic during load");
        }
        if let Some(detail) = &self.script.load_failure {
            return Err(Error::Load(detail.clone()));
        }
        *self.loaded.lock().unwrap() = Some(locator.to_string());

        if self.script.key_status_on_load {
            self.events.dispatch(&MediaEvent::KeyStatusChanged {
                key_system: "com.widevine.alpha".to_string(),
                statuses: BTreeMap::from([("00".to_string(), KeyStatus::Usable)]),
            });
        }
        if let Some((after, details)) = self.script.errors_after_load.clone() {
            let events = self.events.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(after).await;
                for detail in details {
                    events.dispatch(&MediaEvent::Error(detail));
                }
            });
            self.tasks.lock().unwrap().push(task);
        }
        Ok(())
    }

    fn is_live(&self) -> bool {
        self.script.live
    }

    fn load_mode(&self) -> LoadMode {
        self.script.load_mode.unwrap_or(LoadMode::MediaSource)
    }

    async fn unload(&self) -> Result<()> {
        self.log.record("unload");
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        if self.script.unload_failure {
            return Err(Error::Player(PlayerErrorDetail::critical(
                "player",
                7000,
                "LOAD_INTERRUPTED",
            )));
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.log.record("destroy");
        Ok(())
    }
}

/// Backend handing out ScriptedPlayers over a shared FakeSurface
pub struct ScriptedBackend {
    surface: Arc<FakeSurface>,
    script: PlayerScript,
    players: Mutex<Vec<Arc<ScriptedPlayer>>>,
}

impl ScriptedBackend {
    pub fn new(surface: FakeSurface, script: PlayerScript) -> Self {
        Self {
            surface: Arc::new(surface),
            script,
            players: Mutex::new(Vec::new()),
        }
    }

    pub fn fake_surface(&self) -> Arc<FakeSurface> {
        self.surface.clone()
    }

    pub fn log(&self) -> CallLog {
        self.surface.log()
    }

    pub fn players(&self) -> Vec<Arc<ScriptedPlayer>> {
        self.players.lock().unwrap().clone()
    }

    pub fn last_player(&self) -> Option<Arc<ScriptedPlayer>> {
        self.players().last().cloned()
    }
}

impl MediaBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn create_player(&self) -> Result<Arc<dyn MediaPlayer>> {
        let player = Arc::new(ScriptedPlayer {
            events: EventTarget::new(),
            script: self.script.clone(),
            log: self.surface.log(),
            configured: Mutex::new(None),
            loaded: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });
        self.players.lock().unwrap().push(player.clone());
        Ok(player)
    }

    fn surface(&self) -> Arc<dyn MediaSurface> {
        self.surface.clone()
    }
}

/// Environment supporting everything the built-in matrix asks for
pub fn full_support_environment() -> Environment {
    use cwh_runner::backend::simulated::CLEAR_ENCRYPTED_MIME_TYPE;
    use cwh_runner::scenario::builtin::{AC3_MIME_TYPE, KEY_SYSTEMS};

    let mut env = Environment::default();
    env.device.name = "Chrome".to_string();
    env.supported_types.insert(AC3_MIME_TYPE.to_string());
    env.supported_types.insert(CLEAR_ENCRYPTED_MIME_TYPE.to_string());
    for (key_system, _) in KEY_SYSTEMS {
        env.key_systems.insert(key_system.to_string(), true);
    }
    env
}

/// Elapsed virtual time since `start`, in whole milliseconds
pub fn elapsed_ms(start: Instant) -> u128 {
    start.elapsed().as_millis()
}
