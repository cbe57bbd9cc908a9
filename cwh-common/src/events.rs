//! Media event types and the listener dispatcher shared by all CWH crates
//!
//! Players and playback surfaces each own an [`EventTarget`]. Anything that wants
//! to observe them registers a listener for a named event (`"error"`,
//! `"timeupdate"`, ...) and is called back synchronously, in registration order,
//! whenever the source dispatches a matching [`MediaEvent`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Event names understood by the harness
pub mod names {
    pub const ERROR: &str = "error";
    pub const KEY_STATUS_CHANGED: &str = "keystatuschanged";
    pub const TIME_UPDATE: &str = "timeupdate";
    pub const PLAYING: &str = "playing";
    pub const ENDED: &str = "ended";
    pub const LOADED: &str = "loaded";
}

/// Structured error detail reported by a player
///
/// Surfaced verbatim in scenario reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerErrorDetail {
    /// Recoverable or critical
    pub severity: ErrorSeverity,
    /// Subsystem that raised the error (network, drm, media, ...)
    pub category: String,
    /// Numeric error code
    pub code: u32,
    /// Human-readable message
    pub message: String,
    /// Extra payload values attached by the player
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<String>,
}

impl PlayerErrorDetail {
    pub fn critical(category: impl Into<String>, code: u32, message: impl Into<String>) -> Self {
        Self {
            severity: ErrorSeverity::Critical,
            category: category.into(),
            code,
            message: message.into(),
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, value: impl Into<String>) -> Self {
        self.data.push(value.into());
        self
    }
}

impl std::fmt::Display for PlayerErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:?}] {} error {}: {}",
            self.severity, self.category, self.code, self.message
        )?;
        if !self.data.is_empty() {
            write!(f, " ({})", self.data.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Recoverable,
    Critical,
}

/// DRM key status for one key id of the active session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyStatus {
    Usable,
    Expired,
    Released,
    OutputRestricted,
    StatusPending,
    InternalError,
}

/// Media event dispatched by a player or playback surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MediaEvent {
    /// Player error (fatal for the scenario observing it)
    Error(PlayerErrorDetail),

    /// DRM key status changed for the active session
    KeyStatusChanged {
        key_system: String,
        /// Key id (hex) → status
        statuses: BTreeMap<String, KeyStatus>,
    },

    /// Playback position advanced
    ///
    /// The position carried here may already be stale when a listener runs;
    /// observers that care about the current value re-sample the surface.
    TimeUpdate { position: f64 },

    /// Playback started or resumed
    Playing,

    /// Playback reached end of stream
    Ended,

    /// Content finished loading
    Loaded { locator: String },
}

impl MediaEvent {
    /// DOM-style event name used for listener matching
    pub fn event_type(&self) -> &'static str {
        match self {
            MediaEvent::Error(_) => names::ERROR,
            MediaEvent::KeyStatusChanged { .. } => names::KEY_STATUS_CHANGED,
            MediaEvent::TimeUpdate { .. } => names::TIME_UPDATE,
            MediaEvent::Playing => names::PLAYING,
            MediaEvent::Ended => names::ENDED,
            MediaEvent::Loaded { .. } => names::LOADED,
        }
    }
}

/// Identifier of one listener registration on an [`EventTarget`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Listener callback
pub type Listener = Arc<dyn Fn(&MediaEvent) + Send + Sync>;

struct ListenerEntry {
    id: ListenerId,
    event_type: String,
    active: Arc<AtomicBool>,
    callback: Listener,
}

#[derive(Default)]
struct TargetInner {
    next_id: u64,
    listeners: Vec<ListenerEntry>,
}

/// Listener registry owned by an event source
///
/// Cloning yields another handle to the same registry.
///
/// Dispatch snapshots the matching listeners and releases the lock before
/// calling them, so a callback may add or remove listeners (itself included).
/// Each listener's liveness is re-checked right before it is invoked: once
/// removed, a listener never fires again, even from a dispatch already in
/// progress.
#[derive(Clone, Default)]
pub struct EventTarget {
    inner: Arc<Mutex<TargetInner>>,
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TargetInner> {
        // A panicking listener never runs under this lock, so the data stays consistent
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` for events named `event_type`
    pub fn add_listener(&self, event_type: &str, callback: Listener) -> ListenerId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.listeners.push(ListenerEntry {
            id,
            event_type: event_type.to_string(),
            active: Arc::new(AtomicBool::new(true)),
            callback,
        });
        id
    }

    /// Remove a listener
    ///
    /// Returns false if the listener was already removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut inner = self.lock();
        match inner.listeners.iter().position(|entry| entry.id == id) {
            Some(index) => {
                let entry = inner.listeners.remove(index);
                entry.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Deliver `event` to every live listener registered for its name
    ///
    /// Returns the number of listeners invoked.
    pub fn dispatch(&self, event: &MediaEvent) -> usize {
        let event_type = event.event_type();
        let snapshot: Vec<(Arc<AtomicBool>, Listener)> = self
            .lock()
            .listeners
            .iter()
            .filter(|entry| entry.event_type == event_type)
            .map(|entry| (entry.active.clone(), entry.callback.clone()))
            .collect();

        let mut invoked = 0;
        for (active, callback) in snapshot {
            if active.load(Ordering::SeqCst) {
                callback(event);
                invoked += 1;
            }
        }
        invoked
    }

    /// True if both handles refer to the same registry
    pub fn same_registry(&self, other: &EventTarget) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Total number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Number of listeners registered for one event name
    pub fn listener_count_for(&self, event_type: &str) -> usize {
        self.lock()
            .listeners
            .iter()
            .filter(|entry| entry.event_type == event_type)
            .count()
    }
}

impl std::fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTarget")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Anything that owns an [`EventTarget`] and can be listened to
pub trait EventSource: Send + Sync {
    fn event_target(&self) -> &EventTarget;
}

impl EventSource for EventTarget {
    fn event_target(&self) -> &EventTarget {
        self
    }
}

// ========================================
// Tests
// ========================================
