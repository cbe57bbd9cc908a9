//! Deadline-bounded condition waits
//!
//! A [`Waiter`] races a condition over a continuously changing signal (the
//! playback position) against a deadline. Each call creates one
//! [`WaitRequest`] that ends in exactly one of three terminal states:
//!
//! ```text
//! Pending ──► Succeeded
//!         ├─► TimedOut
//!         └─► Cancelled
//! ```
//!
//! The state lives in a single atomic and only the first compare-and-swap out of
//! `Pending` takes effect, so a success, a timeout and an external cancel landing
//! in the same tick still produce one outcome.
//!
//! Events from the surface (`timeupdate`, `playing`, `ended`) only mean "check
//! now". The decision is always made on a fresh sample, never on the event
//! payload, which may be stale or coalesced. A poll tick covers sources that
//! emit nothing at all.

use crate::error::{Error, Result};
use crate::event_manager::{EventManager, ListenerHandle};
use crate::player::MediaSurface;
use cwh_common::events::{names, EventSource};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default interval between direct re-samples of the condition
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Events that prompt an immediate re-sample
const WAKE_EVENTS: [&str; 3] = [names::TIME_UPDATE, names::PLAYING, names::ENDED];

/// Terminal state of a wait request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitOutcome {
    Succeeded,
    TimedOut,
    Cancelled,
}

impl std::fmt::Display for WaitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitOutcome::Succeeded => write!(f, "SUCCEEDED"),
            WaitOutcome::TimedOut => write!(f, "TIMED_OUT"),
            WaitOutcome::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

const STATE_PENDING: u8 = 0;
const STATE_SUCCEEDED: u8 = 1;
const STATE_TIMED_OUT: u8 = 2;
const STATE_CANCELLED: u8 = 3;

impl WaitOutcome {
    fn as_state(self) -> u8 {
        match self {
            WaitOutcome::Succeeded => STATE_SUCCEEDED,
            WaitOutcome::TimedOut => STATE_TIMED_OUT,
            WaitOutcome::Cancelled => STATE_CANCELLED,
        }
    }

    fn from_state(state: u8) -> Option<Self> {
        match state {
            STATE_SUCCEEDED => Some(WaitOutcome::Succeeded),
            STATE_TIMED_OUT => Some(WaitOutcome::TimedOut),
            STATE_CANCELLED => Some(WaitOutcome::Cancelled),
            _ => None,
        }
    }
}

/// One outstanding deadline race
/// Deadline used when `now + timeout` does not fit the clock (about 30 years)
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

#[derive(Debug)]
pub struct WaitRequest {
    id: u64,
    label: String,
    timeout: Duration,
    deadline: Instant,
    state: AtomicU8,
    token: CancellationToken,
}

impl WaitRequest {
    fn new(id: u64, label: String, timeout: Duration, token: CancellationToken) -> Self {
        Self {
            id,
            label,
            timeout,
            deadline: deadline_after(timeout),
            state: AtomicU8::new(STATE_PENDING),
            token,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Terminal outcome, or `None` while pending
    pub fn outcome(&self) -> Option<WaitOutcome> {
        WaitOutcome::from_state(self.state.load(Ordering::SeqCst))
    }

    pub fn is_pending(&self) -> bool {
        self.outcome().is_none()
    }

    /// Move out of `Pending`
    ///
    /// Returns true if this call decided the outcome; false if the request was
    /// already terminal, in which case nothing changes.
    pub fn resolve(&self, outcome: WaitOutcome) -> bool {
        self.state
            .compare_exchange(
                STATE_PENDING,
                outcome.as_state(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Cancel from outside the waiting task
    ///
    /// Idempotent. Wakes the waiting task so it releases its listeners.
    pub fn cancel(&self) -> bool {
        let decided = self.resolve(WaitOutcome::Cancelled);
        self.token.cancel();
        decided
    }
}

/// Summary of a finished wait request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaitRecord {
    pub id: u64,
    pub label: String,
    pub outcome: WaitOutcome,
    pub timeout_ms: u64,
    pub elapsed_ms: u64,
}

#[derive(Default)]
struct WaiterShared {
    outstanding: Vec<Arc<WaitRequest>>,
    records: Vec<WaitRecord>,
}

/// Deadline-bounded waits over a media surface
///
/// Cloning yields another handle to the same waiter (same scope token,
/// outstanding set and records), which is how an error listener cancels waits
/// owned by the step sequence.
#[derive(Clone)]
pub struct Waiter {
    event_manager: EventManager,
    poll_interval: Duration,
    scope: CancellationToken,
    shared: Arc<Mutex<WaiterShared>>,
    next_id: Arc<AtomicU64>,
}

impl Waiter {
    pub fn new(event_manager: EventManager) -> Self {
        Self {
            event_manager,
            poll_interval: DEFAULT_POLL_INTERVAL,
            scope: CancellationToken::new(),
            shared: Arc::new(Mutex::new(WaiterShared::default())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        // A zero period would make tokio::time::interval panic
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    /// Tie every request to `scope`: cancelling it cancels all outstanding waits
    pub fn with_cancellation(mut self, scope: CancellationToken) -> Self {
        self.scope = scope;
        self
    }

    fn lock(&self) -> MutexGuard<'_, WaiterShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests that have not reached a terminal state
    pub fn outstanding(&self) -> Vec<Arc<WaitRequest>> {
        self.lock().outstanding.clone()
    }

    /// Finished requests, in completion order
    pub fn records(&self) -> Vec<WaitRecord> {
        self.lock().records.clone()
    }

    /// Cancel every outstanding request and any request started afterwards
    ///
    /// Idempotent. Requests already terminal keep their outcome.
    pub fn cancel_all(&self) {
        let outstanding = self.outstanding();
        for request in &outstanding {
            if request.cancel() {
                debug!(request = request.id, label = %request.label, "wait cancelled");
            }
        }
        self.scope.cancel();
    }

    /// Succeed as soon as `sample(source)` differs from its value at call time
    ///
    /// Fails with [`Error::WaitTimeout`] if no change is seen within `timeout`.
    /// Reaching end of stream does not count as movement.
    pub async fn wait_for_movement<S, T, F>(&self, source: &S, sample: F, timeout: Duration) -> Result<()>
    where
        S: EventSource + ?Sized,
        T: PartialEq + std::fmt::Debug,
        F: Fn(&S) -> T,
    {
        let initial = sample(source);
        debug!(?initial, ?timeout, "waiting for movement");
        self.race(source, "movement", timeout, |s| sample(s) != initial).await
    }

    /// Succeed once `sample(source) >= initial + delta`, or once the source ends
    ///
    /// Fails with [`Error::WaitTimeout`] if neither happens within
    /// `overall_timeout`, and with [`Error::Configuration`] for a NaN or
    /// negative `delta`.
    pub async fn wait_until_threshold_or_timeout<S, F>(
        &self,
        source: &S,
        sample: F,
        delta: f64,
        overall_timeout: Duration,
    ) -> Result<()>
    where
        S: MediaSurface + ?Sized,
        F: Fn(&S) -> f64,
    {
        if !delta.is_finite() || delta < 0.0 {
            return Err(Error::Configuration(format!(
                "progress delta must be a non-negative number of seconds, got {delta}"
            )));
        }
        let initial = sample(source);
        let target = initial + delta;
        debug!(initial, target, ?overall_timeout, "waiting for threshold");
        let label = format!("progress of {delta}s");
        self.race(source, &label, overall_timeout, |s| s.ended() || sample(s) >= target)
            .await
    }

    /// `wait_for_movement` on the surface playhead
    pub async fn wait_for_playhead_movement<S>(&self, surface: &S, timeout: Duration) -> Result<()>
    where
        S: MediaSurface + ?Sized,
    {
        self.wait_for_movement(surface, |s: &S| s.position(), timeout).await
    }

    /// Play for `seconds`, stopping early at end of stream
    pub async fn wait_until_playhead_reaches<S>(
        &self,
        surface: &S,
        seconds: f64,
        overall_timeout: Duration,
    ) -> Result<()>
    where
        S: MediaSurface + ?Sized,
    {
        self.wait_until_threshold_or_timeout(surface, |s: &S| s.position(), seconds, overall_timeout)
            .await
    }

    async fn race<S, C>(&self, source: &S, label: &str, timeout: Duration, condition: C) -> Result<()>
    where
        S: EventSource + ?Sized,
        C: Fn(&S) -> bool,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let request = Arc::new(WaitRequest::new(
            id,
            label.to_string(),
            timeout,
            self.scope.child_token(),
        ));
        let wake = Arc::new(Notify::new());

        // Dropping the guard releases listeners and records the outcome, also
        // when this future is dropped mid-wait
        let mut guard = RequestGuard::new(self, request.clone());
        for event_type in WAKE_EVENTS {
            let wake = wake.clone();
            guard.handles.push(self.event_manager.listen(source, event_type, move |_| {
                wake.notify_one();
            }));
        }

        let deadline = tokio::time::sleep_until(request.deadline);
        tokio::pin!(deadline);
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if !request.is_pending() || request.token.is_cancelled() {
                request.resolve(WaitOutcome::Cancelled);
                break;
            }
            if condition(source) {
                request.resolve(WaitOutcome::Succeeded);
                break;
            }

            tokio::select! {
                biased;
                _ = request.token.cancelled() => {
                    request.resolve(WaitOutcome::Cancelled);
                    break;
                }
                _ = &mut deadline => {
                    // Last authoritative sample before giving up
                    let outcome = if condition(source) {
                        WaitOutcome::Succeeded
                    } else {
                        WaitOutcome::TimedOut
                    };
                    request.resolve(outcome);
                    break;
                }
                _ = wake.notified() => {}
                _ = poll.tick() => {}
            }
        }

        let outcome = request.outcome().unwrap_or(WaitOutcome::Cancelled);
        drop(guard);

        match outcome {
            WaitOutcome::Succeeded => {
                info!(request = id, label, "wait succeeded");
                Ok(())
            }
            WaitOutcome::TimedOut => {
                warn!(request = id, label, ?timeout, "wait timed out");
                Err(Error::WaitTimeout {
                    label: label.to_string(),
                    timeout,
                })
            }
            WaitOutcome::Cancelled => {
                debug!(request = id, label, "wait ended by cancellation");
                Err(Error::WaitCancelled(label.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.lock();
        f.debug_struct("Waiter")
            .field("poll_interval", &self.poll_interval)
            .field("outstanding", &shared.outstanding.len())
            .field("finished", &shared.records.len())
            .field("cancelled", &self.scope.is_cancelled())
            .finish()
    }
}

/// Owns the resources of one request for its whole lifetime
struct RequestGuard<'a> {
    waiter: &'a Waiter,
    request: Arc<WaitRequest>,
    handles: Vec<ListenerHandle>,
    started: Instant,
}

impl<'a> RequestGuard<'a> {
    fn new(waiter: &'a Waiter, request: Arc<WaitRequest>) -> Self {
        waiter.lock().outstanding.push(request.clone());
        Self {
            waiter,
            request,
            handles: Vec::new(),
            started: Instant::now(),
        }
    }
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            self.waiter.event_manager.unlisten(&handle);
        }
        // Dropped while pending means the awaiting future itself was abandoned
        self.request.resolve(WaitOutcome::Cancelled);
        let outcome = self.request.outcome().unwrap_or(WaitOutcome::Cancelled);

        let record = WaitRecord {
            id: self.request.id,
            label: self.request.label.clone(),
            outcome,
            timeout_ms: self.request.timeout.as_millis() as u64,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        };
        let mut shared = self.waiter.lock();
        shared.outstanding.retain(|r| r.id != self.request.id);
        shared.records.push(record);
    }
}

// ========================================
// Tests
// ========================================
