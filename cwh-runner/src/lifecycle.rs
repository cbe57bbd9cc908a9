//! Scenario lifecycle
//!
//! Drives one player through attach → configure → load → play → waits, then
//! tears it down. The sequence for each scenario:
//!
//! 1. Evaluate skip predicates; a skipped scenario never touches the player
//! 2. Create and attach a fresh player
//! 3. Install the error listener (first error fails the scenario and cancels
//!    every outstanding wait)
//! 4. Apply configuration (base + scenario overrides + server certificate)
//! 5. Load the content
//! 6. Start playback
//! 7. Check post-load expectations, wait for movement, then for progress
//! 8. Stop at the first failing step
//! 9. Unload, release every listener and destroy, on every exit path
//!
//! The error listener runs alongside the step sequence: an error event cancels
//! the scenario token, which pre-empts whatever step is in flight.

use crate::error::{Error, FailureCategory, Result};
use crate::event_manager::EventManager;
use crate::player::{AdvancedDrmConfig, MediaBackend, MediaPlayer, MediaSurface, PlayerConfig};
use crate::report::{RunReport, ScenarioOutcome, ScenarioReport};
use crate::scenario::skip::{self, Environment, SkipDecision};
use crate::scenario::{Scenario, ScenarioMatrix};
use crate::waiter::{Waiter, DEFAULT_POLL_INTERVAL};
use cwh_common::events::names;
use cwh_common::MediaEvent;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Scenario sequence numbers for reporting; no correctness role
static SCENARIO_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_sequence() -> u64 {
    SCENARIO_COUNTER.fetch_add(1, Ordering::SeqCst) + 1
}

#[derive(Default)]
struct ContextState {
    failure: Option<(FailureCategory, String)>,
    suppressed: Vec<String>,
}

/// Per-scenario failure state
///
/// Replaces any process-wide "error means fail" policy: each scenario gets its
/// own context, created fresh and dropped with the scenario. The first recorded
/// failure decides the outcome; later ones are kept for the report only.
#[derive(Clone)]
pub struct ScenarioContext {
    scenario_id: Arc<str>,
    token: CancellationToken,
    state: Arc<Mutex<ContextState>>,
}

impl ScenarioContext {
    pub fn new(scenario_id: &str) -> Self {
        Self {
            scenario_id: Arc::from(scenario_id),
            token: CancellationToken::new(),
            state: Arc::new(Mutex::new(ContextState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn scenario_id(&self) -> &str {
        &self.scenario_id
    }

    /// Token cancelled as soon as the scenario fails
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Record a failure
    ///
    /// Returns true if this failure decided the outcome. Later failures are
    /// recorded as suppressed and trigger nothing.
    pub fn fail(&self, error: &Error) -> bool {
        let decided = {
            let mut state = self.lock();
            if state.failure.is_none() {
                state.failure = Some((error.category(), error.detail()));
                true
            } else {
                state.suppressed.push(error.to_string());
                false
            }
        };
        if decided {
            self.token.cancel();
        }
        decided
    }

    /// Keep an observation for the report without affecting the outcome
    pub fn note_suppressed(&self, message: String) {
        self.lock().suppressed.push(message);
    }

    pub fn is_failed(&self) -> bool {
        self.lock().failure.is_some()
    }

    pub fn failure(&self) -> Option<(FailureCategory, String)> {
        self.lock().failure.clone()
    }

    pub fn suppressed(&self) -> Vec<String> {
        self.lock().suppressed.clone()
    }

    pub fn outcome(&self) -> ScenarioOutcome {
        match self.failure() {
            Some((category, detail)) => ScenarioOutcome::Failed { category, detail },
            None => ScenarioOutcome::Passed,
        }
    }
}

impl std::fmt::Debug for ScenarioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioContext")
            .field("scenario_id", &self.scenario_id)
            .field("failure", &self.failure())
            .finish()
    }
}

/// Knobs shared by every scenario of a run
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Waiter re-sample interval
    pub poll_interval: Duration,
    /// Configuration applied before each scenario's overrides
    pub base_config: PlayerConfig,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            base_config: PlayerConfig {
                streaming: crate::player::StreamingConfig::strict(),
                ..PlayerConfig::default()
            },
        }
    }
}

/// Everything owned by one running scenario
struct ScenarioResources {
    context: ScenarioContext,
    event_manager: EventManager,
    waiter: Waiter,
    player: Arc<dyn MediaPlayer>,
    surface: Arc<dyn MediaSurface>,
    key_status_changes: Arc<AtomicUsize>,
}

/// Runs scenarios against a media backend, one at a time
pub struct TestLifecycle {
    backend: Arc<dyn MediaBackend>,
    environment: Environment,
    options: LifecycleOptions,
}

impl TestLifecycle {
    pub fn new(backend: Arc<dyn MediaBackend>, environment: Environment) -> Self {
        Self {
            backend,
            environment,
            options: LifecycleOptions::default(),
        }
    }

    pub fn with_options(mut self, options: LifecycleOptions) -> Self {
        self.options = options;
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Run every scenario in declaration order
    ///
    /// A failing scenario never aborts the run.
    pub async fn run_matrix(&self, matrix: &ScenarioMatrix) -> RunReport {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        info!(scenarios = matrix.len(), backend = self.backend.name(), "starting run");

        let mut reports = Vec::with_capacity(matrix.len());
        for scenario in matrix {
            reports.push(self.run_scenario(scenario).await);
        }

        let report = RunReport::new(
            self.backend.name(),
            started_at,
            start.elapsed().as_millis() as u64,
            reports,
        );
        info!(
            passed = report.summary.passed,
            failed = report.summary.failed,
            skipped = report.summary.skipped,
            "run complete"
        );
        report
    }

    /// Run one scenario through the full lifecycle
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioReport {
        let sequence = next_sequence();
        let id = scenario.id();

        if let SkipDecision::Skip(reason) = skip::evaluate_all(scenario.skip_predicates(), &self.environment) {
            info!(scenario = %id, %reason, "scenario skipped");
            return ScenarioReport::skipped(sequence, id, reason);
        }

        info!(scenario = %id, sequence, "scenario starting");
        let start = Instant::now();
        let context = ScenarioContext::new(id);
        let event_manager = EventManager::new();
        let waiter = Waiter::new(event_manager.clone())
            .with_poll_interval(self.options.poll_interval)
            .with_cancellation(context.token());

        let player = match self.backend.create_player() {
            Ok(player) => player,
            Err(e) => {
                error!(scenario = %id, error = %e, "failed to create player");
                context.fail(&e);
                return self.finish(sequence, scenario, &context, &event_manager, &waiter, 0, start);
            }
        };

        let resources = ScenarioResources {
            context: context.clone(),
            event_manager: event_manager.clone(),
            waiter: waiter.clone(),
            player,
            surface: self.backend.surface(),
            key_status_changes: Arc::new(AtomicUsize::new(0)),
        };

        let token = context.token();
        let steps = AssertUnwindSafe(self.run_steps(scenario, &resources)).catch_unwind();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(scenario = %id, "step sequence pre-empted");
                Ok(())
            }
            outcome = steps => match outcome {
                Ok(result) => result,
                Err(panic) => Err(Error::Internal(format!(
                    "scenario panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            },
        };
        match result {
            Ok(()) => {}
            // Fallout of a failure already recorded by the error listener
            Err(Error::WaitCancelled(_)) if context.is_failed() => {}
            Err(e) => {
                if context.fail(&e) {
                    error!(scenario = %id, category = %e.category(), error = %e, "scenario failed");
                }
            }
        }

        self.teardown(&resources).await;

        let key_status_changes = resources.key_status_changes.load(Ordering::SeqCst);
        self.finish(sequence, scenario, &context, &event_manager, &waiter, key_status_changes, start)
    }

    async fn run_steps(&self, scenario: &Scenario, resources: &ScenarioResources) -> Result<()> {
        let ScenarioResources {
            context,
            event_manager,
            waiter,
            player,
            surface,
            key_status_changes,
        } = resources;
        let id = scenario.id();
        let expectations = scenario.expectations();

        debug!(scenario = %id, "attaching player");
        player.attach(surface.clone()).await?;

        {
            let context = context.clone();
            let waiter = waiter.clone();
            event_manager.listen(player.as_ref(), names::ERROR, move |event| {
                if let MediaEvent::Error(detail) = event {
                    let error = Error::Player(detail.clone());
                    if context.fail(&error) {
                        error!(scenario = %context.scenario_id(), %detail, "player error");
                        waiter.cancel_all();
                    } else {
                        warn!(scenario = %context.scenario_id(), %detail, "player error after failure");
                    }
                }
            });
        }
        {
            let counter = key_status_changes.clone();
            event_manager.listen(player.as_ref(), names::KEY_STATUS_CHANGED, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        let config = self.resolve_config(scenario).await?;
        debug!(scenario = %id, "configuring player");
        player.configure(&config)?;

        info!(scenario = %id, content = %scenario.content(), "loading content");
        player.load(scenario.content()).await?;

        surface.play().await?;

        if let Some(expected) = expectations.expect_live {
            let actual = player.is_live();
            if actual != expected {
                return Err(Error::Assertion(format!(
                    "expected is_live() == {expected}, got {actual}"
                )));
            }
        }
        if let Some(expected) = expectations.expect_load_mode {
            let actual = player.load_mode();
            if actual != expected {
                return Err(Error::Assertion(format!(
                    "expected load mode {expected}, got {actual}"
                )));
            }
        }

        waiter
            .wait_for_playhead_movement(surface.as_ref(), expectations.movement_timeout)
            .await?;
        waiter
            .wait_until_playhead_reaches(
                surface.as_ref(),
                expectations.play_seconds,
                expectations.overall_timeout,
            )
            .await?;

        if expectations.require_key_status_change && key_status_changes.load(Ordering::SeqCst) == 0 {
            return Err(Error::Assertion(
                "expected at least one keystatuschanged event".to_string(),
            ));
        }

        Ok(())
    }

    /// Base config + scenario overrides + server certificate
    ///
    /// Also rejects a play duration the waiter could never reach.
    async fn resolve_config(&self, scenario: &Scenario) -> Result<PlayerConfig> {
        let play_seconds = scenario.expectations().play_seconds;
        if !play_seconds.is_finite() || play_seconds < 0.0 {
            return Err(Error::Configuration(format!(
                "play duration must be a non-negative number of seconds, got {play_seconds}"
            )));
        }

        let mut config = scenario.player_config(&self.options.base_config);

        if let Some(path) = scenario.server_certificate() {
            let key_system = scenario.key_system().ok_or_else(|| {
                Error::Configuration(format!(
                    "server certificate {} given without a key system",
                    path.display()
                ))
            })?;
            let certificate = tokio::fs::read(path).await.map_err(|e| {
                Error::Configuration(format!(
                    "failed to read server certificate {}: {e}",
                    path.display()
                ))
            })?;
            if certificate.is_empty() {
                return Err(Error::Configuration(format!(
                    "server certificate {} is empty",
                    path.display()
                )));
            }
            debug!(key_system, bytes = certificate.len(), "server certificate loaded");
            config
                .drm
                .advanced
                .entry(key_system.to_string())
                .or_insert_with(AdvancedDrmConfig::default)
                .server_certificate = Some(certificate);
        }

        Ok(config)
    }

    /// Unload, release listeners, destroy; failures here never skip a later step
    async fn teardown(&self, resources: &ScenarioResources) {
        let id = resources.context.scenario_id();
        debug!(scenario = %id, "tearing down");

        if let Err(e) = resources.player.unload().await {
            warn!(scenario = %id, error = %e, "unload failed");
            resources.context.note_suppressed(format!("unload: {e}"));
        }

        resources.event_manager.release_all();

        if let Err(e) = resources.player.destroy().await {
            warn!(scenario = %id, error = %e, "destroy failed");
            resources.context.note_suppressed(format!("destroy: {e}"));
        }

        let stats = resources.event_manager.stats();
        if stats.outstanding() > 0 {
            warn!(scenario = %id, outstanding = stats.outstanding(), "listeners outlived teardown");
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        sequence: u64,
        scenario: &Scenario,
        context: &ScenarioContext,
        event_manager: &EventManager,
        waiter: &Waiter,
        key_status_changes: usize,
        start: Instant,
    ) -> ScenarioReport {
        let outcome = context.outcome();
        let duration_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            ScenarioOutcome::Passed => info!(scenario = %scenario.id(), duration_ms, "scenario passed"),
            ScenarioOutcome::Failed { category, .. } => {
                info!(scenario = %scenario.id(), duration_ms, %category, "scenario finished with failure")
            }
            ScenarioOutcome::Skipped { .. } => {}
        }
        ScenarioReport {
            sequence,
            id: scenario.id().to_string(),
            outcome,
            duration_ms,
            waits: waiter.records(),
            suppressed_errors: context.suppressed(),
            listeners: event_manager.stats(),
            key_status_changes,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
