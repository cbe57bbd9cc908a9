//! Waiter integration tests
//!
//! All tests run on paused tokio time, so "resolves at ~2s, not 10s" is
//! asserted exactly against the virtual clock.

mod helpers;

use cwh_common::events::EventSource;
use cwh_common::MediaEvent;
use cwh_runner::error::Error;
use cwh_runner::event_manager::EventManager;
use cwh_runner::player::MediaSurface;
use cwh_runner::waiter::{WaitOutcome, Waiter};
use helpers::{elapsed_ms, FakeSurface};
use std::time::Duration;
use tokio::time::Instant;

fn waiter(event_manager: &EventManager) -> Waiter {
    Waiter::new(event_manager.clone()).with_poll_interval(Duration::from_millis(250))
}

#[tokio::test(start_paused = true)]
async fn test_movement_resolves_when_playhead_moves_not_at_timeout() {
    let event_manager = EventManager::new();
    let waiter = waiter(&event_manager);
    let surface = FakeSurface::moving_after(Duration::from_secs(2));

    let start = Instant::now();
    waiter
        .wait_for_playhead_movement(&surface, Duration::from_secs(10))
        .await
        .unwrap();

    let elapsed = elapsed_ms(start);
    assert!(elapsed > 2000 && elapsed <= 2250, "resolved after {elapsed}ms");
    assert_eq!(waiter.records()[0].outcome, WaitOutcome::Succeeded);
    assert!(event_manager.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_movement_times_out_at_deadline() {
    let event_manager = EventManager::new();
    let waiter = waiter(&event_manager);
    let surface = FakeSurface::frozen();

    let start = Instant::now();
    let err = waiter
        .wait_for_playhead_movement(&surface, Duration::from_secs(3))
        .await
        .unwrap_err();

    assert_eq!(elapsed_ms(start), 3000);
    assert!(matches!(err, Error::WaitTimeout { ref label, timeout } if label == "movement" && timeout == Duration::from_secs(3)));
    let records = waiter.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, WaitOutcome::TimedOut);
    assert!(event_manager.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_threshold_succeeds_at_end_of_stream() {
    let event_manager = EventManager::new();
    let waiter = waiter(&event_manager);
    // Content is 4s long, the wait asks for 10s of playback
    let surface = FakeSurface::moving_after(Duration::ZERO).ending_after(Duration::from_secs(4));

    let start = Instant::now();
    waiter
        .wait_until_playhead_reaches(&surface, 10.0, Duration::from_secs(30))
        .await
        .unwrap();

    let elapsed = elapsed_ms(start);
    assert!((4000..=4250).contains(&elapsed), "resolved after {elapsed}ms");
}

#[tokio::test(start_paused = true)]
async fn test_threshold_succeeds_once_delta_is_covered() {
    let event_manager = EventManager::new();
    let waiter = waiter(&event_manager);
    let surface = FakeSurface::moving_after(Duration::ZERO);

    // Start from 3s in: the threshold is relative to the initial sample
    tokio::time::sleep(Duration::from_secs(3)).await;
    let start = Instant::now();
    waiter
        .wait_until_playhead_reaches(&surface, 5.0, Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(elapsed_ms(start), 5000);
}

#[tokio::test(start_paused = true)]
async fn test_threshold_times_out_when_stalled() {
    let event_manager = EventManager::new();
    let waiter = waiter(&event_manager);
    let surface = FakeSurface::frozen();

    let start = Instant::now();
    let err = waiter
        .wait_until_playhead_reaches(&surface, 5.0, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert_eq!(elapsed_ms(start), 30_000);
    assert!(matches!(err, Error::WaitTimeout { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_end_of_stream_does_not_count_as_movement() {
    let event_manager = EventManager::new();
    let waiter = waiter(&event_manager);
    let surface = FakeSurface::frozen().ending_after(Duration::ZERO);

    let err = waiter
        .wait_for_playhead_movement(&surface, Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WaitTimeout { .. }));

    // The same surface satisfies a threshold wait immediately
    let start = Instant::now();
    waiter
        .wait_until_playhead_reaches(&surface, 5.0, Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(elapsed_ms(start), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeupdate_event_triggers_immediate_resample() {
    let event_manager = EventManager::new();
    // Poll far slower than the event so only the event can explain the timing
    let waiter = Waiter::new(event_manager.clone()).with_poll_interval(Duration::from_secs(20));
    let surface = FakeSurface::moving_after(Duration::from_secs(1));

    let start = Instant::now();
    let (result, _) = tokio::join!(
        waiter.wait_for_playhead_movement(&surface, Duration::from_secs(10)),
        async {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            surface.emit(MediaEvent::TimeUpdate { position: 0.5 });
        }
    );

    result.unwrap();
    assert_eq!(elapsed_ms(start), 1500);
}

#[tokio::test(start_paused = true)]
async fn test_stale_event_payload_is_not_trusted() {
    let event_manager = EventManager::new();
    let waiter = waiter(&event_manager);
    let surface = FakeSurface::frozen();

    let (result, _) = tokio::join!(
        waiter.wait_for_playhead_movement(&surface, Duration::from_secs(2)),
        async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            // Payload claims movement, a fresh sample says otherwise
            surface.emit(MediaEvent::TimeUpdate { position: 99.0 });
            surface.emit(MediaEvent::TimeUpdate { position: 99.0 });
        }
    );

    assert!(matches!(result, Err(Error::WaitTimeout { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all_resolves_outstanding_wait_as_cancelled() {
    let event_manager = EventManager::new();
    let waiter = waiter(&event_manager);
    let surface = FakeSurface::frozen();

    let start = Instant::now();
    let (result, _) = tokio::join!(
        waiter.wait_until_playhead_reaches(&surface, 5.0, Duration::from_secs(30)),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(waiter.outstanding().len(), 1);
            waiter.cancel_all();
        }
    );

    assert_eq!(elapsed_ms(start), 1000);
    assert!(matches!(result, Err(Error::WaitCancelled(_))));
    assert_eq!(waiter.records()[0].outcome, WaitOutcome::Cancelled);
    assert!(waiter.outstanding().is_empty());
    assert!(event_manager.is_empty());
    assert_eq!(surface.event_target().listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_waits_after_cancel_all_resolve_cancelled_immediately() {
    let event_manager = EventManager::new();
    let waiter = waiter(&event_manager);
    let surface = FakeSurface::moving_after(Duration::ZERO);

    waiter.cancel_all();
    waiter.cancel_all();
    let result = waiter
        .wait_for_playhead_movement(&surface, Duration::from_secs(10))
        .await;

    assert!(matches!(result, Err(Error::WaitCancelled(_))));
    assert!(event_manager.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_wait_releases_listeners() {
    let event_manager = EventManager::new();
    let waiter = waiter(&event_manager);
    let surface = FakeSurface::frozen();

    let outer = tokio::time::timeout(
        Duration::from_secs(1),
        waiter.wait_for_playhead_movement(&surface, Duration::from_secs(10)),
    )
    .await;

    assert!(outer.is_err());
    assert!(event_manager.is_empty());
    assert_eq!(surface.event_target().listener_count(), 0);
    let records = waiter.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, WaitOutcome::Cancelled);
    let stats = event_manager.stats();
    assert_eq!(stats.registered, stats.released);
}

#[tokio::test(start_paused = true)]
async fn test_resolved_wait_keeps_its_outcome() {
    let event_manager = EventManager::new();
    let waiter = waiter(&event_manager);
    let surface = FakeSurface::moving_after(Duration::ZERO);

    waiter
        .wait_for_playhead_movement(&surface, Duration::from_secs(5))
        .await
        .unwrap();
    waiter.cancel_all();

    let records = waiter.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, WaitOutcome::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_generic_movement_over_custom_sample() {
    let event_manager = EventManager::new();
    let waiter = waiter(&event_manager);
    let surface = FakeSurface::moving_after(Duration::from_millis(600));

    // Whole seconds only: movement is seen once the playhead passes 1.0
    let start = Instant::now();
    waiter
        .wait_for_movement(&surface, |s: &FakeSurface| s.position().floor() as u64, Duration::from_secs(5))
        .await
        .unwrap();

    let elapsed = elapsed_ms(start);
    assert!((1600..=1750).contains(&elapsed), "resolved after {elapsed}ms");
}

#[tokio::test(start_paused = true)]
async fn test_invalid_threshold_delta_is_rejected_without_waiting() {
    let event_manager = EventManager::new();
    let waiter = waiter(&event_manager);
    let surface = FakeSurface::moving_after(Duration::ZERO);

    let start = Instant::now();
    for delta in [f64::NAN, -0.5] {
        let result = waiter
            .wait_until_playhead_reaches(&surface, delta, Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(Error::Configuration(_))), "delta {delta}");
    }

    assert_eq!(elapsed_ms(start), 0);
    assert!(waiter.records().is_empty());
    assert_eq!(surface.event_target().listener_count(), 0);
}
