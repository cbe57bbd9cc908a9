//! Listener registry with bulk release
//!
//! Every listener the harness installs on a player or surface goes through an
//! [`EventManager`], which remembers the registration so it can be undone
//! later. `release_all()` at scenario teardown guarantees no listener outlives
//! its scenario.

use cwh_common::events::{EventSource, EventTarget, Listener, ListenerId};
use cwh_common::MediaEvent;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// One registration: (source, event name, callback id)
///
/// Only the [`EventManager`] that created it can release it.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    target: EventTarget,
    event_type: String,
    id: ListenerId,
}

impl ListenerHandle {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }
}

/// Registration counters used for leak reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    pub registered: usize,
    pub released: usize,
}

impl ListenerStats {
    /// Handles registered but not yet released
    pub fn outstanding(&self) -> usize {
        self.registered.saturating_sub(self.released)
    }
}

#[derive(Default)]
struct Registry {
    handles: Vec<ListenerHandle>,
    stats: ListenerStats,
}

/// Listener registry
///
/// Cloning yields another handle to the same registry, so wait requests and the
/// scenario lifecycle can release listeners they registered through a shared
/// manager.
#[derive(Clone, Default)]
pub struct EventManager {
    registry: Arc<Mutex<Registry>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` for `event_type` on `source`
    ///
    /// Multiple listeners for the same (source, event) fire in registration order.
    pub fn listen<S, F>(&self, source: &S, event_type: &str, callback: F) -> ListenerHandle
    where
        S: EventSource + ?Sized,
        F: Fn(&MediaEvent) + Send + Sync + 'static,
    {
        let target = source.event_target().clone();
        let callback: Listener = Arc::new(callback);
        let id = target.add_listener(event_type, callback);
        let handle = ListenerHandle {
            target,
            event_type: event_type.to_string(),
            id,
        };

        let mut registry = self.lock();
        registry.handles.push(handle.clone());
        registry.stats.registered += 1;
        trace!(%id, event_type, "listener registered");
        handle
    }

    /// Release one handle
    ///
    /// Releasing a handle twice, or one already swept by `release_all()`, is a no-op.
    pub fn unlisten(&self, handle: &ListenerHandle) {
        let tracked = {
            let mut registry = self.lock();
            let found = registry
                .handles
                .iter()
                .position(|h| h.id == handle.id && h.target.same_registry(&handle.target));
            match found {
                Some(index) => {
                    registry.handles.remove(index);
                    registry.stats.released += 1;
                    true
                }
                None => false,
            }
        };
        if tracked {
            handle.target.remove_listener(handle.id);
            trace!(id = %handle.id, event_type = %handle.event_type, "listener released");
        }
    }

    /// Release every tracked handle
    ///
    /// Idempotent, and safe to call from inside a callback being released: the
    /// handle list is detached under the lock before any listener is removed.
    pub fn release_all(&self) {
        let handles = {
            let mut registry = self.lock();
            let handles = std::mem::take(&mut registry.handles);
            registry.stats.released += handles.len();
            handles
        };
        if handles.is_empty() {
            return;
        }
        debug!(count = handles.len(), "releasing all listeners");
        for handle in handles {
            handle.target.remove_listener(handle.id);
        }
    }

    /// Number of handles currently tracked
    pub fn len(&self) -> usize {
        self.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ListenerStats {
        self.lock().stats
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.lock();
        f.debug_struct("EventManager")
            .field("tracked", &registry.handles.len())
            .field("stats", &registry.stats)
            .finish()
    }
}

// ========================================
// Tests
// ========================================

#[cfg(test)]
mod tests {
    use super::*;
    use cwh_common::events::names;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&MediaEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move |_: &MediaEvent| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_listen_and_dispatch() {
        let source = EventTarget::new();
        let manager = EventManager::new();
        let (count, callback) = counter();

        manager.listen(&source, names::ENDED, callback);
        source.dispatch(&MediaEvent::Ended);
        source.dispatch(&MediaEvent::Playing);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_unlisten_stops_delivery() {
        let source = EventTarget::new();
        let manager = EventManager::new();
        let (count, callback) = counter();

        let handle = manager.listen(&source, names::ENDED, callback);
        manager.unlisten(&handle);
        manager.unlisten(&handle);
        source.dispatch(&MediaEvent::Ended);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(manager.is_empty());
        assert_eq!(manager.stats(), ListenerStats { registered: 1, released: 1 });
    }

    #[test]
    fn test_release_all_is_idempotent() {
        let source = EventTarget::new();
        let manager = EventManager::new();
        manager.listen(&source, names::ENDED, |_| {});
        manager.listen(&source, names::ERROR, |_| {});

        manager.release_all();
        manager.release_all();

        assert!(manager.is_empty());
        assert_eq!(source.listener_count(), 0);
        assert_eq!(manager.stats().outstanding(), 0);
        assert_eq!(manager.stats().released, 2);
    }

    #[test]
    fn test_release_all_on_empty_registry() {
        let manager = EventManager::new();
        manager.release_all();
        assert_eq!(manager.stats(), ListenerStats::default());
    }

    #[test]
    fn test_release_all_from_inside_callback() {
        let source = EventTarget::new();
        let manager = EventManager::new();
        let (count, later) = counter();

        let inner_manager = manager.clone();
        manager.listen(&source, names::ENDED, move |_| inner_manager.release_all());
        manager.listen(&source, names::ENDED, later);

        source.dispatch(&MediaEvent::Ended);
        source.dispatch(&MediaEvent::Ended);

        // The second listener was released before its turn came
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(manager.is_empty());
        assert_eq!(source.listener_count(), 0);
    }

    #[test]
    fn test_unlisten_after_release_all_is_noop() {
        let source = EventTarget::new();
        let manager = EventManager::new();
        let handle = manager.listen(&source, names::PLAYING, |_| {});
        manager.release_all();
        manager.unlisten(&handle);
        assert_eq!(manager.stats(), ListenerStats { registered: 1, released: 1 });
    }
}
