//! Shared registry of saved item ids.
//!
//! The registry lives outside any single profile. Several screens may mark
//! and unmark items, and each interested party observes the ids it cares
//! about. Observers are notified only when an id actually changes state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tracing::{debug, trace};
use uniflow::Teardown;

/// Called with `(id, saved)` whenever an observed id changes.
pub type Observer = Arc<dyn Fn(&str, bool) + Send + Sync>;

#[async_trait]
pub trait SaveRegistry: Send + Sync {
    /// Mark `id` as saved. Returns `true` if this changed anything.
    async fn mark_saved(&self, id: &str) -> bool;

    /// Remove the mark on `id`. Returns `true` if this changed anything.
    async fn unmark(&self, id: &str) -> bool;

    fn is_saved(&self, id: &str) -> bool;

    /// Saved ids in the order they were first marked.
    fn saved_ids(&self) -> Vec<String>;

    /// Watch `id` until the returned teardown runs.
    fn observe(&self, id: &str, observer: Observer) -> Teardown;
}

#[derive(Default)]
struct RegistryState {
    saved: Vec<String>,
    observers: HashMap<String, Vec<(u64, Observer)>>,
    next_token: u64,
    registrations: usize,
    changes: usize,
}

impl RegistryState {
    fn observers_of(&self, id: &str) -> Vec<Observer> {
        self.observers
            .get(id)
            .map(|list| list.iter().map(|(_, observer)| observer.clone()).collect())
            .unwrap_or_default()
    }
}

/// Process-local [`SaveRegistry`].
#[derive(Clone, Default)]
pub struct InMemorySaveRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl InMemorySaveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Apply a change and notify observers outside the lock.
    fn apply(&self, id: &str, saved: bool) -> bool {
        let observers = {
            let mut state = self.lock();
            let present = state.saved.iter().any(|s| s == id);
            if present == saved {
                trace!(id, saved, "registry unchanged");
                return false;
            }

            if saved {
                state.saved.push(id.to_string());
            } else {
                state.saved.retain(|s| s != id);
            }
            state.changes += 1;
            state.observers_of(id)
        };

        debug!(id, saved, observers = observers.len(), "registry changed");
        for observer in observers {
            observer(id, saved);
        }
        true
    }

    /// Active observers of `id`.
    pub fn observer_count(&self, id: &str) -> usize {
        self.lock().observers.get(id).map_or(0, Vec::len)
    }

    /// Active observers across all ids.
    pub fn total_observers(&self) -> usize {
        self.lock().observers.values().map(Vec::len).sum()
    }

    /// Observer registrations ever made.
    pub fn registrations(&self) -> usize {
        self.lock().registrations
    }

    /// State changes ever applied. Redundant marks do not count.
    pub fn change_count(&self) -> usize {
        self.lock().changes
    }
}

fn unregister(state: &Weak<Mutex<RegistryState>>, id: &str, token: u64) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let mut state = state.lock().unwrap_or_else(|p| p.into_inner());
    if let Some(list) = state.observers.get_mut(id) {
        list.retain(|(t, _)| *t != token);
        if list.is_empty() {
            state.observers.remove(id);
        }
    }
}

#[async_trait]
impl SaveRegistry for InMemorySaveRegistry {
    async fn mark_saved(&self, id: &str) -> bool {
        self.apply(id, true)
    }

    async fn unmark(&self, id: &str) -> bool {
        self.apply(id, false)
    }

    fn is_saved(&self, id: &str) -> bool {
        self.lock().saved.iter().any(|s| s == id)
    }

    fn saved_ids(&self) -> Vec<String> {
        self.lock().saved.clone()
    }

    fn observe(&self, id: &str, observer: Observer) -> Teardown {
        let token = {
            let mut state = self.lock();
            let token = state.next_token;
            state.next_token += 1;
            state.registrations += 1;
            state
                .observers
                .entry(id.to_string())
                .or_default()
                .push((token, observer));
            token
        };

        let state = Arc::downgrade(&self.state);
        let id = id.to_string();
        Teardown::new(move || unregister(&state, &id, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uniflow::Subscription;

    fn counting_observer() -> (Observer, Arc<Mutex<Vec<(String, bool)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: Observer = Arc::new(move |id: &str, saved: bool| {
            sink.lock().unwrap().push((id.to_string(), saved));
        });
        (observer, seen)
    }

    #[tokio::test]
    async fn test_mark_twice_changes_once() {
        let registry = InMemorySaveRegistry::new();
        let (observer, seen) = counting_observer();
        let _watch = registry.observe("14", observer);

        assert!(registry.mark_saved("14").await);
        assert!(!registry.mark_saved("14").await);

        assert_eq!(registry.saved_ids(), vec!["14".to_string()]);
        assert_eq!(registry.change_count(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![("14".to_string(), true)]);
    }

    #[tokio::test]
    async fn test_unmark_unknown_is_noop() {
        let registry = InMemorySaveRegistry::new();
        assert!(!registry.unmark("99").await);
        assert_eq!(registry.change_count(), 0);
    }

    #[tokio::test]
    async fn test_observers_only_hear_their_id() {
        let registry = InMemorySaveRegistry::new();
        let (observer, seen) = counting_observer();
        let _watch = registry.observe("16", observer);

        registry.mark_saved("14").await;
        registry.mark_saved("16").await;
        registry.unmark("16").await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("16".to_string(), true), ("16".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_teardown_stops_notifications_and_is_idempotent() {
        let registry = InMemorySaveRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut watch = registry.observe(
            "14",
            Arc::new(move |_: &str, _: bool| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(registry.observer_count("14"), 1);

        watch.teardown().unwrap();
        watch.teardown().unwrap();
        assert_eq!(registry.observer_count("14"), 0);

        registry.mark_saved("14").await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.registrations(), 1);
    }

    #[test]
    fn test_teardown_after_registry_dropped() {
        let registry = InMemorySaveRegistry::new();
        let (observer, _seen) = counting_observer();
        let mut watch = registry.observe("14", observer);

        drop(registry);
        watch.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_observer_may_reenter_registry() {
        let registry = InMemorySaveRegistry::new();
        let inner = registry.clone();
        let _watch = registry.observe(
            "14",
            Arc::new(move |id: &str, _: bool| {
                // Would deadlock if notified under the lock
                assert!(inner.is_saved(id));
                let _nested = inner.observe(id, Arc::new(|_: &str, _: bool| {}));
            }),
        );

        registry.mark_saved("14").await;
        assert_eq!(registry.observer_count("14"), 1);
    }
}
