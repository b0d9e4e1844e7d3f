use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant, SystemTime};

use super::action::Action;
use super::domains::game::{self, GameState};
use super::domains::system::{self, SystemState};
use super::domains::visualization::{self, VisualizationState};
use super::error::StoreError;
use super::perf::{PerformanceMonitor, PerformanceSample, SampleCallback, SampleVerdict};
use super::persist::{PersistedEnvelope, PersistenceAdapter};
use super::reducer::{same_slice, GlobalState, ReducerRegistry, Slice};
use super::ring::BoundedRing;
use crate::time::{Scheduler, TaskHandle};

/// Type of the synthetic action subscribers see after a successful restore.
pub const RESTORE_ACTION: &str = "store/restore";

/// Action types whose effects are persisted by default.
pub const DEFAULT_CRITICAL_ACTIONS: [&str; 5] = [
    game::UPDATE_SCORE,
    game::SET_LEVEL,
    visualization::SWITCH_SYSTEM,
    visualization::UPDATE_PARAMETERS,
    system::SET_PERFORMANCE_LEVEL,
];

/// Store configuration.
#[derive(Clone)]
pub struct StoreConfig {
    /// Log every reducer sample at debug level and slow ones at warn level.
    pub enable_performance_logging: bool,
    /// Reducers at or above this duration trigger `on_slow_reducer`.
    pub slow_reducer_threshold: Duration,
    pub max_performance_samples: usize,
    /// Capacity of the dispatched-action history.
    pub max_history: usize,
    /// Trailing-edge delay before a critical action is written out.
    pub persist_debounce: Duration,
    pub storage_key: String,
    pub critical_actions: BTreeSet<String>,
    pub on_performance_sample: SampleCallback,
    pub on_slow_reducer: SampleCallback,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enable_performance_logging: false,
            slow_reducer_threshold: Duration::from_millis(16),
            max_performance_samples: 200,
            max_history: 100,
            persist_debounce: Duration::from_millis(500),
            storage_key: "lattice/state".to_string(),
            critical_actions: DEFAULT_CRITICAL_ACTIONS.iter().map(|s| s.to_string()).collect(),
            on_performance_sample: Rc::new(|_| {}),
            on_slow_reducer: Rc::new(|_| {}),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("enable_performance_logging", &self.enable_performance_logging)
            .field("slow_reducer_threshold", &self.slow_reducer_threshold)
            .field("max_performance_samples", &self.max_performance_samples)
            .field("max_history", &self.max_history)
            .field("persist_debounce", &self.persist_debounce)
            .field("storage_key", &self.storage_key)
            .field("critical_actions", &self.critical_actions)
            .finish_non_exhaustive()
    }
}

/// One dispatched action, as recorded in the store's history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub action: Action,
    pub timestamp: SystemTime,
    /// Whether any slice changed.
    pub changed: bool,
}

type Listener = Box<dyn Fn(&Rc<GlobalState>, &Rc<GlobalState>, &Action)>;

struct Subscriber {
    id: u64,
    live: Cell<bool>,
    listener: Listener,
}

struct StoreInner {
    config: StoreConfig,
    storage: Rc<dyn PersistenceAdapter>,
    scheduler: Rc<dyn Scheduler>,

    registry: RefCell<ReducerRegistry>,
    state: RefCell<Rc<GlobalState>>,
    subscribers: RefCell<Vec<Rc<Subscriber>>>,
    next_subscriber: Cell<u64>,

    perf: RefCell<PerformanceMonitor>,
    history: RefCell<BoundedRing<HistoryEntry>>,

    pending_persist: Cell<Option<TaskHandle>>,
    destroyed: Cell<bool>,
}

/// Single source of truth for cross-cutting state.
///
/// Dispatch is synchronous: every reducer runs, samples are recorded, then
/// subscribers are notified in subscription order before `dispatch` returns.
/// Critical actions additionally schedule a debounced write of the
/// [`PersistedEnvelope`].
///
/// `StateStore` is a cheap handle; clones share the same store.
#[derive(Clone)]
pub struct StateStore {
    inner: Rc<StoreInner>,
}

/// Handle returned by [`StateStore::subscribe`].
///
/// Dropping it does not unsubscribe.
pub struct Unsubscribe {
    id: u64,
    store: Weak<StoreInner>,
}

impl Unsubscribe {
    /// Removes the listener. Idempotent, and safe to call from inside a
    /// listener; a listener removed mid-notification is not called again.
    pub fn unsubscribe(&self) {
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        inner.subscribers.borrow_mut().retain(|sub| {
            if sub.id == self.id {
                sub.live.set(false);
                false
            } else {
                true
            }
        });
    }
}

impl StateStore {
    /// Creates an empty store with no domains.
    pub fn new(config: StoreConfig, storage: Rc<dyn PersistenceAdapter>, scheduler: Rc<dyn Scheduler>) -> Self {
        let perf = PerformanceMonitor::new(
            config.max_performance_samples,
            config.slow_reducer_threshold,
            config.enable_performance_logging,
        );
        let history = BoundedRing::new(config.max_history);

        Self {
            inner: Rc::new(StoreInner {
                config,
                storage,
                scheduler,
                registry: RefCell::new(ReducerRegistry::default()),
                state: RefCell::new(Rc::new(GlobalState::default())),
                subscribers: RefCell::new(Vec::new()),
                next_subscriber: Cell::new(0),
                perf: RefCell::new(perf),
                history: RefCell::new(history),
                pending_persist: Cell::new(None),
                destroyed: Cell::new(false),
            }),
        }
    }

    /// Creates a store with the `game`, `visualization` and `system` domains.
    pub fn with_default_domains(
        config: StoreConfig,
        storage: Rc<dyn PersistenceAdapter>,
        scheduler: Rc<dyn Scheduler>,
    ) -> Self {
        let store = Self::new(config, storage, scheduler);
        // Fresh registry: none of these can collide.
        let registered = store
            .register_reducer(game::DOMAIN, game::reduce, GameState::default())
            .and_then(|_| {
                store.register_reducer(visualization::DOMAIN, visualization::reduce, VisualizationState::default())
            })
            .and_then(|_| store.register_reducer(system::DOMAIN, system::reduce, SystemState::default()));
        if let Err(err) = registered {
            log::error!("built-in domain registration failed: {err}");
        }
        store
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // ── Reducers ──────────────────────────────────────────────────────────

    /// Registers `reducer` for `domain` and seeds the state with `initial`.
    ///
    /// Reducers must be pure and must return their input `Rc` for actions they
    /// do not handle.
    pub fn register_reducer<S, F>(&self, domain: &str, reducer: F, initial: S) -> Result<(), StoreError>
    where
        S: 'static,
        F: Fn(&Rc<S>, &Action) -> Rc<S> + 'static,
    {
        let slice = self.inner.registry.borrow_mut().register(domain, reducer, initial)?;
        let next = self.inner.state.borrow().with_appended(domain, slice);
        *self.inner.state.borrow_mut() = Rc::new(next);
        log::debug!("registered reducer for `{domain}`");
        Ok(())
    }

    // ── Dispatch ──────────────────────────────────────────────────────────

    pub fn dispatch(&self, action: Action) {
        let inner = &self.inner;
        if inner.destroyed.get() {
            log::warn!("dispatch of {} after destroy ignored", action.kind);
            return;
        }

        let prev = Rc::clone(&inner.state.borrow());
        let mut changes: Vec<(usize, Slice)> = Vec::new();
        let mut samples = Vec::new();

        {
            let registry = inner.registry.borrow();
            for index in 0..registry.len() {
                let current = prev.slice_at(index);
                let started = Instant::now();
                let next = registry.reduce(index, current, &action);
                let duration = started.elapsed();

                samples.push(PerformanceSample {
                    domain: registry.domain(index).to_string(),
                    action_type: action.kind.clone(),
                    duration,
                    timestamp: SystemTime::now(),
                });

                if !same_slice(current, &next) {
                    changes.push((index, next));
                }
            }
        }

        inner.history.borrow_mut().push(HistoryEntry {
            action: action.clone(),
            timestamp: SystemTime::now(),
            changed: !changes.is_empty(),
        });

        let verdicts: Vec<SampleVerdict> = {
            let mut perf = inner.perf.borrow_mut();
            samples.iter().map(|sample| perf.record(sample.clone())).collect()
        };

        // The new state is installed before any callback runs, so a callback
        // that dispatches builds on it instead of being overwritten.
        if !changes.is_empty() {
            let next = Rc::new(prev.with_replaced(changes));
            self.publish(prev, next, &action);
        }

        if inner.config.critical_actions.contains(&action.kind) {
            self.schedule_persist();
        }

        for (sample, verdict) in samples.iter().zip(verdicts) {
            (inner.config.on_performance_sample)(sample);
            if verdict == SampleVerdict::Slow {
                (inner.config.on_slow_reducer)(sample);
            }
        }
    }

    /// Installs `next` and notifies every live subscriber.
    fn publish(&self, prev: Rc<GlobalState>, next: Rc<GlobalState>, action: &Action) {
        *self.inner.state.borrow_mut() = Rc::clone(&next);

        // Snapshot so listeners can (un)subscribe while we iterate.
        let subscribers: Vec<Rc<Subscriber>> = self.inner.subscribers.borrow().clone();
        for sub in subscribers {
            if sub.live.get() {
                (sub.listener)(&next, &prev, action);
            }
        }
    }

    // ── Subscriptions ─────────────────────────────────────────────────────

    /// Registers `listener`, called with `(next, prev, action)` after every
    /// dispatch that changes state.
    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&Rc<GlobalState>, &Rc<GlobalState>, &Action) + 'static,
    {
        let id = self.inner.next_subscriber.get();
        self.inner.next_subscriber.set(id + 1);

        self.inner.subscribers.borrow_mut().push(Rc::new(Subscriber {
            id,
            live: Cell::new(true),
            listener: Box::new(listener),
        }));

        Unsubscribe {
            id,
            store: Rc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    // ── State access ──────────────────────────────────────────────────────

    /// Current snapshot.
    pub fn state(&self) -> Rc<GlobalState> {
        Rc::clone(&self.inner.state.borrow())
    }

    pub fn slice<T: 'static>(&self, domain: &str) -> Option<Rc<T>> {
        self.inner.state.borrow().slice::<T>(domain)
    }

    pub fn game_state(&self) -> Option<Rc<GameState>> {
        self.slice(game::DOMAIN)
    }

    pub fn visualization_state(&self) -> Option<Rc<VisualizationState>> {
        self.slice(visualization::DOMAIN)
    }

    pub fn system_state(&self) -> Option<Rc<SystemState>> {
        self.slice(system::DOMAIN)
    }

    // ── Instrumentation ───────────────────────────────────────────────────

    /// Recent reducer samples, oldest first.
    pub fn performance_samples(&self) -> Vec<PerformanceSample> {
        self.inner.perf.borrow().samples()
    }

    pub fn clear_performance_samples(&self) {
        self.inner.perf.borrow_mut().clear();
    }

    /// Recent dispatches, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.history.borrow().iter().cloned().collect()
    }

    // ── Persistence ───────────────────────────────────────────────────────

    /// Whether a debounced write is waiting to fire.
    pub fn has_pending_persist(&self) -> bool {
        self.inner.pending_persist.get().is_some()
    }

    fn cancel_pending_persist(&self) {
        if let Some(handle) = self.inner.pending_persist.take() {
            self.inner.scheduler.cancel(handle);
        }
    }

    fn schedule_persist(&self) {
        self.cancel_pending_persist();
        if self.inner.destroyed.get() {
            return;
        }

        let weak = Rc::downgrade(&self.inner);
        let handle = self.inner.scheduler.schedule_once(
            self.inner.config.persist_debounce,
            Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.pending_persist.set(None);
                if inner.destroyed.get() {
                    return;
                }
                if let Err(err) = (StateStore { inner }).write_envelope() {
                    log::error!("debounced persist failed: {err}");
                }
            }),
        );
        self.inner.pending_persist.set(Some(handle));
    }

    fn write_envelope(&self) -> Result<(), StoreError> {
        let envelope = PersistedEnvelope::capture(&self.state());
        let raw = envelope.to_json()?;
        self.inner
            .storage
            .set(&self.inner.config.storage_key, &raw)
            .map_err(StoreError::Storage)?;
        log::debug!("persisted {} bytes under `{}`", raw.len(), self.inner.config.storage_key);
        Ok(())
    }

    /// Writes the envelope now, cancelling any pending debounced write.
    pub fn persist_state(&self) -> Result<(), StoreError> {
        self.cancel_pending_persist();
        self.write_envelope()
    }

    /// Merges the stored envelope into the matching domains.
    ///
    /// Returns `false`, leaving state untouched, if nothing is stored or the
    /// stored value cannot be read or parsed.
    pub fn restore_state(&self) -> bool {
        let key = &self.inner.config.storage_key;
        let raw = match self.inner.storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(err) => {
                log::warn!("reading `{key}` failed, keeping defaults: {err:#}");
                return false;
            }
        };

        let envelope = match PersistedEnvelope::from_json(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                log::warn!("ignoring stored state under `{key}`: {err}");
                return false;
            }
        };

        let prev = self.state();
        if let Some(next) = envelope.merge_into(&prev) {
            self.publish(prev, Rc::new(next), &Action::bare(RESTORE_ACTION));
        }
        log::debug!("restored state from `{key}`");
        true
    }

    /// Removes the stored envelope.
    pub fn clear_persisted_state(&self) -> Result<(), StoreError> {
        self.inner
            .storage
            .remove(&self.inner.config.storage_key)
            .map_err(StoreError::Storage)
    }

    // ── Teardown ──────────────────────────────────────────────────────────

    /// Cancels any pending write and drops all subscribers.
    ///
    /// Persisted data is left alone. Later dispatches are ignored.
    pub fn destroy(&self) {
        self.cancel_pending_persist();
        for sub in self.inner.subscribers.borrow_mut().drain(..) {
            sub.live.set(false);
        }
        self.inner.destroyed.set(true);
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("state", &self.inner.state.borrow())
            .field("subscribers", &self.subscriber_count())
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}
