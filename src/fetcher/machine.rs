//! The fetch state machine.
//!
//! A [`Fetcher`] is bound to one target at a time and runs its fetch action
//! at most once per target epoch. Every target change ends the current
//! epoch: the epoch's [`CleanupManager`] is disposed (tearing down whatever
//! the previous fetch registered on it) and a fresh one takes its place.
//!
//! Each fetcher also owns a stable lifetime manager. Parents link to it;
//! when it is disposed the fetcher becomes `Disposed` and the current epoch
//! is torn down with it.

use crate::cleanup::{CleanupManager, LinkDirection};
use crate::error::{Result, SyncError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Snapshot handler. Receives every snapshot together with the cleanup
/// manager of the epoch that produced it.
pub type OnFetch<V> = Arc<dyn Fn(&V, &CleanupManager) + Send + Sync>;

type Listener = Arc<dyn Fn() + Send + Sync>;
type TargetListener<T> = Arc<dyn Fn(Option<&T>) + Send + Sync>;

static NEXT_FETCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Externally visible fetch state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchState {
    /// No target. Overrides every other state.
    Empty,
    ReadyToFetch,
    Fetched,
    Disposed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    ReadyToFetch,
    Fetched,
    Disposed,
}

/// Options for [`Fetcher::update_target_with`].
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateOptions {
    /// Run the update even when the new target equals the current one.
    pub force: bool,
}

impl UpdateOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// How a fetcher obtains snapshots for a target.
pub trait FetchAction<T, V>: Send + Sync + 'static {
    /// Start fetching `target`. Snapshots go through
    /// [`FetchContext::deliver`], now or later. Anything that must be torn
    /// down with the epoch is registered on [`FetchContext::cleanup`].
    fn fetch(&self, target: &T, context: FetchContext<T, V>) -> Result<()>;
}

/// Delivery handle for one fetch epoch.
pub struct FetchContext<T, V> {
    inner: Weak<Inner<T, V>>,
    cleanup: CleanupManager,
}

impl<T, V> Clone for FetchContext<T, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            cleanup: self.cleanup.clone(),
        }
    }
}

impl<T, V> FetchContext<T, V> {
    /// Cleanup manager of the epoch this fetch belongs to.
    pub fn cleanup(&self) -> &CleanupManager {
        &self.cleanup
    }

    /// Whether the epoch ended. Deliveries to a stale context are dropped.
    pub fn is_stale(&self) -> bool {
        self.cleanup.is_disposed() || self.inner.strong_count() == 0
    }

    /// Hand a snapshot to the fetcher's handler and fetch listeners.
    pub fn deliver(&self, snapshot: V) {
        if self.cleanup.is_disposed() {
            trace!("Dropping snapshot delivered after its epoch ended");
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };

        inner.has_loaded.store(true, Ordering::SeqCst);
        (inner.on_fetch)(&snapshot, &self.cleanup);

        let listeners = inner.listeners.lock().fetch.clone();
        for listener in listeners {
            listener(&snapshot, &self.cleanup);
        }
    }
}

struct Core<T> {
    target: Option<T>,
    phase: Phase,
    /// Cleanup manager of the current epoch.
    cleanup: CleanupManager,
}

struct Listeners<T, V> {
    dispose: Vec<Listener>,
    reset: Vec<Listener>,
    before_fetch: Vec<Listener>,
    update_target: Vec<TargetListener<T>>,
    fetch: Vec<OnFetch<V>>,
}

struct Inner<T, V> {
    id: u64,
    action: Box<dyn FetchAction<T, V>>,
    on_fetch: OnFetch<V>,
    lifetime: CleanupManager,
    core: Mutex<Core<T>>,
    has_loaded: AtomicBool,
    listeners: Mutex<Listeners<T, V>>,
}

impl<T, V> Drop for Inner<T, V> {
    fn drop(&mut self) {
        // Nothing can receive snapshots anymore; end the live epoch.
        if let Err(e) = self.core.get_mut().cleanup.dispose() {
            debug!(fetcher = self.id, error = %e, "Teardown on drop failed");
        }
    }
}

/// State machine governing the fetch lifecycle of one target.
///
/// Handles are cheap to clone and share the same machine.
pub struct Fetcher<T, V> {
    inner: Arc<Inner<T, V>>,
}

impl<T, V> Clone for Fetcher<T, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, V> Fetcher<T, V>
where
    T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create a fetcher in the `ReadyToFetch` state.
    pub fn new<A>(target: Option<T>, action: A, on_fetch: OnFetch<V>) -> Self
    where
        A: FetchAction<T, V>,
    {
        let lifetime = CleanupManager::new();
        let epoch = CleanupManager::new();
        // Both managers are fresh, linking cannot dispose anything.
        let _ = lifetime.link(LinkDirection::PropagateTo, &epoch);

        let inner = Arc::new(Inner {
            id: NEXT_FETCHER_ID.fetch_add(1, Ordering::Relaxed),
            action: Box::new(action),
            on_fetch,
            lifetime,
            core: Mutex::new(Core {
                target,
                phase: Phase::ReadyToFetch,
                cleanup: epoch,
            }),
            has_loaded: AtomicBool::new(false),
            listeners: Mutex::new(Listeners {
                dispose: Vec::new(),
                reset: Vec::new(),
                before_fetch: Vec::new(),
                update_target: Vec::new(),
                fetch: Vec::new(),
            }),
        });

        let weak = Arc::downgrade(&inner);
        inner.lifetime.on_dispose(move || {
            if let Some(inner) = weak.upgrade() {
                inner.core.lock().phase = Phase::Disposed;
            }
        });

        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn fetch_state(&self) -> FetchState {
        let core = self.inner.core.lock();
        if core.target.is_none() {
            return FetchState::Empty;
        }
        match core.phase {
            Phase::ReadyToFetch => FetchState::ReadyToFetch,
            Phase::Fetched => FetchState::Fetched,
            Phase::Disposed => FetchState::Disposed,
        }
    }

    /// Whether the fetcher is in the terminal state, with or without a target.
    pub fn is_disposed(&self) -> bool {
        self.inner.core.lock().phase == Phase::Disposed
    }

    pub fn target(&self) -> Option<T> {
        self.inner.core.lock().target.clone()
    }

    /// Cleanup manager of the current target epoch.
    pub fn cleanup_manager(&self) -> CleanupManager {
        self.inner.core.lock().cleanup.clone()
    }

    /// Stable manager owning this fetcher. Link parents to this one.
    pub fn lifetime(&self) -> &CleanupManager {
        &self.inner.lifetime
    }

    /// Whether a snapshot has been delivered since creation or last reset.
    pub fn has_loaded(&self) -> bool {
        self.inner.has_loaded.load(Ordering::SeqCst)
    }

    /// Run the fetch action, at most once per target epoch.
    ///
    /// Before-fetch listeners run on every call. The state becomes
    /// `Fetched` before the action starts, even without a target, so a
    /// target arriving later knows a fetch is owed.
    pub fn trigger(&self) -> Result<()> {
        self.notify(|l| l.before_fetch.clone());

        let (target, epoch) = {
            let mut core = self.inner.core.lock();
            if core.phase != Phase::ReadyToFetch {
                return Ok(());
            }
            core.phase = Phase::Fetched;
            (core.target.clone(), core.cleanup.clone())
        };

        let Some(target) = target else {
            return Ok(());
        };
        if epoch.is_disposed() {
            trace!(fetcher = self.inner.id, "Epoch already ended, skipping fetch");
            return Ok(());
        }

        debug!(fetcher = self.inner.id, target = ?target, "Fetching");

        let context = FetchContext {
            inner: Arc::downgrade(&self.inner),
            cleanup: epoch,
        };
        self.inner.action.fetch(&target, context)
    }

    /// Replace the target. No-op when it equals the current one.
    pub fn update_target(&self, target: Option<T>) -> Result<()> {
        self.update_target_with(target, UpdateOptions::default())
    }

    /// Replace the target, ending the current epoch.
    ///
    /// A `Fetched` fetcher immediately fetches the new target if there is
    /// one; `ReadyToFetch` and `Disposed` fetchers keep their state.
    /// Target listeners are notified last, also for an empty target.
    pub fn update_target_with(&self, target: Option<T>, options: UpdateOptions) -> Result<()> {
        let (previous_phase, previous_epoch, epoch) = {
            let mut core = self.inner.core.lock();
            if !options.force && core.target == target {
                return Ok(());
            }
            core.target = target.clone();
            let epoch = CleanupManager::new();
            let previous = std::mem::replace(&mut core.cleanup, epoch.clone());
            (core.phase, previous, epoch)
        };

        debug!(
            fetcher = self.inner.id,
            target = ?target,
            phase = ?previous_phase,
            "Updating target"
        );

        // Stale teardown happens before any new fetch is requested.
        let mut result = previous_epoch.dispose();
        result = SyncError::merge(
            result,
            self.inner.lifetime.link(LinkDirection::PropagateTo, &epoch),
        );

        if previous_phase == Phase::Fetched && target.is_some() {
            {
                let mut core = self.inner.core.lock();
                if core.phase == Phase::Fetched {
                    core.phase = Phase::ReadyToFetch;
                }
            }
            result = match result {
                Ok(()) => self.trigger(),
                Err(e) => {
                    if let Err(fetch_error) = self.trigger() {
                        debug!(fetcher = self.inner.id, error = %fetch_error, "Refetch failed");
                    }
                    Err(e)
                }
            };
        }

        let listeners = self.inner.listeners.lock().update_target.clone();
        for listener in listeners {
            listener(target.as_ref());
        }

        result
    }

    /// End the current epoch and enter the terminal `Disposed` state.
    pub fn dispose(&self) -> Result<()> {
        let epoch = self.cleanup_manager();
        let result = epoch.dispose();
        self.inner.core.lock().phase = Phase::Disposed;

        debug!(fetcher = self.inner.id, "Disposed");

        self.notify(|l| l.dispose.clone());
        result
    }

    /// Return to a fresh, untargeted `ReadyToFetch` fetcher.
    /// Listener registrations survive.
    ///
    /// A fetcher whose lifetime ended (its owner was disposed) is cleared
    /// but stays `Disposed`: nothing would tear down a new fetch.
    pub fn reset(&self) -> Result<()> {
        let mut result = self.dispose();
        result = SyncError::merge(result, self.update_target(None));

        let revived = !self.inner.lifetime.is_disposed();
        if !revived {
            debug!(fetcher = self.inner.id, "Lifetime ended, staying disposed after reset");
        }

        let fresh = {
            let mut core = self.inner.core.lock();
            if !revived {
                None
            } else if core.cleanup.is_disposed() {
                core.phase = Phase::ReadyToFetch;
                let epoch = CleanupManager::new();
                core.cleanup = epoch.clone();
                Some(epoch)
            } else {
                core.phase = Phase::ReadyToFetch;
                None
            }
        };
        if let Some(epoch) = fresh {
            result = SyncError::merge(
                result,
                self.inner.lifetime.link(LinkDirection::PropagateTo, &epoch),
            );
        }
        self.inner.has_loaded.store(false, Ordering::SeqCst);

        self.notify(|l| l.reset.clone());
        result
    }

    pub fn on_dispose<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.listeners.lock().dispose.push(Arc::new(callback));
    }

    pub fn on_reset<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.listeners.lock().reset.push(Arc::new(callback));
    }

    pub fn on_update_target<F>(&self, callback: F)
    where
        F: Fn(Option<&T>) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .update_target
            .push(Arc::new(callback));
    }

    pub fn on_before_fetch_trigger<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.listeners.lock().before_fetch.push(Arc::new(callback));
    }

    pub fn on_fetch<F>(&self, callback: F)
    where
        F: Fn(&V, &CleanupManager) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().fetch.push(Arc::new(callback));
    }

    /// Invoke a listener list without holding the listener lock.
    fn notify(&self, select: impl FnOnce(&Listeners<T, V>) -> Vec<Listener>) {
        let listeners = select(&self.inner.listeners.lock());
        for listener in listeners {
            listener();
        }
    }
}

impl<T: fmt::Debug, V> fmt::Debug for Fetcher<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("Fetcher")
            .field("id", &self.inner.id)
            .field("target", &core.target)
            .field("phase", &core.phase)
            .finish()
    }
}
