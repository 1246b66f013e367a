//! Composable units of lifetime.
//!
//! A [`CleanupManager`] owns dispose callbacks and propagate-to edges to
//! other managers. Disposing a manager runs its callbacks in registration
//! order, then disposes every linked manager. Disposal happens once: the
//! disposed flag is checked before any work, so a manager reachable through
//! several paths (or through a cycle) is only torn down the first time.
//!
//! Callback failures are isolated. Remaining callbacks still run and the
//! failures are returned together as [`SyncError::Cleanup`].

use crate::error::{Result, SyncError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

type Callback = Box<dyn FnOnce() -> Result<()> + Send>;

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Direction of a link between two managers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkDirection {
    /// Disposing `self` disposes the other manager.
    PropagateTo,
    /// Disposing the other manager disposes `self`.
    PropagateFrom,
}

struct NodeState {
    disposed: bool,
    callbacks: Vec<Callback>,
    links: Vec<CleanupManager>,
}

struct Node {
    id: u64,
    state: Mutex<NodeState>,
}

/// Handle to a lifetime node. Clones share the same node.
#[derive(Clone)]
pub struct CleanupManager {
    node: Arc<Node>,
}

impl CleanupManager {
    pub fn new() -> Self {
        Self {
            node: Arc::new(Node {
                id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(NodeState {
                    disposed: false,
                    callbacks: Vec::new(),
                    links: Vec::new(),
                }),
            }),
        }
    }

    /// Register a fallible dispose callback.
    ///
    /// If this manager is already disposed the callback runs immediately,
    /// so a resource registered too late is not leaked.
    pub fn register<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        {
            let mut state = self.node.state.lock();
            if !state.disposed {
                state.callbacks.push(Box::new(callback));
                return Ok(());
            }
        }

        trace!(manager = self.node.id, "Running callback registered after disposal");
        callback()
    }

    /// Register an infallible dispose callback.
    pub fn on_dispose<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Infallible callbacks cannot produce an error, even when run immediately.
        let _ = self.register(move || {
            callback();
            Ok(())
        });
    }

    /// Link this manager with another one.
    ///
    /// Linking to a manager that is already disposed disposes the
    /// propagation target right away.
    pub fn link(&self, direction: LinkDirection, other: &CleanupManager) -> Result<()> {
        let (source, target) = match direction {
            LinkDirection::PropagateTo => (self, other),
            LinkDirection::PropagateFrom => (other, self),
        };

        if Arc::ptr_eq(&source.node, &target.node) {
            return Ok(());
        }

        {
            let mut state = source.node.state.lock();
            if !state.disposed {
                // Drop edges to managers that already ended.
                state.links.retain(|link| !link.is_disposed());
                if !state.links.iter().any(|l| Arc::ptr_eq(&l.node, &target.node)) {
                    state.links.push(target.clone());
                }
                return Ok(());
            }
        }

        target.dispose()
    }

    /// Dispose this manager and every manager it propagates to.
    ///
    /// Idempotent: a second call is a no-op.
    pub fn dispose(&self) -> Result<()> {
        let mut failures = Vec::new();
        self.dispose_into(&mut failures);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Cleanup(failures))
        }
    }

    fn dispose_into(&self, failures: &mut Vec<SyncError>) {
        let (callbacks, links) = {
            let mut state = self.node.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.links),
            )
        };

        trace!(
            manager = self.node.id,
            callbacks = callbacks.len(),
            links = links.len(),
            "Disposing cleanup manager"
        );

        for callback in callbacks {
            if let Err(e) = callback() {
                warn!(manager = self.node.id, error = %e, "Cleanup callback failed");
                match e {
                    SyncError::Cleanup(nested) => failures.extend(nested),
                    other => failures.push(other),
                }
            }
        }

        for link in links {
            link.dispose_into(failures);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.node.state.lock().disposed
    }

    /// Number of managers this one still holds propagate-to edges to.
    /// Edges to managers that already ended are pruned on the next link.
    pub fn link_count(&self) -> usize {
        self.node.state.lock().links.len()
    }

    /// Number of callbacks waiting for disposal.
    pub fn pending_callbacks(&self) -> usize {
        self.node.state.lock().callbacks.len()
    }

    /// Whether two handles refer to the same manager.
    pub fn same(&self, other: &CleanupManager) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl Default for CleanupManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CleanupManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CleanupManager({}, disposed: {})",
            self.node.id,
            self.is_disposed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = count.clone();
        (count, move || handle.clone())
    }

    #[test]
    fn test_dispose_runs_callbacks_once() {
        let manager = CleanupManager::new();
        let (count, clone) = counter();

        for _ in 0..3 {
            let c = clone();
            manager.on_dispose(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }

        manager.dispose().unwrap();
        manager.dispose().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(manager.is_disposed());
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let manager = CleanupManager::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            manager.on_dispose(move || order.lock().push(i));
        }

        manager.dispose().unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_register_after_dispose_runs_immediately() {
        let manager = CleanupManager::new();
        manager.dispose().unwrap();

        let (count, clone) = counter();
        let c = clone();
        manager.on_dispose(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(manager.pending_callbacks(), 0);
    }

    #[test]
    fn test_propagates_to_linked_managers() {
        let parent = CleanupManager::new();
        let child = CleanupManager::new();
        let grandchild = CleanupManager::new();

        parent.link(LinkDirection::PropagateTo, &child).unwrap();
        grandchild.link(LinkDirection::PropagateFrom, &child).unwrap();

        parent.dispose().unwrap();

        assert!(child.is_disposed());
        assert!(grandchild.is_disposed());
    }

    #[test]
    fn test_child_disposal_does_not_reach_parent() {
        let parent = CleanupManager::new();
        let child = CleanupManager::new();
        parent.link(LinkDirection::PropagateTo, &child).unwrap();

        child.dispose().unwrap();

        assert!(!parent.is_disposed());
    }

    #[test]
    fn test_cycles_dispose_each_node_once() {
        let a = CleanupManager::new();
        let b = CleanupManager::new();
        let (count, clone) = counter();

        for manager in [&a, &b] {
            let c = clone();
            manager.on_dispose(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }

        a.link(LinkDirection::PropagateTo, &b).unwrap();
        b.link(LinkDirection::PropagateTo, &a).unwrap();

        a.dispose().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_diamond_disposes_shared_node_once() {
        let root = CleanupManager::new();
        let left = CleanupManager::new();
        let right = CleanupManager::new();
        let shared = CleanupManager::new();
        let (count, clone) = counter();

        let c = clone();
        shared.on_dispose(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        root.link(LinkDirection::PropagateTo, &left).unwrap();
        root.link(LinkDirection::PropagateTo, &right).unwrap();
        left.link(LinkDirection::PropagateTo, &shared).unwrap();
        right.link(LinkDirection::PropagateTo, &shared).unwrap();

        root.dispose().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_callback_does_not_abort_teardown() {
        let manager = CleanupManager::new();
        let child = CleanupManager::new();
        let (count, clone) = counter();

        manager
            .register(|| Err(SyncError::Callback("first".into())))
            .unwrap();
        let c = clone();
        manager.on_dispose(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        manager
            .register(|| Err(SyncError::Callback("third".into())))
            .unwrap();
        manager.link(LinkDirection::PropagateTo, &child).unwrap();

        let result = manager.dispose();

        match result {
            Err(SyncError::Cleanup(failures)) => assert_eq!(failures.len(), 2),
            other => panic!("Expected aggregated failures, got {:?}", other),
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(child.is_disposed());
    }

    #[test]
    fn test_link_to_disposed_source_disposes_target() {
        let parent = CleanupManager::new();
        parent.dispose().unwrap();

        let child = CleanupManager::new();
        parent.link(LinkDirection::PropagateTo, &child).unwrap();

        assert!(child.is_disposed());
    }

    #[test]
    fn test_link_prunes_ended_children() {
        let parent = CleanupManager::new();

        for _ in 0..100 {
            let child = CleanupManager::new();
            parent.link(LinkDirection::PropagateTo, &child).unwrap();
            child.dispose().unwrap();
        }

        // Only the last ended child is still held until the next link.
        assert_eq!(parent.link_count(), 1);
        parent
            .link(LinkDirection::PropagateTo, &CleanupManager::new())
            .unwrap();
        assert_eq!(parent.link_count(), 1);
    }

    #[test]
    fn test_reentrant_registration_during_dispose() {
        let manager = CleanupManager::new();
        let (count, clone) = counter();

        let inner = manager.clone();
        let c = clone();
        manager.on_dispose(move || {
            inner.on_dispose(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        });

        manager.dispose().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
