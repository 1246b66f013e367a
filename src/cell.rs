//! Reactive cell holding a view's current value.
//!
//! Watchers receive every change over a bounded channel. A watcher whose
//! buffer is full, or whose receiver was dropped, is removed on the next
//! change.

use crossbeam_channel::{bounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// One change of a cell's value.
#[derive(Clone, Debug)]
pub struct CellChange<T> {
    /// Version after the change. Starts at 0 for the initial value.
    pub version: u64,
    pub value: T,
}

/// Receiving end of a cell watch.
pub struct CellWatcher<T> {
    id: u64,
    receiver: Receiver<CellChange<T>>,
}

impl<T> CellWatcher<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Receive the next change (blocking).
    pub fn recv(&self) -> Result<CellChange<T>, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a change (non-blocking).
    pub fn try_recv(&self) -> Result<CellChange<T>, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<CellChange<T>, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

struct Current<T> {
    version: u64,
    value: T,
}

struct CellInner<T> {
    current: RwLock<Current<T>>,
    watchers: RwLock<HashMap<u64, Sender<CellChange<T>>>>,
    next_id: AtomicU64,
    buffer: usize,
}

/// Get/set cell with change notifications.
pub struct ReactiveCell<T> {
    inner: Arc<CellInner<T>>,
}

impl<T> Clone for ReactiveCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> ReactiveCell<T> {
    /// Create a cell whose watchers buffer up to `buffer` changes.
    pub fn new(value: T, buffer: usize) -> Self {
        Self {
            inner: Arc::new(CellInner {
                current: RwLock::new(Current { version: 0, value }),
                watchers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.inner.current.read().value.clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.current.read().version
    }

    /// Replace the value and notify watchers.
    pub fn set(&self, value: T) {
        let change = {
            let mut current = self.inner.current.write();
            current.version += 1;
            current.value = value;
            CellChange {
                version: current.version,
                value: current.value.clone(),
            }
        };
        self.broadcast(change);
    }

    /// Watch future changes.
    pub fn watch(&self) -> CellWatcher<T> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = bounded(self.inner.buffer);
        self.inner.watchers.write().insert(id, sender);
        CellWatcher { id, receiver }
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.read().len()
    }

    fn broadcast(&self, change: CellChange<T>) {
        let mut to_remove = Vec::new();

        {
            let watchers = self.inner.watchers.read();
            for (id, sender) in watchers.iter() {
                match sender.try_send(change.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(watcher = id, version = change.version, "Dropping slow watcher");
                        to_remove.push(*id);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        trace!(watcher = id, "Removing closed watcher");
                        to_remove.push(*id);
                    }
                }
            }
        }

        if !to_remove.is_empty() {
            let mut watchers = self.inner.watchers.write();
            for id in to_remove {
                watchers.remove(&id);
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ReactiveCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.inner.current.read();
        f.debug_struct("ReactiveCell")
            .field("version", &current.version)
            .field("value", &current.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let cell = ReactiveCell::new(1, 4);
        assert_eq!(cell.get(), 1);
        assert_eq!(cell.version(), 0);

        cell.set(2);
        assert_eq!(cell.get(), 2);
        assert_eq!(cell.version(), 1);
    }

    #[test]
    fn test_watch_receives_changes() {
        let cell = ReactiveCell::new("a".to_string(), 4);
        let watcher = cell.watch();

        cell.set("b".into());
        cell.set("c".into());

        let first = watcher.recv_timeout(Duration::from_millis(100)).unwrap();
        let second = watcher.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!((first.version, first.value.as_str()), (1, "b"));
        assert_eq!((second.version, second.value.as_str()), (2, "c"));
        assert!(watcher.try_recv().is_err());
    }

    #[test]
    fn test_drop_slow_watcher() {
        let cell = ReactiveCell::new(0, 2);
        let _watcher = cell.watch();

        for i in 1..10 {
            cell.set(i);
        }

        assert_eq!(cell.watcher_count(), 0);
        assert_eq!(cell.get(), 9);
    }

    #[test]
    fn test_closed_watcher_removed() {
        let cell = ReactiveCell::new(0, 4);
        let watcher = cell.watch();
        assert_eq!(cell.watcher_count(), 1);

        drop(watcher);
        cell.set(1);
        assert_eq!(cell.watcher_count(), 0);
    }
}
