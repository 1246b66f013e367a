//! Data source interface.
//!
//! The engine never talks to a backend directly. A data source offers two
//! capabilities per target type:
//! - a one-shot read (`fetch_once`)
//! - a standing subscription (`subscribe`) that pushes an initial snapshot
//!   and another one after every change, until the returned
//!   [`Unsubscribe`] is called
//!
//! [`MemorySource`] is an in-process implementation over JSON records.

mod memory;

pub use memory::{MemorySource, SourceSubscriptionId};

use crate::error::Result;

/// Receives every snapshot pushed by a subscription.
pub type SnapshotSink<V> = Box<dyn Fn(V) + Send + Sync>;

/// Ends a subscription. After it runs the sink must never be called again.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// A backend able to read and watch targets of type `T`, producing
/// snapshots of type `V`.
pub trait DataSource<T, V>: Send + Sync + 'static {
    /// Read the target once.
    fn fetch_once(&self, target: &T) -> Result<V>;

    /// Watch the target. Failing here means no snapshot was or will be
    /// delivered for this call.
    fn subscribe(&self, target: &T, sink: SnapshotSink<V>) -> Result<Unsubscribe>;
}
