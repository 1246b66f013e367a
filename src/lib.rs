//! # Live Resources
//!
//! Declare a target (one record, or a filtered collection) and get a local
//! value that stays up to date, without manual subscription bookkeeping.
//!
//! ## Core Concepts
//!
//! - **CleanupManager**: Linked units of lifetime; disposal propagates
//! - **Fetcher**: Fetch state machine, at most one fetch per target epoch
//! - **Syncable**: Fetcher whose fetch is a standing subscription
//! - **Resources**: Records with lazily created relation views, reused
//!   across snapshot updates
//! - **SyncedView**: Reactive cell fed by a syncable
//!
//! ## Example
//!
//! ```ignore
//! use live_resources::{CleanupManager, MemorySource, Shape, SyncClient, SyncConfig, Target, ViewOptions};
//!
//! let source = Arc::new(MemorySource::new());
//! source.insert("kings", "arthur", json!({ "name": "Arthur" }));
//!
//! let client = SyncClient::new(source.clone(), SyncConfig::default());
//! let owner = CleanupManager::new();
//! let king = client.view(Shape::One, Some(Target::one("kings", "arthur")), &owner, ViewOptions::default());
//!
//! // Reading starts the subscription
//! let value = king.value()?;
//!
//! // Tears down every subscription the view opened
//! owner.dispose()?;
//! ```

pub mod cell;
pub mod cleanup;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod resources;
pub mod source;
pub mod types;
pub mod view;

// Re-exports
pub use cell::{CellChange, CellWatcher, ReactiveCell};
pub use cleanup::{CleanupManager, LinkDirection};
pub use client::SyncClient;
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use fetcher::{
    FetchAction, FetchContext, FetchOnce, FetchState, Fetcher, OnFetch, Subscribe, Syncable,
    UpdateOptions,
};
pub use resources::{
    has_loaded, Getter, GetterOptions, LoadCheck, RecordFilter, RelationDef, RelationKind,
    RelationSettings, Rendered, Resource, SyncOptions, Synchronizer,
};
pub use source::{DataSource, MemorySource, SnapshotSink, SourceSubscriptionId, Unsubscribe};
pub use types::*;
pub use view::{SyncedView, ViewMode, ViewOptions};
