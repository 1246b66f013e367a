//! Entry point tying a data source to the view machinery.

use crate::cleanup::CleanupManager;
use crate::config::SyncConfig;
use crate::resources::{Getter, GetterOptions, Synchronizer};
use crate::source::DataSource;
use crate::types::{Shape, Snapshot, Target};
use crate::view::{SyncedView, ViewOptions};
use std::fmt;
use std::sync::Arc;

/// State shared by every view, resource and relation a client creates.
pub(crate) struct ClientShared {
    pub(crate) source: Arc<dyn DataSource<Target, Snapshot>>,
    pub(crate) config: SyncConfig,
}

/// The synchronization client.
///
/// Provides a unified interface for:
/// - Creating live views of single records or filtered collections
/// - Per-collection synchronizers bound to an owner
/// - Per-collection one-shot getters
///
/// Cheap to clone. Clones share the same source and configuration.
#[derive(Clone)]
pub struct SyncClient {
    shared: Arc<ClientShared>,
}

impl SyncClient {
    pub fn new(source: Arc<dyn DataSource<Target, Snapshot>>, config: SyncConfig) -> Self {
        Self {
            shared: Arc::new(ClientShared { source, config }),
        }
    }

    /// Create a view owned by `parent`. The fetch starts on first
    /// [`SyncedView::value`].
    pub fn view(
        &self,
        shape: Shape,
        target: Option<Target>,
        parent: &CleanupManager,
        options: ViewOptions,
    ) -> SyncedView {
        SyncedView::new(&self.shared, shape, target, parent, options)
    }

    /// Synchronizer for the collection at `path`. Views it creates are
    /// owned by `parent`.
    pub fn synchronizer(&self, path: impl Into<String>, parent: &CleanupManager) -> Synchronizer {
        Synchronizer::new(self.shared.clone(), path.into(), parent.clone())
    }

    /// One-shot reader for the collection at `path`.
    pub fn getter(&self, path: impl Into<String>, options: GetterOptions) -> Getter {
        Getter::new(self.shared.clone(), path.into(), options)
    }

    pub fn source(&self) -> &Arc<dyn DataSource<Target, Snapshot>> {
        &self.shared.source
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }
}

impl fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncClient")
            .field("config", &self.shared.config)
            .finish()
    }
}
