//! Rebuilding rendered resources from snapshots.
//!
//! A rebuild keeps the relation views of records that are still present,
//! so their subscriptions survive the update. Previous resources that were
//! not taken over leave the rendered set, and the relation views they built
//! are disposed, unless they were marked with [`Resource::keep_alive`].

use super::resource::{Origin, Rendered, Resource};
use crate::cleanup::CleanupManager;
use crate::client::ClientShared;
use crate::error::{Result, SyncError};
use crate::types::{Key, Record, Snapshot};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Client-side predicate applied to records before rendering.
pub type RecordFilter = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Builds one rendered value.
pub(crate) struct GraphBuilder<'a> {
    client: &'a Arc<ClientShared>,
    owner: &'a CleanupManager,
    layers: usize,
    filter: Option<&'a RecordFilter>,
}

/// Outcome of a rebuild: the new value plus the previous resources that
/// were not carried over.
pub(crate) struct Rebuild {
    pub rendered: Rendered,
    stale: Vec<Arc<Resource>>,
    layers: usize,
}

impl<'a> GraphBuilder<'a> {
    pub(crate) fn new(client: &'a Arc<ClientShared>, owner: &'a CleanupManager, layers: usize) -> Self {
        Self {
            client,
            owner,
            layers,
            filter: None,
        }
    }

    pub fn filter(mut self, filter: Option<&'a RecordFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Render `snapshot`, reusing what `previous` already built.
    pub fn rebuild(&self, snapshot: &Snapshot, previous: &Rendered) -> Rebuild {
        let origin = (self.layers > 0).then(|| {
            Arc::new(Origin {
                client: self.client.clone(),
                owner: self.owner.clone(),
                layers: self.layers,
            })
        });

        let previous = previous.resources();
        let mut index: HashMap<Key, usize> = HashMap::with_capacity(previous.len());
        for (i, resource) in previous.iter().enumerate() {
            index.entry(resource.record().key()).or_insert(i);
        }
        let mut reused = vec![false; previous.len()];

        let mut build = |record: &Record| -> Arc<Resource> {
            let candidate = index
                .get(&record.key())
                .copied()
                .filter(|&i| !reused[i] && previous[i].compatible_with(record, &origin));

            match candidate {
                Some(i) => {
                    reused[i] = true;
                    trace!(resource = %record.key(), "Reusing resource");
                    Arc::new(Resource::carry_over(record.clone(), &previous[i], origin.clone()))
                }
                None => Arc::new(Resource::new(record.clone(), origin.clone())),
            }
        };

        let keep = |record: &&Record| self.filter.map_or(true, |f| f(record));

        let rendered = match snapshot {
            Snapshot::One(record) => Rendered::One(record.as_ref().filter(keep).map(&mut build)),
            Snapshot::Many(records) => {
                Rendered::Many(records.iter().filter(keep).map(&mut build).collect())
            }
        };

        let stale: Vec<_> = previous
            .iter()
            .zip(&reused)
            .filter(|(_, &taken)| !taken)
            .map(|(resource, _)| resource.clone())
            .collect();

        debug!(
            rendered = rendered.resources().len(),
            reused = reused.iter().filter(|r| **r).count(),
            stale = stale.len(),
            "Rebuilt resources"
        );

        Rebuild {
            rendered,
            stale,
            layers: self.layers,
        }
    }
}

impl Rebuild {
    /// Previous resources that were not carried over.
    pub fn stale(&self) -> &[Arc<Resource>] {
        &self.stale
    }

    /// Dispose the relation views of stale resources.
    ///
    /// Skipped entirely without relation layers, since nothing was built.
    pub fn dispose_stale(&self) -> Result<()> {
        if self.layers == 0 {
            return Ok(());
        }

        let mut result = Ok(());
        for resource in self.stale() {
            if resource.is_kept_alive() {
                trace!(resource = %resource.record().key(), "Keeping stale resource alive");
                continue;
            }
            result = SyncError::merge(result, resource.dispose_relations());
        }
        result
    }
}
