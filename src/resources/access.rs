//! Per-collection access: synchronizers, getters and load checks.

use super::graph::GraphBuilder;
use super::resource::{Rendered, Resource};
use crate::cleanup::CleanupManager;
use crate::client::ClientShared;
use crate::error::Result;
use crate::types::{Clause, Filter, Shape, Target};
use crate::view::{SyncedView, ViewOptions};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Options for [`Synchronizer::sync`] and [`Synchronizer::sync_list`].
#[derive(Clone, Debug, Default)]
pub struct SyncOptions {
    /// Retarget this view instead of creating a new one.
    pub existing: Option<SyncedView>,
    pub view: ViewOptions,
}

impl SyncOptions {
    pub fn existing(mut self, view: SyncedView) -> Self {
        self.existing = Some(view);
        self
    }

    pub fn view(mut self, options: ViewOptions) -> Self {
        self.view = options;
        self
    }
}

/// Creates views of one collection, all owned by the same parent.
pub struct Synchronizer {
    client: Arc<ClientShared>,
    path: String,
    parent: CleanupManager,
}

impl Synchronizer {
    pub(crate) fn new(client: Arc<ClientShared>, path: String, parent: CleanupManager) -> Self {
        Self {
            client,
            path,
            parent,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// View of the record `id`. `None` gives an empty view.
    pub fn sync(&self, id: Option<&str>, options: SyncOptions) -> Result<SyncedView> {
        let target = id.map(|id| Target::one(self.path.clone(), id));
        self.bind(Shape::One, target, options)
    }

    /// View of the records matching every clause.
    pub fn sync_list(&self, clauses: Vec<Clause>, options: SyncOptions) -> Result<SyncedView> {
        let target = Target::Many(Filter {
            path: self.path.clone(),
            clauses,
        });
        self.bind(Shape::Many, Some(target), options)
    }

    fn bind(&self, shape: Shape, target: Option<Target>, options: SyncOptions) -> Result<SyncedView> {
        match options.existing {
            Some(view) => {
                debug!(path = %self.path, target = ?target, "Retargeting existing view");
                view.fetcher().update_target(target)?;
                Ok(view)
            }
            None => Ok(SyncedView::new(
                &self.client,
                shape,
                target,
                &self.parent,
                options.view,
            )),
        }
    }
}

impl fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("path", &self.path)
            .field("parent", &self.parent)
            .finish()
    }
}

/// Options for [`Getter`].
#[derive(Clone, Debug, Default)]
pub struct GetterOptions {
    /// Owner of the relation views built for returned resources.
    /// A fresh manager when absent.
    pub cleanup: Option<CleanupManager>,
    /// Overrides the client's `relation_layers`.
    pub relation_layers: Option<usize>,
}

/// Reads records of one collection once, without subscribing.
pub struct Getter {
    client: Arc<ClientShared>,
    path: String,
    cleanup: CleanupManager,
    layers: usize,
}

impl Getter {
    pub(crate) fn new(client: Arc<ClientShared>, path: String, options: GetterOptions) -> Self {
        let layers = options
            .relation_layers
            .unwrap_or(client.config.relation_layers);
        Self {
            client,
            path,
            cleanup: options.cleanup.unwrap_or_default(),
            layers,
        }
    }

    /// Owner of every relation view this getter builds.
    pub fn cleanup_manager(&self) -> &CleanupManager {
        &self.cleanup
    }

    pub fn get(&self, id: &str) -> Result<Option<Arc<Resource>>> {
        let rendered = self.read(Target::one(self.path.clone(), id))?;
        Ok(rendered.as_one().cloned())
    }

    pub fn get_list(&self, clauses: Vec<Clause>) -> Result<Vec<Arc<Resource>>> {
        let rendered = self.read(Target::Many(Filter {
            path: self.path.clone(),
            clauses,
        }))?;
        Ok(rendered.resources().to_vec())
    }

    fn read(&self, target: Target) -> Result<Rendered> {
        let snapshot = self.client.source.fetch_once(&target)?;
        let rebuild = GraphBuilder::new(&self.client, &self.cleanup, self.layers)
            .rebuild(&snapshot, &Rendered::empty(target.shape()));
        Ok(rebuild.rendered)
    }
}

impl fmt::Debug for Getter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Getter")
            .field("path", &self.path)
            .field("layers", &self.layers)
            .finish()
    }
}

/// One entry of a [`has_loaded`] check.
#[derive(Clone, Copy, Debug)]
pub enum LoadCheck<'a> {
    /// The view itself has loaded.
    View(&'a SyncedView),
    /// The view has loaded, and so has the named relation of every
    /// resource it currently renders.
    Relation(&'a SyncedView, &'a str),
}

/// Whether every check passes. Never starts a fetch.
///
/// Fails when a relation check names a relation the rendered resources
/// cannot build.
pub fn has_loaded(checks: &[LoadCheck<'_>]) -> Result<bool> {
    for check in checks {
        let loaded = match *check {
            LoadCheck::View(view) => view.has_loaded(),
            LoadCheck::Relation(view, relation) => {
                if !view.has_loaded() {
                    return Ok(false);
                }
                let mut loaded = true;
                for resource in view.peek().resources() {
                    if !resource.require_relation(relation)?.has_loaded() {
                        loaded = false;
                        break;
                    }
                }
                loaded
            }
        };
        if !loaded {
            return Ok(false);
        }
    }
    Ok(true)
}
