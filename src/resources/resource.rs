//! Rendered resources: records enriched with nested relation views.

use super::relations::RelationDef;
use crate::cleanup::{CleanupManager, LinkDirection};
use crate::client::ClientShared;
use crate::error::{Result, SyncError};
use crate::types::{Record, Shape};
use crate::view::{SyncedView, ViewOptions};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{trace, warn};

/// What every resource of one build shares: where relation views come
/// from, who owns them, and how deep they may nest.
pub(crate) struct Origin {
    pub(crate) client: Arc<ClientShared>,
    pub(crate) owner: CleanupManager,
    /// Layers left for relation views created by these resources.
    pub(crate) layers: usize,
}

struct RelationSlot {
    def: RelationDef,
    view: OnceLock<SyncedView>,
}

/// A record plus one lazily created view per configured relation.
pub struct Resource {
    record: Record,
    origin: Option<Arc<Origin>>,
    relations: BTreeMap<String, RelationSlot>,
    dont_dispose: AtomicBool,
}

impl Resource {
    /// Resource with fresh, not yet created relation views.
    pub(crate) fn new(record: Record, origin: Option<Arc<Origin>>) -> Self {
        let relations = match &origin {
            Some(origin) if origin.layers > 0 => origin
                .client
                .config
                .relations
                .for_path(&record.path)
                .map(|defs| {
                    defs.iter()
                        .map(|(name, def)| {
                            (
                                name.clone(),
                                RelationSlot {
                                    def: def.clone(),
                                    view: OnceLock::new(),
                                },
                            )
                        })
                        .collect()
                })
                .unwrap_or_default(),
            _ => BTreeMap::new(),
        };

        Self {
            record,
            origin,
            relations,
            dont_dispose: AtomicBool::new(false),
        }
    }

    /// Resource for `record` that keeps the live relation views of
    /// `previous`, re-attached to the new owner and re-targeted at the new
    /// payload. Re-targeting an unchanged relation is a no-op.
    pub(crate) fn carry_over(record: Record, previous: &Resource, origin: Option<Arc<Origin>>) -> Self {
        let resource = Self::new(record, origin);
        resource
            .dont_dispose
            .store(previous.is_kept_alive(), Ordering::SeqCst);

        for (name, slot) in &resource.relations {
            let Some(view) = previous.built_relation(name) else {
                continue;
            };
            if view.fetcher().is_disposed() {
                continue;
            }

            if let Some(origin) = &resource.origin {
                if let Err(e) = origin
                    .owner
                    .link(LinkDirection::PropagateTo, view.fetcher().lifetime())
                {
                    warn!(relation = %name, error = %e, "Re-attaching relation view failed");
                }
            }
            if let Err(e) = view
                .fetcher()
                .update_target(slot.def.target_for(&resource.record))
            {
                warn!(relation = %name, error = %e, "Re-targeting relation view failed");
            }

            trace!(resource = %resource.record.key(), relation = %name, "Reusing relation view");
            let _ = slot.view.set(view);
        }

        resource
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn path(&self) -> &str {
        &self.record.path
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.record.get(field)
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        self.record.parse()
    }

    /// Names of the relations this resource can build.
    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    /// The view of a relation, created on first access.
    ///
    /// Returns `None` when the relation is not configured for this
    /// collection or the relation layer limit was reached.
    pub fn relation(&self, name: &str) -> Option<SyncedView> {
        let slot = self.relations.get(name)?;
        let origin = self.origin.as_ref()?;

        let view = slot.view.get_or_init(|| {
            trace!(resource = %self.record.key(), relation = %name, "Creating relation view");
            SyncedView::new(
                &origin.client,
                slot.def.shape(),
                slot.def.target_for(&self.record),
                &origin.owner,
                ViewOptions::default().relation_layers(origin.layers - 1),
            )
        });
        Some(view.clone())
    }

    /// Like [`relation`](Self::relation), failing on unknown names.
    pub fn require_relation(&self, name: &str) -> Result<SyncedView> {
        self.relation(name).ok_or_else(|| SyncError::UnknownRelation {
            path: self.record.path.clone(),
            relation: name.to_string(),
        })
    }

    /// The view of a relation if it was already created.
    pub fn built_relation(&self, name: &str) -> Option<SyncedView> {
        self.relations.get(name)?.view.get().cloned()
    }

    pub(crate) fn built_relations(&self) -> impl Iterator<Item = (&str, &SyncedView)> {
        self.relations
            .iter()
            .filter_map(|(name, slot)| slot.view.get().map(|view| (name.as_str(), view)))
    }

    /// Whether a resource for `record` built under `origin` can take over
    /// this resource's relation views.
    pub(crate) fn compatible_with(&self, record: &Record, origin: &Option<Arc<Origin>>) -> bool {
        let same_layers = match (&self.origin, origin) {
            (Some(a), Some(b)) => a.layers == b.layers,
            (None, None) => true,
            _ => false,
        };
        same_layers && self.record.path == record.path
    }

    /// Keep this resource's relation views alive when it leaves its view.
    pub fn keep_alive(&self) {
        self.dont_dispose.store(true, Ordering::SeqCst);
    }

    pub fn is_kept_alive(&self) -> bool {
        self.dont_dispose.load(Ordering::SeqCst)
    }

    /// Dispose every relation view this resource created.
    ///
    /// The views' lifetimes end too, so the owner drops its edges to them.
    pub(crate) fn dispose_relations(&self) -> Result<()> {
        let mut result = Ok(());
        for (_, view) in self.built_relations() {
            result = SyncError::merge(result, view.fetcher().dispose());
            result = SyncError::merge(result, view.fetcher().lifetime().dispose());
        }
        result
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("record", &self.record)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The current rendered value of a view.
#[derive(Clone, Debug)]
pub enum Rendered {
    One(Option<Arc<Resource>>),
    Many(Vec<Arc<Resource>>),
}

impl Rendered {
    pub fn empty(shape: Shape) -> Self {
        match shape {
            Shape::One => Rendered::One(None),
            Shape::Many => Rendered::Many(Vec::new()),
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Rendered::One(_) => Shape::One,
            Rendered::Many(_) => Shape::Many,
        }
    }

    pub fn resources(&self) -> &[Arc<Resource>] {
        match self {
            Rendered::One(Some(resource)) => std::slice::from_ref(resource),
            Rendered::One(None) => &[],
            Rendered::Many(resources) => resources,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resources().is_empty()
    }

    pub fn as_one(&self) -> Option<&Arc<Resource>> {
        match self {
            Rendered::One(resource) => resource.as_ref(),
            Rendered::Many(_) => None,
        }
    }

    /// Records in render order.
    pub fn records(&self) -> Vec<Record> {
        self.resources().iter().map(|r| r.record().clone()).collect()
    }
}
