//! Rendered resources and their relation graph.
//!
//! A resource wraps one record. Each relation configured for its collection
//! becomes a nested [`SyncedView`](crate::view::SyncedView), created on
//! first access and owned by the view that rendered the resource.

mod access;
mod graph;
mod relations;
mod resource;

pub use access::{has_loaded, Getter, GetterOptions, LoadCheck, SyncOptions, Synchronizer};
pub(crate) use graph::GraphBuilder;
pub use graph::RecordFilter;
pub use relations::{RelationDef, RelationKind, RelationSettings};
pub use resource::{Rendered, Resource};
