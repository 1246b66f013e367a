//! Relation settings: how a record of one collection points at records of
//! another.

use crate::types::{Clause, Filter, Key, Record, Shape, Target};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// How the related records are found.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelationKind {
    /// The record stores the related id in `relation_key`.
    HasOne { relation_key: String },

    /// Related records store this record's id in `relation_key`.
    HasMany { relation_key: String },

    /// Rows of `table` hold both ids, each under its collection's name.
    /// Relations of a collection to itself are not expressible this way.
    ManyToMany { table: String },
}

/// A named relation of a collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Collection holding the related records.
    pub target: String,
    #[serde(flatten)]
    pub kind: RelationKind,
}

impl RelationDef {
    pub fn has_one(target: impl Into<String>, relation_key: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: RelationKind::HasOne {
                relation_key: relation_key.into(),
            },
        }
    }

    pub fn has_many(target: impl Into<String>, relation_key: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: RelationKind::HasMany {
                relation_key: relation_key.into(),
            },
        }
    }

    pub fn many_to_many(target: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: RelationKind::ManyToMany {
                table: table.into(),
            },
        }
    }

    pub fn shape(&self) -> Shape {
        match self.kind {
            RelationKind::HasOne { .. } => Shape::One,
            RelationKind::HasMany { .. } | RelationKind::ManyToMany { .. } => Shape::Many,
        }
    }

    /// Target selecting the records related to `record`.
    ///
    /// A has-one relation whose key is missing, null or not a string or
    /// number yields no target.
    pub fn target_for(&self, record: &Record) -> Option<Target> {
        match &self.kind {
            RelationKind::HasOne { relation_key } => {
                let id = match record.get(relation_key)? {
                    Value::String(id) => id.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                Some(Target::One(Key::new(self.target.clone(), id)))
            }
            RelationKind::HasMany { relation_key } => Some(Target::Many(
                Filter::all(self.target.clone()).with(Clause::eq(relation_key.clone(), record.id.clone())),
            )),
            RelationKind::ManyToMany { table } => Some(Target::Many(Filter::all(
                self.target.clone(),
            )
            .with(Clause::Joined {
                table: table.clone(),
                source_field: record.path.clone(),
                source_id: record.id.clone(),
                target_field: self.target.clone(),
            }))),
        }
    }
}

/// Relations configured per collection path, by relation name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationSettings(HashMap<String, BTreeMap<String, RelationDef>>);

impl RelationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a relation named `name` to the collection at `path`.
    pub fn with(mut self, path: &str, name: &str, def: RelationDef) -> Self {
        self.0
            .entry(path.to_string())
            .or_default()
            .insert(name.to_string(), def);
        self
    }

    pub fn for_path(&self, path: &str) -> Option<&BTreeMap<String, RelationDef>> {
        self.0.get(path).filter(|relations| !relations.is_empty())
    }

    pub fn get(&self, path: &str, name: &str) -> Option<&RelationDef> {
        self.0.get(path)?.get(name)
    }
}
