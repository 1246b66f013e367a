//! Core types: targets, records and snapshots.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Selects a single record of a collection.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    pub path: String,
    pub id: String,
}

impl Key {
    pub fn new(path: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            id: id.into(),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({}/{})", self.path, self.id)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.path, self.id)
    }
}

/// A condition every record of a [`Filter`] must satisfy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Clause {
    /// Payload field equals a value.
    Eq { field: String, value: Value },

    /// Record is joined to `source_id` through the `table` collection, whose
    /// records hold the source id under `source_field` and the record's own
    /// id under `target_field`.
    Joined {
        table: String,
        source_field: String,
        source_id: String,
        target_field: String,
    },
}

impl Clause {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Clause::Eq {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Selects a set of records of a collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub path: String,
    pub clauses: Vec<Clause>,
}

impl Filter {
    /// Every record of the collection.
    pub fn all(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            clauses: Vec::new(),
        }
    }

    pub fn with(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }
}

/// What a fetcher is bound to. An empty target is `None` wherever a
/// target is optional.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    One(Key),
    Many(Filter),
}

impl Target {
    pub fn one(path: impl Into<String>, id: impl Into<String>) -> Self {
        Target::One(Key::new(path, id))
    }

    pub fn many(filter: Filter) -> Self {
        Target::Many(filter)
    }

    /// Collection the target reads from.
    pub fn path(&self) -> &str {
        match self {
            Target::One(key) => &key.path,
            Target::Many(filter) => &filter.path,
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Target::One(_) => Shape::One,
            Target::Many(_) => Shape::Many,
        }
    }
}

/// Whether a target, snapshot or view holds one record or a list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    One,
    Many,
}

/// A remote record: stable id plus JSON payload.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub path: String,
    pub data: Map<String, Value>,
}

impl Record {
    pub fn new(path: impl Into<String>, id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            data,
        }
    }

    /// Build a record from a JSON object. Non-object values give an empty payload.
    pub fn from_json(path: impl Into<String>, id: impl Into<String>, value: Value) -> Self {
        let data = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(path, id, data)
    }

    pub fn key(&self) -> Key {
        Key::new(self.path.clone(), self.id.clone())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Deserialize the payload into a typed value.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record({}/{}, {} fields)", self.path, self.id, self.data.len())
    }
}

/// Data delivered for a target at a point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "records", rename_all = "snake_case")]
pub enum Snapshot {
    One(Option<Record>),
    Many(Vec<Record>),
}

impl Snapshot {
    pub fn shape(&self) -> Shape {
        match self {
            Snapshot::One(_) => Shape::One,
            Snapshot::Many(_) => Shape::Many,
        }
    }

    pub fn records(&self) -> &[Record] {
        match self {
            Snapshot::One(Some(record)) => std::slice::from_ref(record),
            Snapshot::One(None) => &[],
            Snapshot::Many(records) => records,
        }
    }
}
