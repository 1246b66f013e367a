//! In-process data source over JSON records.

use super::{DataSource, SnapshotSink, Unsubscribe};
use crate::error::{Result, SyncError};
use crate::types::{Clause, Filter, Key, Record, Snapshot, Target};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

type Table = BTreeMap<String, Map<String, Value>>;

/// Unique identifier for a source subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceSubscriptionId(pub u64);

/// Internal subscription state.
struct Subscription {
    target: Target,
    sink: Arc<SnapshotSink<Snapshot>>,
    /// Last snapshot sent, to skip pushes that change nothing.
    last: Snapshot,
}

impl Subscription {
    /// Whether a write to `path` can change this subscription's result.
    fn watches(&self, path: &str) -> bool {
        match &self.target {
            Target::One(key) => key.path == path,
            Target::Many(filter) => {
                filter.path == path
                    || filter.clauses.iter().any(|clause| match clause {
                        Clause::Joined { table, .. } => table == path,
                        Clause::Eq { .. } => false,
                    })
            }
        }
    }
}

type Subscriptions = RwLock<HashMap<SourceSubscriptionId, Subscription>>;

/// Collections of JSON records that can be read and watched.
///
/// Records within a collection are ordered by id. Subscribers get the
/// current snapshot right away, then a new one after every write that
/// changes their result.
pub struct MemorySource {
    tables: RwLock<HashMap<String, Table>>,
    subscriptions: Arc<Subscriptions>,
    next_id: AtomicU64,
    /// When set, reads and subscriptions fail with this message.
    unavailable: RwLock<Option<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            unavailable: RwLock::new(None),
        }
    }

    /// Insert or replace a record. Non-object values store an empty payload.
    pub fn insert(&self, path: &str, id: &str, value: Value) {
        let data = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.tables
            .write()
            .entry(path.to_string())
            .or_default()
            .insert(id.to_string(), data);

        self.publish(path);
    }

    /// Merge fields into an existing record. Returns false if it is missing.
    pub fn update(&self, path: &str, id: &str, fields: Value) -> bool {
        {
            let mut tables = self.tables.write();
            let Some(data) = tables.get_mut(path).and_then(|t| t.get_mut(id)) else {
                return false;
            };
            if let Value::Object(fields) = fields {
                data.extend(fields);
            }
        }

        self.publish(path);
        true
    }

    /// Delete a record. Returns false if it did not exist.
    pub fn remove(&self, path: &str, id: &str) -> bool {
        let removed = self
            .tables
            .write()
            .get_mut(path)
            .map(|t| t.remove(id).is_some())
            .unwrap_or(false);

        if removed {
            self.publish(path);
        }
        removed
    }

    pub fn get(&self, path: &str, id: &str) -> Option<Record> {
        self.read_one(&Key::new(path, id))
    }

    /// Make every read and subscription fail (`Some`) or succeed (`None`).
    pub fn set_unavailable(&self, reason: Option<String>) {
        *self.unavailable.write() = reason;
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    fn check_available(&self) -> Result<()> {
        match self.unavailable.read().as_ref() {
            Some(reason) => Err(SyncError::Source(reason.clone())),
            None => Ok(()),
        }
    }

    fn evaluate(&self, target: &Target) -> Snapshot {
        match target {
            Target::One(key) => Snapshot::One(self.read_one(key)),
            Target::Many(filter) => Snapshot::Many(self.read_many(filter)),
        }
    }

    fn read_one(&self, key: &Key) -> Option<Record> {
        let tables = self.tables.read();
        let data = tables.get(&key.path)?.get(&key.id)?;
        Some(Record::new(key.path.clone(), key.id.clone(), data.clone()))
    }

    fn read_many(&self, filter: &Filter) -> Vec<Record> {
        let tables = self.tables.read();
        let Some(table) = tables.get(&filter.path) else {
            return Vec::new();
        };

        table
            .iter()
            .filter(|(id, data)| {
                filter
                    .clauses
                    .iter()
                    .all(|clause| Self::matches(&tables, clause, id, data))
            })
            .map(|(id, data)| Record::new(filter.path.clone(), id.clone(), data.clone()))
            .collect()
    }

    fn matches(
        tables: &HashMap<String, Table>,
        clause: &Clause,
        id: &str,
        data: &Map<String, Value>,
    ) -> bool {
        match clause {
            Clause::Eq { field, value } => data.get(field) == Some(value),
            Clause::Joined {
                table,
                source_field,
                source_id,
                target_field,
            } => tables.get(table).is_some_and(|rows| {
                rows.values().any(|row| {
                    row.get(source_field).and_then(Value::as_str) == Some(source_id.as_str())
                        && row.get(target_field).and_then(Value::as_str) == Some(id)
                })
            }),
        }
    }

    /// Push fresh snapshots to subscriptions affected by a write to `path`.
    /// Sinks run after every lock is released.
    fn publish(&self, path: &str) {
        let mut deliveries = Vec::new();

        {
            let mut subs = self.subscriptions.write();
            for (id, sub) in subs.iter_mut() {
                if !sub.watches(path) {
                    continue;
                }
                let snapshot = self.evaluate(&sub.target);
                if snapshot == sub.last {
                    continue;
                }
                trace!(subscription = id.0, path, "Pushing snapshot");
                sub.last = snapshot.clone();
                deliveries.push((sub.sink.clone(), snapshot));
            }
        }

        for (sink, snapshot) in deliveries {
            sink(snapshot);
        }
    }

    fn unsubscribe(subscriptions: &Weak<Subscriptions>, id: SourceSubscriptionId) {
        if let Some(subs) = subscriptions.upgrade() {
            if subs.write().remove(&id).is_some() {
                debug!(subscription = id.0, "Source subscription removed");
            }
        }
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSource<Target, Snapshot> for MemorySource {
    fn fetch_once(&self, target: &Target) -> Result<Snapshot> {
        self.check_available()?;
        Ok(self.evaluate(target))
    }

    fn subscribe(&self, target: &Target, sink: SnapshotSink<Snapshot>) -> Result<Unsubscribe> {
        self.check_available()?;

        let id = SourceSubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let snapshot = self.evaluate(target);
        let sink = Arc::new(sink);

        self.subscriptions.write().insert(
            id,
            Subscription {
                target: target.clone(),
                sink: sink.clone(),
                last: snapshot.clone(),
            },
        );
        debug!(subscription = id.0, target = ?target, "Source subscription added");

        sink(snapshot);

        let subscriptions = Arc::downgrade(&self.subscriptions);
        Ok(Box::new(move || Self::unsubscribe(&subscriptions, id)))
    }
}
