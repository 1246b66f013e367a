//! Client configuration.

use crate::error::Result;
use crate::resources::RelationSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration shared by every view a client creates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How many levels of nested relation views a view builds.
    /// Default: 1
    pub relation_layers: usize,

    /// Buffered change notifications per view watcher before it is dropped.
    /// Default: 64
    pub watch_buffer: usize,

    /// Relations per collection path.
    pub relations: RelationSettings,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            relation_layers: 1,
            watch_buffer: 64,
            relations: RelationSettings::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn with_relations(mut self, relations: RelationSettings) -> Self {
        self.relations = relations;
        self
    }

    pub fn with_relation_layers(mut self, layers: usize) -> Self {
        self.relation_layers = layers;
        self
    }
}
