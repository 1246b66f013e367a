//! Error types for the synchronization engine.

use thiserror::Error;

/// Main error type for fetch, subscription and cleanup operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The data source failed to set up a fetch or subscription.
    #[error("Data source error: {0}")]
    Source(String),

    /// A single cleanup callback failed.
    #[error("Cleanup callback failed: {0}")]
    Callback(String),

    /// One or more cleanup callbacks failed during a disposal.
    /// Every other callback still ran.
    #[error("{} cleanup callback(s) failed: {}", .0.len(), summarize(.0))]
    Cleanup(Vec<SyncError>),

    #[error("Unknown relation {relation:?} on {path:?}")]
    UnknownRelation { path: String, relation: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Merge two outcomes of teardown-style work, keeping every failure.
    pub(crate) fn merge(first: Result<()>, second: Result<()>) -> Result<()> {
        match (first, second) {
            (Ok(()), other) | (other, Ok(())) => other,
            (Err(a), Err(b)) => {
                let mut failures = a.into_failures();
                failures.extend(b.into_failures());
                Err(SyncError::Cleanup(failures))
            }
        }
    }

    fn into_failures(self) -> Vec<SyncError> {
        match self {
            SyncError::Cleanup(failures) => failures,
            other => vec![other],
        }
    }
}

fn summarize(errors: &[SyncError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
