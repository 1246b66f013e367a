//! Fetch lifecycle.
//!
//! - [`Fetcher`]: the `ReadyToFetch -> Fetched -> Disposed` state machine
//! - [`Syncable`]: a fetcher whose action is a standing subscription
//! - [`FetchOnce`]: a one-shot read action

mod action;
mod machine;

pub use action::{FetchOnce, Subscribe, Syncable};
pub use machine::{FetchAction, FetchContext, FetchState, Fetcher, OnFetch, UpdateOptions};
