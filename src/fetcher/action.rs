//! Fetch actions backed by a [`DataSource`].

use super::machine::{FetchAction, FetchContext, Fetcher, OnFetch};
use crate::error::Result;
use crate::source::DataSource;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Standing subscription: `Fetched` means the subscription is established.
/// Every pushed snapshot is delivered, not just the first one.
pub struct Subscribe<T, V> {
    source: Arc<dyn DataSource<T, V>>,
}

impl<T, V> Subscribe<T, V> {
    pub fn new(source: Arc<dyn DataSource<T, V>>) -> Self {
        Self { source }
    }
}

impl<T, V> FetchAction<T, V> for Subscribe<T, V>
where
    T: fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn fetch(&self, target: &T, context: FetchContext<T, V>) -> Result<()> {
        let sink_context = context.clone();
        let unsubscribe = self
            .source
            .subscribe(target, Box::new(move |snapshot| sink_context.deliver(snapshot)))?;

        debug!(target = ?target, "Subscription established");

        // Runs immediately if the epoch ended while subscribing.
        context.cleanup().on_dispose(unsubscribe);
        Ok(())
    }
}

/// Single read. A result arriving after the epoch ended is dropped.
pub struct FetchOnce<T, V> {
    source: Arc<dyn DataSource<T, V>>,
}

impl<T, V> FetchOnce<T, V> {
    pub fn new(source: Arc<dyn DataSource<T, V>>) -> Self {
        Self { source }
    }
}

impl<T, V> FetchAction<T, V> for FetchOnce<T, V>
where
    T: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn fetch(&self, target: &T, context: FetchContext<T, V>) -> Result<()> {
        let snapshot = self.source.fetch_once(target)?;
        context.deliver(snapshot);
        Ok(())
    }
}

/// A fetcher whose fetch action is a standing subscription.
pub type Syncable<T, V> = Fetcher<T, V>;

impl<T, V> Fetcher<T, V>
where
    T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Fetcher that keeps a subscription open for its current target.
    pub fn syncable(
        target: Option<T>,
        source: Arc<dyn DataSource<T, V>>,
        on_fetch: OnFetch<V>,
    ) -> Syncable<T, V> {
        Fetcher::new(target, Subscribe::new(source), on_fetch)
    }

    /// Fetcher that reads its current target once per epoch.
    pub fn one_shot(
        target: Option<T>,
        source: Arc<dyn DataSource<T, V>>,
        on_fetch: OnFetch<V>,
    ) -> Fetcher<T, V> {
        Fetcher::new(target, FetchOnce::new(source), on_fetch)
    }
}
