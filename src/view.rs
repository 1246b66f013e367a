//! Live views.
//!
//! A [`SyncedView`] ties a reactive cell to the fetcher that feeds it. Every
//! snapshot the fetcher delivers is rebuilt into rendered resources, reusing
//! the relation views of records that stayed. Reading the value through
//! [`SyncedView::value`] starts the fetch on first use.

use crate::cell::{CellWatcher, ReactiveCell};
use crate::cleanup::{CleanupManager, LinkDirection};
use crate::client::ClientShared;
use crate::error::Result;
use crate::fetcher::{FetchState, Fetcher, OnFetch};
use crate::resources::{GraphBuilder, RecordFilter, Rendered};
use crate::types::{Shape, Snapshot, Target};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// How a view obtains its snapshots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ViewMode {
    /// Standing subscription, every change is pushed.
    #[default]
    Live,
    /// One read per target.
    Once,
}

/// Per-view settings.
#[derive(Clone, Default)]
pub struct ViewOptions {
    /// Overrides the client's `relation_layers`.
    pub relation_layers: Option<usize>,
    pub mode: ViewMode,
    /// Client-side record filter applied before rendering.
    pub filter: Option<RecordFilter>,
}

impl ViewOptions {
    pub fn relation_layers(mut self, layers: usize) -> Self {
        self.relation_layers = Some(layers);
        self
    }

    pub fn mode(mut self, mode: ViewMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn filter(mut self, filter: RecordFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl fmt::Debug for ViewOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewOptions")
            .field("relation_layers", &self.relation_layers)
            .field("mode", &self.mode)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

struct RenderState {
    filter: Option<RecordFilter>,
    /// Last snapshot and the epoch it arrived in.
    last: Option<(Snapshot, CleanupManager)>,
}

/// Turns snapshots into the cell's value. Rebuilds are serialized.
struct Renderer {
    client: Arc<ClientShared>,
    shape: Shape,
    layers: usize,
    cell: ReactiveCell<Rendered>,
    state: Mutex<RenderState>,
}

impl Renderer {
    fn render(&self, snapshot: &Snapshot, owner: &CleanupManager) {
        let rebuild = {
            let mut state = self.state.lock();
            let previous = self.cell.get();
            let rebuild = GraphBuilder::new(&self.client, owner, self.layers)
                .filter(state.filter.as_ref())
                .rebuild(snapshot, &previous);
            state.last = Some((snapshot.clone(), owner.clone()));
            self.cell.set(rebuild.rendered.clone());
            rebuild
        };

        if let Err(e) = rebuild.dispose_stale() {
            warn!(error = %e, "Disposing stale relation views failed");
        }
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.last = None;
        self.cell.set(Rendered::empty(self.shape));
    }
}

struct ViewInner {
    shape: Shape,
    fetcher: Fetcher<Target, Snapshot>,
    renderer: Arc<Renderer>,
}

/// A reactive, continuously updated view of one target.
///
/// Handles are cheap to clone and share the same view.
#[derive(Clone)]
pub struct SyncedView {
    inner: Arc<ViewInner>,
}

impl SyncedView {
    /// Create a view owned by `parent`: disposing `parent` disposes the view
    /// and every relation view it built.
    pub(crate) fn new(
        client: &Arc<ClientShared>,
        shape: Shape,
        target: Option<Target>,
        parent: &CleanupManager,
        options: ViewOptions,
    ) -> SyncedView {
        let layers = options
            .relation_layers
            .unwrap_or(client.config.relation_layers);

        let renderer = Arc::new(Renderer {
            client: client.clone(),
            shape,
            layers,
            cell: ReactiveCell::new(Rendered::empty(shape), client.config.watch_buffer),
            state: Mutex::new(RenderState {
                filter: options.filter,
                last: None,
            }),
        });

        let handler: OnFetch<Snapshot> = {
            let renderer = renderer.clone();
            Arc::new(move |snapshot: &Snapshot, epoch: &CleanupManager| renderer.render(snapshot, epoch))
        };

        let source = client.source.clone();
        let fetcher = match options.mode {
            ViewMode::Live => Fetcher::syncable(target, source, handler),
            ViewMode::Once => Fetcher::one_shot(target, source, handler),
        };

        {
            let renderer = renderer.clone();
            fetcher.on_update_target(move |target| {
                if target.is_none() {
                    renderer.clear();
                }
            });
        }
        {
            let renderer = renderer.clone();
            fetcher.on_reset(move || renderer.clear());
        }

        if let Err(e) = parent.link(LinkDirection::PropagateTo, fetcher.lifetime()) {
            warn!(fetcher = fetcher.id(), error = %e, "Linking view to its owner failed");
        }

        debug!(fetcher = fetcher.id(), shape = ?shape, layers, mode = ?options.mode, "Created view");

        SyncedView {
            inner: Arc::new(ViewInner {
                shape,
                fetcher,
                renderer,
            }),
        }
    }

    /// Current value, starting the fetch if it has not run yet.
    ///
    /// A live view is filled synchronously when the source delivers its
    /// initial snapshot during subscribe.
    pub fn value(&self) -> Result<Rendered> {
        self.inner.fetcher.trigger()?;
        Ok(self.peek())
    }

    /// Current value without starting a fetch.
    pub fn peek(&self) -> Rendered {
        self.inner.renderer.cell.get()
    }

    pub fn fetcher(&self) -> &Fetcher<Target, Snapshot> {
        &self.inner.fetcher
    }

    pub fn shape(&self) -> Shape {
        self.inner.shape
    }

    pub fn target(&self) -> Option<Target> {
        self.inner.fetcher.target()
    }

    pub fn fetch_state(&self) -> FetchState {
        self.inner.fetcher.fetch_state()
    }

    pub fn has_loaded(&self) -> bool {
        self.inner.fetcher.has_loaded()
    }

    /// Replace the client-side filter and re-render the last snapshot.
    pub fn set_filter(&self, filter: Option<RecordFilter>) {
        let last = {
            let mut state = self.inner.renderer.state.lock();
            state.filter = filter;
            state.last.clone()
        };

        if let Some((snapshot, epoch)) = last {
            if !epoch.is_disposed() {
                self.inner.renderer.render(&snapshot, &epoch);
            }
        }
    }

    /// Watch value changes.
    pub fn watch(&self) -> CellWatcher<Rendered> {
        self.inner.renderer.cell.watch()
    }

    /// Whether both handles refer to the same view.
    pub fn same(&self, other: &SyncedView) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SyncedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedView")
            .field("shape", &self.inner.shape)
            .field("fetcher", &self.inner.fetcher)
            .field("layers", &self.inner.renderer.layers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::resources::{RelationDef, RelationSettings};
    use crate::source::MemorySource;
    use crate::types::{Clause, Filter, Record};
    use serde_json::json;
    use std::time::Duration;

    fn setup() -> (Arc<ClientShared>, Arc<MemorySource>) {
        let source = Arc::new(MemorySource::new());
        source.insert("kings", "a", json!({"name": "Arthur"}));
        source.insert("knights", "k1", json!({"name": "Lancelot", "kingId": "a"}));
        source.insert("knights", "k2", json!({"name": "Gawain", "kingId": "a"}));

        let config = SyncConfig::default().with_relations(
            RelationSettings::new()
                .with("kings", "knights", RelationDef::has_many("knights", "kingId"))
                .with("knights", "king", RelationDef::has_one("kings", "kingId")),
        );
        let client = Arc::new(ClientShared {
            source: source.clone(),
            config,
        });
        (client, source)
    }

    fn knights_of(king: &str) -> Option<Target> {
        Some(Target::many(Filter::all("knights").with(Clause::eq("kingId", king))))
    }

    fn names(rendered: &Rendered) -> Vec<String> {
        rendered
            .resources()
            .iter()
            .map(|r| r.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_value_triggers_fetch() {
        let (client, source) = setup();
        let view = SyncedView::new(
            &client,
            Shape::One,
            Some(Target::one("kings", "a")),
            &CleanupManager::new(),
            ViewOptions::default(),
        );

        assert!(view.peek().is_empty());
        assert_eq!(view.fetch_state(), FetchState::ReadyToFetch);
        assert_eq!(source.subscription_count(), 0);

        let value = view.value().unwrap();
        assert_eq!(value.as_one().unwrap().id(), "a");
        assert_eq!(view.fetch_state(), FetchState::Fetched);
        assert!(view.has_loaded());
        assert_eq!(source.subscription_count(), 1);
    }

    #[test]
    fn test_live_view_follows_source() {
        let (client, source) = setup();
        let view = SyncedView::new(&client, Shape::Many, knights_of("a"), &CleanupManager::new(), ViewOptions::default());
        view.value().unwrap();
        assert_eq!(names(&view.peek()), vec!["Lancelot", "Gawain"]);

        source.insert("knights", "k3", json!({"name": "Percival", "kingId": "a"}));
        assert_eq!(names(&view.peek()), vec!["Lancelot", "Gawain", "Percival"]);

        source.update("knights", "k1", json!({"kingId": "b"}));
        assert_eq!(names(&view.peek()), vec!["Gawain", "Percival"]);
    }

    #[test]
    fn test_once_view_reads_once() {
        let (client, source) = setup();
        let view = SyncedView::new(
            &client,
            Shape::Many,
            knights_of("a"),
            &CleanupManager::new(),
            ViewOptions::default().mode(ViewMode::Once),
        );

        assert_eq!(view.value().unwrap().resources().len(), 2);
        assert_eq!(source.subscription_count(), 0);

        source.insert("knights", "k3", json!({"name": "Percival", "kingId": "a"}));
        assert_eq!(view.value().unwrap().resources().len(), 2);
    }

    #[test]
    fn test_empty_target_resets_value() {
        let (client, source) = setup();
        let view = SyncedView::new(&client, Shape::Many, knights_of("a"), &CleanupManager::new(), ViewOptions::default());
        view.value().unwrap();

        view.fetcher().update_target(None).unwrap();

        assert!(view.peek().is_empty());
        assert_eq!(view.fetch_state(), FetchState::Empty);
        assert_eq!(source.subscription_count(), 0);
    }

    #[test]
    fn test_reset_clears_value() {
        let (client, _) = setup();
        let view = SyncedView::new(&client, Shape::One, Some(Target::one("kings", "a")), &CleanupManager::new(), ViewOptions::default());
        view.value().unwrap();

        view.fetcher().reset().unwrap();

        assert!(view.peek().is_empty());
        assert!(!view.has_loaded());
        assert_eq!(view.fetch_state(), FetchState::Empty);
    }

    #[test]
    fn test_retarget_follows_new_target() {
        let (client, source) = setup();
        source.insert("kings", "b", json!({"name": "Lot"}));
        source.insert("knights", "k3", json!({"name": "Gaheris", "kingId": "b"}));

        let view = SyncedView::new(&client, Shape::Many, knights_of("a"), &CleanupManager::new(), ViewOptions::default());
        view.value().unwrap();

        view.fetcher().update_target(knights_of("b")).unwrap();

        assert_eq!(names(&view.peek()), vec!["Gaheris"]);
        assert_eq!(source.subscription_count(), 1);
    }

    #[test]
    fn test_parent_disposal_ends_view_and_relations() {
        let (client, source) = setup();
        let parent = CleanupManager::new();
        let view = SyncedView::new(&client, Shape::Many, knights_of("a"), &parent, ViewOptions::default());

        let knights = view.value().unwrap();
        let king = knights.resources()[0].relation("king").unwrap();
        assert_eq!(king.value().unwrap().as_one().unwrap().id(), "a");
        assert_eq!(source.subscription_count(), 2);

        parent.dispose().unwrap();

        assert_eq!(view.fetch_state(), FetchState::Disposed);
        assert!(king.fetcher().is_disposed());
        assert_eq!(source.subscription_count(), 0);
    }

    #[test]
    fn test_relation_layers_limit_nesting() {
        let (client, _) = setup();
        let view = SyncedView::new(
            &client,
            Shape::One,
            Some(Target::one("kings", "a")),
            &CleanupManager::new(),
            ViewOptions::default().relation_layers(2),
        );

        let king = view.value().unwrap();
        let knights = king.as_one().unwrap().relation("knights").unwrap();
        let knight_king = knights.value().unwrap().resources()[0].relation("king").unwrap();
        let innermost = knight_king.value().unwrap();

        assert!(innermost.as_one().unwrap().relation("knights").is_none());
    }

    #[test]
    fn test_set_filter_rerenders() {
        let (client, _) = setup();
        let view = SyncedView::new(&client, Shape::Many, knights_of("a"), &CleanupManager::new(), ViewOptions::default());
        view.value().unwrap();

        let only_gawain: RecordFilter =
            Arc::new(|r: &Record| r.get("name") == Some(&json!("Gawain")));
        view.set_filter(Some(only_gawain));
        assert_eq!(names(&view.peek()), vec!["Gawain"]);

        view.set_filter(None);
        assert_eq!(names(&view.peek()), vec!["Lancelot", "Gawain"]);
    }

    #[test]
    fn test_watch_sees_pushed_changes() {
        let (client, source) = setup();
        let view = SyncedView::new(&client, Shape::One, Some(Target::one("kings", "a")), &CleanupManager::new(), ViewOptions::default());
        let watcher = view.watch();
        view.value().unwrap();

        source.update("kings", "a", json!({"name": "Arthur Pendragon"}));

        let first = watcher.recv_timeout(Duration::from_millis(100)).unwrap();
        let second = watcher.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(first.value.as_one().unwrap().get("name"), Some(&json!("Arthur")));
        assert_eq!(
            second.value.as_one().unwrap().get("name"),
            Some(&json!("Arthur Pendragon"))
        );
    }
}
