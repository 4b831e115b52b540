// ── Paginated fetch engine ──
//
// A lazily fetched, optionally paginated list of items. `refresh` starts
// over from the first page; `fetch` continues from the last page token.
// Both run as owned actions of the embedded view model, so at most one
// fetch is in flight and `loading` follows pagination automatically.

use std::future::{self, Future};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use crate::action::Action;
use crate::error::{ActionError, ViewModelError};
use crate::list::ItemList;
use crate::property::MutableProperty;
use crate::view_model::ViewModel;

/// One batch returned by a fetch function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedPage<Item, Page> {
    pub items: Vec<Item>,
    /// Token for the following page. `None` means "no pagination": the
    /// next `fetch` refreshes.
    pub next_page: Option<Page>,
}

impl<Item, Page> FetchedPage<Item, Page> {
    pub fn new(items: Vec<Item>, next_page: Option<Page>) -> Self {
        Self { items, next_page }
    }
}

/// What the engine is doing. Refreshing and fetching the next page are
/// mutually exclusive by construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPhase {
    #[default]
    Idle,
    Refreshing,
    FetchingNextPage,
}

/// Snapshot of the fetched items, shared with observers.
pub type Items<Item> = Arc<Vec<Arc<Item>>>;

/// Outcome of a refresh or fetch: the items delivered by this call.
pub type FetchResult<Item, E> = Result<Vec<Arc<Item>>, ActionError<E>>;

type FetchFn<Item, Page, E> =
    Box<dyn Fn(Option<Page>) -> BoxStream<'static, Result<FetchedPage<Item, Page>, E>> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
enum FetchMode {
    Refresh,
    NextPage,
}

/// Paginated list driven by a fetch function.
///
/// The fetch function receives `None` on refresh and the last returned
/// page token otherwise. Items accumulate in page order; only a refresh
/// (or a fetch with no page token) replaces them, and only once its first
/// batch arrives, so a failed refresh keeps the current items.
pub struct PaginatedFetchEngine<Item, Page, E> {
    view_model: ViewModel,
    state: Arc<PageState<Item, Page, E>>,
    refresh_action: OnceLock<Action<(), Vec<Arc<Item>>, E>>,
    fetch_action: OnceLock<Action<(), Vec<Arc<Item>>, E>>,
}

struct PageState<Item, Page, E> {
    fetch: FetchFn<Item, Page, E>,
    items: watch::Sender<Items<Item>>,
    next_page: Mutex<Option<Page>>,
    phase: MutableProperty<FetchPhase>,
    has_next_page: MutableProperty<bool>,
    empty_message: MutableProperty<Option<String>>,
}

impl<Item, Page, E> PaginatedFetchEngine<Item, Page, E>
where
    Item: Send + Sync + 'static,
    Page: Clone + Send + Sync + 'static,
    E: ViewModelError,
{
    /// Engine whose fetch function resolves to a single batch.
    pub fn new<F, Fut>(fetch: F) -> Self
    where
        F: Fn(Option<Page>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FetchedPage<Item, Page>, E>> + Send + 'static,
    {
        Self::with_stream(move |page| stream::once(fetch(page)))
    }

    /// Engine whose fetch function streams any number of batches.
    pub fn with_stream<F, S>(fetch: F) -> Self
    where
        F: Fn(Option<Page>) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<FetchedPage<Item, Page>, E>> + Send + 'static,
    {
        Self::with_view_model(ViewModel::new(), fetch)
    }

    /// Like [`with_stream`](Self::with_stream), embedding `view_model`
    /// (for a title or a non-default configuration).
    pub fn with_view_model<F, S>(view_model: ViewModel, fetch: F) -> Self
    where
        F: Fn(Option<Page>) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<FetchedPage<Item, Page>, E>> + Send + 'static,
    {
        let (items, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            view_model,
            state: Arc::new(PageState {
                fetch: Box::new(move |page| fetch(page).boxed()),
                items,
                next_page: Mutex::new(None),
                phase: MutableProperty::new(FetchPhase::Idle),
                has_next_page: MutableProperty::new(true),
                empty_message: MutableProperty::new(None),
            }),
            refresh_action: OnceLock::new(),
            fetch_action: OnceLock::new(),
        }
    }

    pub fn view_model(&self) -> &ViewModel {
        &self.view_model
    }

    // ── Actions ──────────────────────────────────────────────────────

    /// Action behind [`refresh`](Self::refresh), created on first use.
    pub fn refresh_action(&self) -> &Action<(), Vec<Arc<Item>>, E> {
        self.refresh_action
            .get_or_init(|| self.create_fetch_action(FetchMode::Refresh))
    }

    /// Action behind [`fetch`](Self::fetch), created on first use.
    pub fn fetch_action(&self) -> &Action<(), Vec<Arc<Item>>, E> {
        self.fetch_action
            .get_or_init(|| self.create_fetch_action(FetchMode::NextPage))
    }

    /// Start over from the first page.
    ///
    /// Rejected with [`ActionError::Disabled`] while the view model is
    /// loading. On failure the error also goes to the view model's error
    /// stream and the items are left as they were.
    pub fn refresh(&self) -> BoxFuture<'static, FetchResult<Item, E>> {
        self.refresh_action().apply(())
    }

    /// Fetch the page after the last one, or refresh when there is no page
    /// token yet.
    pub fn fetch(&self) -> BoxFuture<'static, FetchResult<Item, E>> {
        self.fetch_action().apply(())
    }

    /// [`fetch`](Self::fetch) if there is a page token and more pages;
    /// otherwise resolve at once with no items.
    pub fn fetch_if_needed(&self) -> BoxFuture<'static, FetchResult<Item, E>> {
        if self.next_page().is_some() && self.has_next_page() {
            self.fetch()
        } else {
            Box::pin(future::ready(Ok(Vec::new())))
        }
    }

    fn create_fetch_action(&self, mode: FetchMode) -> Action<(), Vec<Arc<Item>>, E> {
        let state = Arc::clone(&self.state);
        self.view_model
            .create_action(move |()| Arc::clone(&state).start(mode))
    }

    // ── State ────────────────────────────────────────────────────────

    pub fn next_page(&self) -> Option<Page> {
        self.state.lock_next_page().clone()
    }

    pub fn phase(&self) -> FetchPhase {
        self.state.phase.get()
    }

    pub fn observe_phase(&self) -> impl Stream<Item = FetchPhase> + Send + 'static {
        self.state.phase.observe()
    }

    pub fn is_refreshing(&self) -> bool {
        self.phase() == FetchPhase::Refreshing
    }

    pub fn is_fetching_next_page(&self) -> bool {
        self.phase() == FetchPhase::FetchingNextPage
    }

    /// `true` until a fetch returns no items.
    pub fn has_next_page(&self) -> bool {
        self.state.has_next_page.get()
    }

    pub fn observe_has_next_page(&self) -> impl Stream<Item = bool> + Send + 'static {
        self.state.has_next_page.observe()
    }

    // ── Items ────────────────────────────────────────────────────────

    pub fn items(&self) -> Items<Item> {
        Arc::clone(&self.state.items.borrow())
    }

    /// Snapshots after every applied batch, starting with the current one.
    pub fn observe_items(&self) -> impl Stream<Item = Items<Item>> + Send + 'static {
        WatchStream::new(self.state.items.subscribe())
    }

    pub fn observe_count(&self) -> impl Stream<Item = usize> + Send + 'static {
        self.observe_items().map(|items| items.len())
    }

    pub fn set_empty_message(&self, message: Option<String>) -> bool {
        self.state.empty_message.set(message)
    }

    pub fn observe_empty_message(&self) -> impl Stream<Item = Option<String>> + Send + 'static {
        self.state.empty_message.observe()
    }
}

impl<Item, Page, E> ItemList for PaginatedFetchEngine<Item, Page, E>
where
    Item: Send + Sync + 'static,
    Page: Clone + Send + Sync + 'static,
    E: ViewModelError,
{
    type Item = Item;

    fn count(&self) -> usize {
        self.state.items.borrow().len()
    }

    fn item(&self, index: usize) -> Option<Arc<Item>> {
        self.state.items.borrow().get(index).cloned()
    }

    fn localized_empty_message(&self) -> Option<String> {
        self.state.empty_message.get()
    }
}

impl<Item, Page, E> std::fmt::Debug for PaginatedFetchEngine<Item, Page, E>
where
    Item: Send + Sync + 'static,
    Page: Clone + Send + Sync + 'static,
    E: ViewModelError,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedFetchEngine")
            .field("view_model", &self.view_model)
            .field("phase", &self.phase())
            .field("count", &self.count())
            .field("has_next_page", &self.has_next_page())
            .field("paginated", &self.state.lock_next_page().is_some())
            .finish_non_exhaustive()
    }
}

impl<Item, Page, E> PageState<Item, Page, E>
where
    Item: Send + Sync + 'static,
    Page: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    fn lock_next_page(&self) -> MutexGuard<'_, Option<Page>> {
        self.next_page.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs synchronously inside `Action::apply`, after the action was
    /// admitted, so the phase flips before `apply` returns.
    fn start(self: Arc<Self>, mode: FetchMode) -> BoxFuture<'static, Result<Vec<Arc<Item>>, E>> {
        let page = match mode {
            FetchMode::Refresh => None,
            FetchMode::NextPage => self.lock_next_page().clone(),
        };
        let phase = if page.is_some() {
            FetchPhase::FetchingNextPage
        } else {
            FetchPhase::Refreshing
        };
        self.phase.set(phase);
        debug!(?phase, "fetch started");

        let mut batches = (self.fetch)(page);
        let reset = PhaseReset {
            state: Arc::clone(&self),
        };
        Box::pin(async move {
            let _reset = reset;
            let mut replace = phase == FetchPhase::Refreshing;
            let mut fetched = Vec::new();
            while let Some(batch) = batches.next().await {
                let FetchedPage { items, next_page } = batch?;
                let items: Vec<Arc<Item>> = items.into_iter().map(Arc::new).collect();
                self.apply(&items, next_page, replace);
                replace = false;
                fetched.extend(items);
            }
            Ok(fetched)
        })
    }

    fn apply(&self, batch: &[Arc<Item>], next_page: Option<Page>, replace: bool) {
        let mut total = 0;
        self.items.send_modify(|items| {
            let items = Arc::make_mut(items);
            if replace {
                items.clear();
            }
            items.extend(batch.iter().cloned());
            total = items.len();
        });
        *self.lock_next_page() = next_page;
        self.has_next_page.set(!batch.is_empty());
        debug!(received = batch.len(), total, replace, "applied page");
    }
}

/// Returns the engine to `Idle` when a fetch ends, however it ends.
struct PhaseReset<Item, Page, E> {
    state: Arc<PageState<Item, Page, E>>,
}

impl<Item, Page, E> Drop for PhaseReset<Item, Page, E> {
    fn drop(&mut self) {
        self.state.phase.set(FetchPhase::Idle);
    }
}
