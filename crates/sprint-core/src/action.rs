// ── Actions ──
//
// A unit of asynchronous work with an `executing` flag, an error stream
// and mutual exclusion. Binding an action to a view model feeds both into
// the view model's buses.

use std::future::{self, Future};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_stream::stream;
use futures_core::Stream;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, warn};

use crate::bus::LoadingBranch;
use crate::config::DEFAULT_ERROR_CAPACITY;
use crate::error::ActionError;

type Work<I, O, E> = Box<dyn Fn(I) -> BoxFuture<'static, Result<O, E>> + Send + Sync>;
type Reporter<E> = Box<dyn Fn(&Arc<E>) + Send + Sync>;

/// Asynchronous work that runs at most once at a time.
///
/// [`apply`](Self::apply) checks availability and marks the action
/// executing synchronously, then returns a future that drives the work.
/// Dropping that future cancels the work and clears `executing`.
///
/// Clones share the same state.
pub struct Action<I, O, E> {
    inner: Arc<ActionInner<I, O, E>>,
}

struct ActionInner<I, O, E> {
    work: Work<I, O, E>,
    state: Mutex<ActionState<E>>,
    executing: watch::Sender<bool>,
    errors: broadcast::Sender<Arc<E>>,
}

struct ActionState<E> {
    executing: bool,
    /// Loading branch of the owning view model. While set, the action only
    /// starts if the whole owner is idle, and it holds this branch while it
    /// runs.
    owner: Option<LoadingBranch>,
    loading: Vec<LoadingBranch>,
    reporters: Vec<Reporter<E>>,
}

impl<I, O, E> Action<I, O, E>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Send + Sync + 'static,
{
    /// Wrap `work`. Whatever `work` does before returning its future runs
    /// synchronously inside [`apply`](Self::apply).
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
    {
        let (executing, _) = watch::channel(false);
        let (errors, _) = broadcast::channel(DEFAULT_ERROR_CAPACITY);
        Self {
            inner: Arc::new(ActionInner {
                work: Box::new(move |input| Box::pin(work(input))),
                state: Mutex::new(ActionState {
                    executing: false,
                    owner: None,
                    loading: Vec::new(),
                    reporters: Vec::new(),
                }),
                executing,
                errors,
            }),
        }
    }

    pub fn is_executing(&self) -> bool {
        self.inner.lock().executing
    }

    /// Stream of the executing flag, starting with the current value.
    pub fn observe_executing(&self) -> impl Stream<Item = bool> + Send + 'static {
        WatchStream::new(self.inner.executing.subscribe())
    }

    /// Whether [`apply`](Self::apply) would start right now.
    pub fn is_enabled(&self) -> bool {
        let state = self.inner.lock();
        !state.executing && state.owner.as_ref().is_none_or(LoadingBranch::bus_idle)
    }

    /// Errors raised by the work from now on.
    pub fn errors(&self) -> BoxStream<'static, Arc<E>> {
        let mut rx = self.inner.errors.subscribe();
        Box::pin(stream! {
            loop {
                match rx.recv().await {
                    Ok(error) => yield error,
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "action error observer lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Start the work with `input`.
    ///
    /// Resolves to [`ActionError::Disabled`] without running anything if
    /// the action is already executing or its owner is loading.
    pub fn apply(&self, input: I) -> BoxFuture<'static, Result<O, ActionError<E>>> {
        let Some(guard) = self.begin() else {
            debug!("action is disabled, rejecting");
            return Box::pin(future::ready(Err(ActionError::Disabled)));
        };
        let work = (self.inner.work)(input);
        Box::pin(async move {
            let result = work.await.map_err(|error| {
                let error = Arc::new(error);
                guard.report(&error);
                ActionError::Failed(error)
            });
            drop(guard);
            result
        })
    }

    pub(crate) fn set_owner(&self, owner: LoadingBranch) {
        self.inner.lock().owner = Some(owner);
    }

    pub(crate) fn add_loading(&self, branch: LoadingBranch) {
        let mut state = self.inner.lock();
        if state.executing {
            branch.set(true);
        }
        state.loading.push(branch);
    }

    pub(crate) fn add_reporter(&self, reporter: impl Fn(&Arc<E>) + Send + Sync + 'static) {
        self.inner.lock().reporters.push(Box::new(reporter));
    }

    fn begin(&self) -> Option<ExecutionGuard<I, O, E>> {
        let mut state = self.inner.lock();
        if state.executing {
            return None;
        }
        if let Some(owner) = &state.owner {
            // Check-and-set under the bus lock: two actions of one owner can
            // never both pass.
            if !owner.try_acquire() {
                return None;
            }
        }
        state.executing = true;
        for branch in &state.loading {
            branch.set(true);
        }
        drop(state);
        self.inner.executing.send_replace(true);
        Some(ExecutionGuard {
            inner: Arc::clone(&self.inner),
        })
    }
}

impl<I, O, E> Clone for Action<I, O, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, O, E> std::fmt::Debug for Action<I, O, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Action")
            .field("executing", &state.executing)
            .field("owned", &state.owner.is_some())
            .field("loading_branches", &state.loading.len())
            .field("reporters", &state.reporters.len())
            .finish()
    }
}

impl<I, O, E> ActionInner<I, O, E> {
    fn lock(&self) -> MutexGuard<'_, ActionState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held by a running execution; releases the action when dropped.
struct ExecutionGuard<I, O, E> {
    inner: Arc<ActionInner<I, O, E>>,
}

impl<I, O, E> ExecutionGuard<I, O, E> {
    fn report(&self, error: &Arc<E>) {
        let state = self.inner.lock();
        for reporter in &state.reporters {
            reporter(error);
        }
        drop(state);
        // Nobody listening on the action itself is fine.
        let _ = self.inner.errors.send(Arc::clone(error));
    }
}

impl<I, O, E> Drop for ExecutionGuard<I, O, E> {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.executing = false;
        if let Some(owner) = &state.owner {
            owner.set(false);
        }
        for branch in &state.loading {
            branch.set(false);
        }
        drop(state);
        self.inner.executing.send_replace(false);
    }
}
