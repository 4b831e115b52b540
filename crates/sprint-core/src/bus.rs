// ── Loading and error buses ──
//
// Many independent operations report into one `loading` flag and one
// error channel per view model. Branches hold weak references, so the
// bus (and every observer stream) ends the moment its owner drops it.

use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_stream::stream;
use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::DEFAULT_ERROR_CAPACITY;
use crate::error::{BusError, SharedError};

// ── LoadingBus ───────────────────────────────────────────────────────

/// OR-aggregation of independently registered loading flags.
///
/// `loading` is `true` iff the latest value of any branch is `true`.
/// Branches start at `false`. Once every handle to a branch is gone (its
/// action dropped, its registered stream finished) the branch is released
/// if it last read `false`; one that last read `true` stays pinned, so a
/// source that completes while loading keeps the bus loading. The bus
/// itself only completes when dropped.
#[derive(Debug)]
pub struct LoadingBus {
    shared: Arc<LoadingShared>,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct LoadingShared {
    table: Mutex<BranchTable>,
    loading: watch::Sender<bool>,
}

/// Branch values by slot; `None` slots are free for reuse.
#[derive(Debug, Default)]
struct BranchTable {
    slots: Vec<Option<bool>>,
    free: Vec<usize>,
}

impl BranchTable {
    fn insert(&mut self) -> usize {
        if let Some(index) = self.free.pop() {
            if let Some(slot) = self.slots.get_mut(index) {
                *slot = Some(false);
                return index;
            }
        }
        self.slots.push(Some(false));
        self.slots.len() - 1
    }

    fn release(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if *slot == Some(false) {
                *slot = None;
                self.free.push(index);
            }
        }
    }

    fn any(&self) -> bool {
        self.slots.iter().any(|slot| *slot == Some(true))
    }

    fn live(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

impl LoadingBus {
    pub fn new() -> Self {
        let (loading, _) = watch::channel(false);
        Self {
            shared: Arc::new(LoadingShared {
                table: Mutex::new(BranchTable::default()),
                loading,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_loading(&self) -> bool {
        *self.shared.loading.borrow()
    }

    /// Stream of the aggregate, starting with the current value.
    pub fn observe(&self) -> impl Stream<Item = bool> + Send + 'static {
        WatchStream::new(self.shared.loading.subscribe())
    }

    /// Add a branch driven directly through the returned handle.
    pub fn branch(&self) -> LoadingBranch {
        let index = self.shared.lock().insert();
        LoadingBranch {
            slot: Arc::new(BranchSlot {
                shared: Arc::downgrade(&self.shared),
                index,
            }),
        }
    }

    /// Add a branch fed by `stream`, pumped on the current Tokio runtime.
    ///
    /// Fails without adding a branch when called off a runtime. The branch
    /// reads `false` until the stream's first value has been pumped, even
    /// when that value is `true`. The pump stops when the stream ends or
    /// the bus is dropped.
    pub fn register<S>(&self, stream: S) -> Result<(), BusError>
    where
        S: Stream<Item = bool> + Send + 'static,
    {
        let handle = Handle::try_current()?;
        self.register_with(&handle, stream);
        Ok(())
    }

    /// [`register`](Self::register) with the pump spawned on `handle`, for
    /// callers on threads outside the runtime.
    pub fn register_with<S>(&self, handle: &Handle, stream: S)
    where
        S: Stream<Item = bool> + Send + 'static,
    {
        let branch = self.branch();
        let cancel = self.cancel.clone();
        debug!(branch = branch.slot.index, "registered loading stream");
        handle.spawn(async move {
            let mut stream = pin!(stream);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    next = stream.next() => match next {
                        Some(loading) => {
                            if !branch.set(loading) {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
    }

    /// Branches still held or pinned `true`.
    pub fn branch_count(&self) -> usize {
        self.shared.lock().live()
    }
}

impl Default for LoadingBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LoadingBus {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl LoadingShared {
    fn lock(&self) -> MutexGuard<'_, BranchTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, index: usize, value: bool) {
        let mut table = self.lock();
        if let Some(Some(slot)) = table.slots.get_mut(index) {
            *slot = value;
        }
        let any = table.any();
        self.publish(any);
    }

    /// Set `index` only if no branch is loading, atomically.
    fn try_acquire(&self, index: usize) -> bool {
        let mut table = self.lock();
        if table.any() {
            return false;
        }
        if let Some(Some(slot)) = table.slots.get_mut(index) {
            *slot = true;
        }
        self.publish(true);
        true
    }

    fn publish(&self, loading: bool) {
        let changed = self.loading.send_if_modified(|current| {
            if *current == loading {
                false
            } else {
                *current = loading;
                true
            }
        });
        if changed {
            debug!(loading, "loading changed");
        }
    }
}

/// Handle to one branch of a [`LoadingBus`].
///
/// Clones share the branch; it is released when the last clone drops.
#[derive(Debug, Clone)]
pub struct LoadingBranch {
    slot: Arc<BranchSlot>,
}

#[derive(Debug)]
struct BranchSlot {
    shared: Weak<LoadingShared>,
    index: usize,
}

impl Drop for BranchSlot {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.lock().release(self.index);
        }
    }
}

impl LoadingBranch {
    /// Report this branch's state. Returns `false` once the bus is gone.
    pub fn set(&self, loading: bool) -> bool {
        match self.slot.shared.upgrade() {
            Some(shared) => {
                shared.set(self.slot.index, loading);
                true
            }
            None => false,
        }
    }

    /// Mark this branch loading unless the bus already is.
    pub(crate) fn try_acquire(&self) -> bool {
        self.slot
            .shared
            .upgrade()
            .is_some_and(|shared| shared.try_acquire(self.slot.index))
    }

    /// Whether the owning bus exists and is not loading.
    pub(crate) fn bus_idle(&self) -> bool {
        self.slot
            .shared
            .upgrade()
            .is_some_and(|shared| !*shared.loading.borrow())
    }
}

// ── ErrorBus ─────────────────────────────────────────────────────────

/// Merge of independently registered error sources.
///
/// Every error from every source is forwarded as-is to all observers;
/// there is no replay, so observers only see errors raised after they
/// subscribed. Completes only when dropped.
#[derive(Debug)]
pub struct ErrorBus {
    shared: Arc<ErrorShared>,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct ErrorShared {
    tx: broadcast::Sender<SharedError>,
}

impl ErrorBus {
    /// `capacity` bounds how far an observer may lag before skipping. Zero
    /// is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            shared: Arc::new(ErrorShared { tx }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn observe(&self) -> BoxStream<'static, SharedError> {
        let mut rx = self.shared.tx.subscribe();
        Box::pin(stream! {
            loop {
                match rx.recv().await {
                    Ok(error) => yield error,
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "error observer lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// A handle for pushing errors in directly.
    pub fn sink(&self) -> ErrorSink {
        ErrorSink {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Merge `stream` into the bus. Same runtime rules as
    /// [`LoadingBus::register`].
    pub fn register<S>(&self, stream: S) -> Result<(), BusError>
    where
        S: Stream<Item = SharedError> + Send + 'static,
    {
        let handle = Handle::try_current()?;
        self.register_with(&handle, stream);
        Ok(())
    }

    pub fn register_with<S>(&self, handle: &Handle, stream: S)
    where
        S: Stream<Item = SharedError> + Send + 'static,
    {
        let sink = self.sink();
        let cancel = self.cancel.clone();
        handle.spawn(async move {
            let mut stream = pin!(stream);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    next = stream.next() => match next {
                        Some(error) => {
                            if !sink.send(error) {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
    }

    pub fn observer_count(&self) -> usize {
        self.shared.tx.receiver_count()
    }
}

impl Default for ErrorBus {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_CAPACITY)
    }
}

impl Drop for ErrorBus {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle for reporting into an [`ErrorBus`].
#[derive(Debug, Clone)]
pub struct ErrorSink {
    shared: Weak<ErrorShared>,
}

impl ErrorSink {
    /// Returns `false` once the bus is gone.
    pub fn send(&self, error: SharedError) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        debug!(error = %error, "error reported");
        // No observers is not a failure: errors are fire-and-forget.
        let _ = shared.tx.send(error);
        true
    }
}
