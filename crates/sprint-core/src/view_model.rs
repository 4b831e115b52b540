// ── View model core ──
//
// Title, activity, loading and errors for one screen-sized unit of UI
// state. Platform adapters flip `active`; actions and streams report into
// `loading` and `errors`.

use std::future::{Future, ready};
use std::sync::Arc;

use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::runtime::Handle;
use tracing::debug;

use crate::action::Action;
use crate::bus::{ErrorBus, LoadingBus};
use crate::config::ViewModelConfig;
use crate::error::{BusError, SharedError, ViewModelError};
use crate::gate::ActivityGate;
use crate::property::MutableProperty;
use crate::signal::{self, Signal};

/// Shared state every view model carries.
///
/// `enabled` is always `!loading`. Dropping the view model completes every
/// stream it handed out, including gated signals built on its `active`
/// gate.
#[derive(Debug)]
pub struct ViewModel {
    title: MutableProperty<Option<String>>,
    active: ActivityGate,
    loading: LoadingBus,
    errors: ErrorBus,
    config: ViewModelConfig,
}

impl ViewModel {
    /// Untitled, inactive, default configuration.
    pub fn new() -> Self {
        Self::with_config(None, ViewModelConfig::default())
    }

    pub fn with_title(title: impl Into<String>) -> Self {
        Self::with_config(Some(title.into()), ViewModelConfig::default())
    }

    pub fn with_config(title: Option<String>, config: ViewModelConfig) -> Self {
        Self {
            title: MutableProperty::new(title),
            active: ActivityGate::new(false),
            loading: LoadingBus::new(),
            errors: ErrorBus::new(config.error_capacity),
            config,
        }
    }

    pub fn config(&self) -> &ViewModelConfig {
        &self.config
    }

    // ── Title ────────────────────────────────────────────────────────

    pub fn title(&self) -> Option<String> {
        self.title.get()
    }

    pub fn set_title(&self, title: Option<String>) -> bool {
        self.title.set(title)
    }

    pub fn observe_title(&self) -> impl Stream<Item = Option<String>> + Send + 'static {
        self.title.observe()
    }

    // ── Activity ─────────────────────────────────────────────────────

    pub fn gate(&self) -> &ActivityGate {
        &self.active
    }

    pub fn is_active(&self) -> bool {
        self.active.is_active()
    }

    /// Called by platform adapters on visibility changes.
    pub fn set_active(&self, active: bool) -> bool {
        self.active.set(active)
    }

    /// Fires on every inactive → active flip, and at once if already active.
    pub fn did_become_active(&self) -> impl Stream<Item = ()> + Send + 'static {
        self.active
            .observe()
            .filter(|&active| ready(active))
            .map(|_| ())
    }

    /// Fires on every active → inactive flip, and at once if already
    /// inactive (so also right after construction).
    pub fn did_become_inactive(&self) -> impl Stream<Item = ()> + Send + 'static {
        self.active
            .observe()
            .filter(|&active| ready(!active))
            .map(|_| ())
    }

    // ── Loading ──────────────────────────────────────────────────────

    pub fn is_loading(&self) -> bool {
        self.loading.is_loading()
    }

    pub fn observe_loading(&self) -> impl Stream<Item = bool> + Send + 'static {
        self.loading.observe()
    }

    pub fn is_enabled(&self) -> bool {
        !self.is_loading()
    }

    pub fn observe_enabled(&self) -> impl Stream<Item = bool> + Send + 'static {
        self.loading.observe().map(|loading| !loading)
    }

    /// OR `stream` into `loading`. See [`LoadingBus::register`].
    pub fn register_loading<S>(&self, stream: S) -> Result<(), BusError>
    where
        S: Stream<Item = bool> + Send + 'static,
    {
        self.loading.register(stream)
    }

    /// [`register_loading`](Self::register_loading) pumped on `handle`.
    pub fn register_loading_with<S>(&self, handle: &Handle, stream: S)
    where
        S: Stream<Item = bool> + Send + 'static,
    {
        self.loading.register_with(handle, stream);
    }

    // ── Errors ───────────────────────────────────────────────────────

    /// Errors reported from now on by any registered source or bound action.
    pub fn errors(&self) -> BoxStream<'static, SharedError> {
        self.errors.observe()
    }

    pub fn register_errors<S>(&self, stream: S) -> Result<(), BusError>
    where
        S: Stream<Item = SharedError> + Send + 'static,
    {
        self.errors.register(stream)
    }

    pub fn register_errors_with<S>(&self, handle: &Handle, stream: S)
    where
        S: Stream<Item = SharedError> + Send + 'static,
    {
        self.errors.register_with(handle, stream);
    }

    pub fn report_error(&self, error: impl ViewModelError) {
        self.errors.sink().send(Arc::new(error));
    }

    // ── Actions ──────────────────────────────────────────────────────

    /// Feed `action`'s executing flag into `loading` and its errors into
    /// `errors`.
    pub fn bind_action<I, O, E>(&self, action: &Action<I, O, E>)
    where
        I: Send + 'static,
        O: Send + 'static,
        E: ViewModelError,
    {
        action.add_loading(self.loading.branch());
        self.bind_errors(action);
    }

    /// Build an action that is enabled iff this view model is not loading.
    ///
    /// Starting it marks this view model loading, so at most one created
    /// action per view model runs at a time.
    pub fn create_action<I, O, E, F, Fut>(&self, work: F) -> Action<I, O, E>
    where
        I: Send + 'static,
        O: Send + 'static,
        E: ViewModelError,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
    {
        let action = Action::new(work);
        action.set_owner(self.loading.branch());
        self.bind_errors(&action);
        debug!(branches = self.loading.branch_count(), "created owned action");
        action
    }

    fn bind_errors<I, O, E>(&self, action: &Action<I, O, E>)
    where
        I: Send + 'static,
        O: Send + 'static,
        E: ViewModelError,
    {
        let sink = self.errors.sink();
        action.add_reporter(move |error: &Arc<E>| {
            let error: SharedError = Arc::<E>::clone(error);
            sink.send(error);
        });
    }

    // ── Gated signals ────────────────────────────────────────────────

    /// [`signal::forward_while_active`] on this view model's gate.
    pub fn forward_while_active<T, E, F, S>(&self, source: F) -> Signal<T, E>
    where
        F: FnMut() -> S + Send + 'static,
        S: Stream<Item = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        signal::forward_while_active(source, &self.active)
    }

    /// [`signal::throttle_while_inactive`] on this view model's gate, with
    /// the configured interval.
    pub fn throttle_while_inactive<T, E, S>(&self, source: S) -> Signal<T, E>
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        signal::throttle_while_inactive(source, &self.active, self.config.throttle_interval)
    }
}

impl Default for ViewModel {
    fn default() -> Self {
        Self::new()
    }
}
