// ── Signals and activity-gated combinators ──
//
// A signal is a fallible stream: values until it completes, or a single
// error that ends it. Cancellation is dropping the stream.

use std::convert::Infallible;
use std::future;
use std::pin::Pin;
use std::time::Duration;

use async_stream::stream;
use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{self, Instant};
use tracing::{trace, warn};

use crate::gate::ActivityGate;

/// Boxed, sendable signal of `T` that may fail with `E`.
pub type Signal<T, E> = BoxStream<'static, Result<T, E>>;

const DEFAULT_PIPE_CAPACITY: usize = 64;

// ── Pipe ─────────────────────────────────────────────────────────────

/// Hot multicast source.
///
/// Every [`subscribe`](Self::subscribe) sees the values sent after it was
/// created. Clones share the channel; subscribers complete once the last
/// clone is dropped.
#[derive(Debug, Clone)]
pub struct Pipe<T, E = Infallible> {
    tx: broadcast::Sender<Result<T, E>>,
}

impl<T, E> Pipe<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PIPE_CAPACITY)
    }

    /// Subscribers lagging more than `capacity` values skip ahead.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Send a value. Returns how many subscribers received it.
    pub fn send(&self, value: T) -> usize {
        self.tx.send(Ok(value)).unwrap_or(0)
    }

    /// Fail every current subscriber.
    pub fn fail(&self, error: E) -> usize {
        self.tx.send(Err(error)).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn subscribe(&self) -> Signal<T, E> {
        let mut rx = self.tx.subscribe();
        Box::pin(stream! {
            loop {
                match rx.recv().await {
                    Ok(Ok(value)) => yield Ok(value),
                    Ok(Err(error)) => {
                        yield Err(error);
                        break;
                    }
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "pipe subscriber lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl<T, E> Default for Pipe<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// ── Combinators ──────────────────────────────────────────────────────

enum Wake<I> {
    Gate(Option<bool>),
    Source(Option<I>),
    Tick,
}

/// Run `source` only while `gate` is active.
///
/// Every activation calls `source` for a fresh subscription and forwards
/// its values; deactivation drops that subscription. The output completes
/// when the gate is dropped or the current subscription completes, and
/// fails (then ends) on the first source error.
///
/// The gate is subscribed immediately, so the current activity is known
/// before any source value can be forwarded.
pub fn forward_while_active<T, E, F, S>(mut source: F, gate: &ActivityGate) -> Signal<T, E>
where
    F: FnMut() -> S + Send + 'static,
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let mut activity = gate.observe();
    Box::pin(stream! {
        let mut inner: Option<Pin<Box<S>>> = None;
        loop {
            let wake = tokio::select! {
                biased;
                active = activity.next() => Wake::Gate(active),
                item = next_item(&mut inner) => Wake::Source(item),
            };
            match wake {
                Wake::Gate(Some(true)) => {
                    trace!("gate opened, starting source");
                    inner = Some(Box::pin(source()));
                }
                Wake::Gate(Some(false)) => {
                    if inner.take().is_some() {
                        trace!("gate closed, dropped source");
                    }
                }
                Wake::Source(Some(Ok(value))) => yield Ok(value),
                Wake::Source(Some(Err(error))) => {
                    yield Err(error);
                    break;
                }
                Wake::Gate(None) | Wake::Source(None) | Wake::Tick => break,
            }
        }
    })
}

/// Forward `source`, rate-limited by `interval` while `gate` is inactive.
///
/// `source` is subscribed once for the whole lifetime of the output.
/// While active, values pass straight through. While inactive, a
/// leading/trailing throttle applies: a value outside the current window is
/// sent at once, later values in the window collapse to the latest one,
/// which is sent when the window ends. The value delivered last before
/// deactivation opens the first window. Reactivating flushes the pending
/// value immediately.
///
/// The output completes when `source` completes or the gate is dropped,
/// and fails on a source error; a pending value is flushed first in every
/// case.
pub fn throttle_while_inactive<T, E, S>(
    source: S,
    gate: &ActivityGate,
    interval: Duration,
) -> Signal<T, E>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let mut activity = gate.observe();
    Box::pin(stream! {
        let mut source = Box::pin(source);
        // `Some` while the gate is closed.
        let mut window: Option<Window<T>> = None;
        let mut delivered = false;
        loop {
            let deadline = window.as_ref().and_then(Window::deadline);
            let wake = tokio::select! {
                biased;
                active = activity.next() => Wake::Gate(active),
                item = source.next() => Wake::Source(item),
                () = sleep_until(deadline) => Wake::Tick,
            };
            match wake {
                Wake::Gate(Some(true)) => {
                    if let Some(value) = window.take().and_then(Window::into_pending) {
                        yield Ok(value);
                    }
                }
                Wake::Gate(Some(false)) => {
                    window = Some(Window::new(interval, delivered.then(Instant::now)));
                }
                Wake::Source(Some(Ok(value))) => {
                    let ready = match window.as_mut() {
                        Some(window) => window.offer(value, Instant::now()),
                        None => Some(value),
                    };
                    if let Some(value) = ready {
                        delivered = true;
                        yield Ok(value);
                    }
                }
                Wake::Source(Some(Err(error))) => {
                    if let Some(value) = window.take().and_then(Window::into_pending) {
                        yield Ok(value);
                    }
                    yield Err(error);
                    break;
                }
                Wake::Tick => {
                    if let Some(value) = window.as_mut().and_then(|w| w.tick(Instant::now())) {
                        yield Ok(value);
                    }
                }
                Wake::Gate(None) | Wake::Source(None) => {
                    if let Some(value) = window.take().and_then(Window::into_pending) {
                        yield Ok(value);
                    }
                    break;
                }
            }
        }
    })
}

async fn next_item<S: Stream>(inner: &mut Option<Pin<Box<S>>>) -> Option<S::Item> {
    match inner {
        Some(stream) => stream.next().await,
        None => future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

/// Throttle state while the gate is closed.
struct Window<T> {
    interval: Duration,
    last_emit: Option<Instant>,
    pending: Option<T>,
}

impl<T> Window<T> {
    fn new(interval: Duration, last_emit: Option<Instant>) -> Self {
        Self {
            interval,
            last_emit,
            pending: None,
        }
    }

    /// When the pending value is due, if there is one.
    fn deadline(&self) -> Option<Instant> {
        self.pending
            .as_ref()
            .and(self.last_emit)
            .map(|at| at + self.interval)
    }

    /// Accept a value; returns it if it may be sent right away.
    fn offer(&mut self, value: T, now: Instant) -> Option<T> {
        if let Some(at) = self.last_emit {
            if now < at + self.interval {
                self.pending = Some(value);
                return None;
            }
        }
        self.last_emit = Some(now);
        self.pending = None;
        Some(value)
    }

    fn tick(&mut self, now: Instant) -> Option<T> {
        let value = self.pending.take()?;
        self.last_emit = Some(now);
        Some(value)
    }

    fn into_pending(self) -> Option<T> {
        self.pending
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::stream;
    use tokio_test::{assert_pending, assert_ready, assert_ready_eq, task};

    use super::*;

    fn one_two() -> impl Stream<Item = Result<i32, Infallible>> {
        stream::iter([Ok(1), Ok(2)]).chain(stream::pending())
    }

    // ── Window ──

    #[test]
    fn window_collapses_values_to_latest() {
        let t0 = Instant::now();
        let mut window = Window::new(Duration::from_secs(1), Some(t0));

        assert_eq!(window.offer(2, t0), None);
        assert_eq!(window.offer(3, t0 + Duration::from_millis(10)), None);
        assert_eq!(window.deadline(), Some(t0 + Duration::from_secs(1)));

        assert_eq!(window.tick(t0 + Duration::from_secs(1)), Some(3));
        assert_eq!(window.deadline(), None);
        assert_eq!(window.tick(t0 + Duration::from_secs(2)), None);
    }

    #[test]
    fn window_without_prior_emission_is_leading() {
        let t0 = Instant::now();
        let mut window = Window::new(Duration::from_secs(1), None);
        assert_eq!(window.offer(1, t0), Some(1));
        assert_eq!(window.offer(2, t0), None);
        assert_eq!(window.offer(3, t0 + Duration::from_secs(2)), Some(3));
        assert_eq!(window.into_pending(), None);
    }

    // ── forward_while_active ──

    #[tokio::test]
    async fn forward_restarts_source_on_every_activation() {
        let gate = ActivityGate::new(true);
        let mut out = task::spawn(forward_while_active(one_two, &gate));

        assert_ready_eq!(out.poll_next(), Some(Ok(1)));
        assert_ready_eq!(out.poll_next(), Some(Ok(2)));
        assert_pending!(out.poll_next());

        gate.set(false);
        assert_pending!(out.poll_next());

        gate.set(true);
        assert_ready_eq!(out.poll_next(), Some(Ok(1)));
        assert_ready_eq!(out.poll_next(), Some(Ok(2)));
        assert_pending!(out.poll_next());
    }

    #[tokio::test]
    async fn forward_unsubscribes_hot_source_while_inactive() {
        let gate = ActivityGate::new(true);
        let pipe: Pipe<i32> = Pipe::new();
        let source = pipe.clone();
        let mut out = task::spawn(forward_while_active(move || source.subscribe(), &gate));

        assert_pending!(out.poll_next());
        assert_eq!(pipe.subscriber_count(), 1);
        pipe.send(1);
        assert_ready_eq!(out.poll_next(), Some(Ok(1)));

        gate.set(false);
        assert_pending!(out.poll_next());
        assert_eq!(pipe.subscriber_count(), 0);
        pipe.send(2);

        gate.set(true);
        assert_pending!(out.poll_next());
        pipe.send(3);
        assert_ready_eq!(out.poll_next(), Some(Ok(3)));
    }

    #[tokio::test]
    async fn forward_fails_on_source_error() {
        let gate = ActivityGate::new(true);
        let pipe: Pipe<i32, String> = Pipe::new();
        let source = pipe.clone();
        let mut out = task::spawn(forward_while_active(move || source.subscribe(), &gate));

        assert_pending!(out.poll_next());
        pipe.fail("broken".into());
        assert_ready_eq!(out.poll_next(), Some(Err("broken".to_owned())));
        assert_ready_eq!(out.poll_next(), None);
    }

    #[tokio::test]
    async fn forward_completes_with_source() {
        let gate = ActivityGate::new(true);
        let mut out = task::spawn(forward_while_active(
            || stream::iter([Ok::<_, Infallible>(7)]),
            &gate,
        ));

        assert_ready_eq!(out.poll_next(), Some(Ok(7)));
        assert_ready_eq!(out.poll_next(), None);
    }

    #[tokio::test]
    async fn forward_completes_when_gate_is_dropped() {
        let gate = ActivityGate::new(true);
        let mut out = task::spawn(forward_while_active(one_two, &gate));
        assert_ready_eq!(out.poll_next(), Some(Ok(1)));

        drop(gate);
        assert_ready_eq!(out.poll_next(), None);
    }

    #[tokio::test]
    async fn dropping_forward_output_cancels_everything() {
        let gate = ActivityGate::new(true);
        let pipe: Pipe<i32> = Pipe::new();
        let source = pipe.clone();
        let mut out = task::spawn(forward_while_active(move || source.subscribe(), &gate));
        assert_pending!(out.poll_next());
        assert_eq!(pipe.subscriber_count(), 1);

        drop(out);
        assert_eq!(pipe.subscriber_count(), 0);
        assert_eq!(gate.subscriber_count(), 0);
    }

    // ── throttle_while_inactive ──

    #[tokio::test(start_paused = true)]
    async fn throttle_delays_while_inactive_and_flushes_on_activation() {
        let gate = ActivityGate::new(true);
        let pipe: Pipe<i32> = Pipe::new();
        let mut out = task::spawn(throttle_while_inactive(
            pipe.subscribe(),
            &gate,
            Duration::from_secs(1),
        ));
        assert_pending!(out.poll_next());

        pipe.send(1);
        assert_ready_eq!(out.poll_next(), Some(Ok(1)));

        gate.set(false);
        pipe.send(2);
        pipe.send(3);
        assert_pending!(out.poll_next());

        time::advance(Duration::from_millis(500)).await;
        assert_pending!(out.poll_next());

        time::advance(Duration::from_millis(600)).await;
        assert_ready_eq!(out.poll_next(), Some(Ok(3)));

        // Still inside the next window: held until reactivation.
        pipe.send(4);
        assert_pending!(out.poll_next());
        gate.set(true);
        assert_ready_eq!(out.poll_next(), Some(Ok(4)));

        pipe.send(5);
        assert_ready_eq!(out.poll_next(), Some(Ok(5)));

        drop(pipe);
        assert_ready_eq!(out.poll_next(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_is_leading_when_nothing_was_delivered() {
        let gate = ActivityGate::new(false);
        let pipe: Pipe<i32> = Pipe::new();
        let mut out = task::spawn(throttle_while_inactive(
            pipe.subscribe(),
            &gate,
            Duration::from_secs(1),
        ));

        pipe.send(1);
        assert_ready_eq!(out.poll_next(), Some(Ok(1)));
        pipe.send(2);
        assert_pending!(out.poll_next());

        time::advance(Duration::from_millis(1100)).await;
        assert_ready_eq!(out.poll_next(), Some(Ok(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_flushes_pending_value_on_completion() {
        let gate = ActivityGate::new(false);
        let pipe: Pipe<i32> = Pipe::new();
        let mut out = task::spawn(throttle_while_inactive(
            pipe.subscribe(),
            &gate,
            Duration::from_secs(1),
        ));

        pipe.send(1);
        assert_ready_eq!(out.poll_next(), Some(Ok(1)));
        pipe.send(2);
        assert_pending!(out.poll_next());

        drop(pipe);
        assert_ready_eq!(out.poll_next(), Some(Ok(2)));
        assert_ready_eq!(out.poll_next(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_completes_when_gate_is_dropped() {
        let gate = ActivityGate::new(true);
        let pipe: Pipe<i32> = Pipe::new();
        let mut out = task::spawn(throttle_while_inactive(
            pipe.subscribe(),
            &gate,
            Duration::from_secs(1),
        ));
        assert_pending!(out.poll_next());

        assert_eq!(pipe.subscriber_count(), 1);

        drop(gate);
        assert_ready_eq!(out.poll_next(), None);
        assert_eq!(pipe.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_throttle_output_cancels_everything() {
        let gate = ActivityGate::new(true);
        let pipe: Pipe<i32> = Pipe::new();
        let mut out = task::spawn(throttle_while_inactive(
            pipe.subscribe(),
            &gate,
            Duration::from_secs(1),
        ));
        pipe.send(1);
        assert_ready_eq!(out.poll_next(), Some(Ok(1)));

        // Leave a value pending inside an open window.
        gate.set(false);
        pipe.send(2);
        assert_pending!(out.poll_next());
        assert_eq!(pipe.subscriber_count(), 1);
        assert_eq!(gate.subscriber_count(), 1);

        drop(out);
        assert_eq!(pipe.subscriber_count(), 0);
        assert_eq!(gate.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_propagates_source_error() {
        let gate = ActivityGate::new(true);
        let pipe: Pipe<i32, String> = Pipe::new();
        let mut out = task::spawn(throttle_while_inactive(
            pipe.subscribe(),
            &gate,
            Duration::from_secs(1),
        ));
        assert_pending!(out.poll_next());

        pipe.fail("broken".into());
        let item = assert_ready!(out.poll_next());
        assert_eq!(item, Some(Err("broken".to_owned())));
        assert_ready_eq!(out.poll_next(), None);
    }
}
