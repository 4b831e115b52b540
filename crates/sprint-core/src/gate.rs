// ── Activity gate ──
//
// "Is this owner's output currently wanted?" Platform adapters flip it on
// visibility and foreground/background changes; combinators in `signal`
// subscribe to it.

use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

/// A boolean cell with distinct-until-changed notification.
///
/// Every subscriber gets its own unbounded queue, so each flip is delivered
/// exactly once, in subscription order, even if the subscriber has not been
/// polled in between. Dropping the gate completes all subscriptions.
#[derive(Debug, Default)]
pub struct ActivityGate {
    state: Mutex<GateState>,
}

#[derive(Debug, Default)]
struct GateState {
    active: bool,
    subscribers: Vec<mpsc::UnboundedSender<bool>>,
}

impl ActivityGate {
    pub fn new(active: bool) -> Self {
        Self {
            state: Mutex::new(GateState {
                active,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Update the gate. Returns `true` if the value flipped.
    ///
    /// Redundant sets are ignored and notify nobody.
    pub fn set(&self, active: bool) -> bool {
        let mut state = self.lock();
        if state.active == active {
            return false;
        }
        state.active = active;
        // Dropped subscribers are pruned here rather than on drop.
        state.subscribers.retain(|tx| tx.send(active).is_ok());
        debug!(active, subscribers = state.subscribers.len(), "activity changed");
        true
    }

    /// Subscribe to the gate. The current value is delivered first.
    pub fn observe(&self) -> ActivityStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        // Cannot fail: `rx` is alive.
        let _ = tx.send(state.active);
        state.subscribers.push(tx);
        ActivityStream {
            inner: UnboundedReceiverStream::new(rx),
        }
    }

    /// Number of live subscriptions (pruned lazily on the next flip).
    pub fn subscriber_count(&self) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        // Critical sections never panic, so a poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `Stream` of gate values returned by [`ActivityGate::observe`].
///
/// Ends once the gate has been dropped and all queued values were read.
#[derive(Debug)]
pub struct ActivityStream {
    inner: UnboundedReceiverStream<bool>,
}

impl Stream for ActivityStream {
    type Item = bool;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
