// ── Observable value cells ──
//
// Writable cells backed by `watch` channels. Observers always start
// from the current value, then follow every later change.

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// A mutable value with change notification.
///
/// Setting a value equal to the current one is a no-op: no version bump,
/// no wake-up for observers. Dropping the property completes every
/// outstanding [`observe`](Self::observe) stream.
#[derive(Debug)]
pub struct MutableProperty<T> {
    tx: watch::Sender<T>,
}

impl<T> MutableProperty<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(value: T) -> Self {
        let (tx, _) = watch::channel(value);
        Self { tx }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value. Returns `true` if it actually changed.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    /// Stream of values, starting with the current one.
    ///
    /// Values written faster than the observer polls are coalesced to the
    /// latest, so this is a property view rather than an event log.
    pub fn observe(&self) -> impl Stream<Item = T> + Send + 'static {
        WatchStream::new(self.tx.subscribe())
    }

    /// Read-only view sharing this cell.
    pub fn read_only(&self) -> Property<T> {
        Property {
            rx: self.tx.subscribe(),
        }
    }
}

impl<T> Default for MutableProperty<T>
where
    T: Clone + Default + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Read-only handle to a [`MutableProperty`].
///
/// Keeps reading the last value after the cell is dropped; only
/// [`observe`](Self::observe) streams end.
#[derive(Debug, Clone)]
pub struct Property<T> {
    rx: watch::Receiver<T>,
}

impl<T> Property<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn get(&self) -> T {
        self.rx.borrow().clone()
    }

    pub fn observe(&self) -> impl Stream<Item = T> + Send + 'static {
        WatchStream::new(self.rx.clone())
    }
}
