//! Reactive building blocks shared by the command registry and the view bridge.
//!
//! ## Learning: Push Cells Behind Pull Streams
//!
//! Rust streams are pull-based: nothing happens until someone polls.
//! `ReplayLatest` keeps the push side synchronous (a write fans out to every
//! listener before `next` returns) while handing each subscriber an ordinary
//! `futures` stream. Dropping that stream is the unsubscription.
//!
//! ```text
//!   next(v) ──► [ Option<T> ] ──► listener 1 (unbounded queue) ──► stream
//!                             └─► listener 2 (unbounded queue) ──► stream
//! ```

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::stream::{BoxStream, Stream, StreamExt};
use futures::task::AtomicWaker;

/// A handle that tears down a registration or subscription.
///
/// Every implementation in this workspace is idempotent: calling
/// `unsubscribe` twice is the same as calling it once.
pub trait Unsubscribable: Send + Sync {
    fn unsubscribe(&self);
}

struct Slot<T> {
    value: Option<T>,
    listeners: Vec<mpsc::UnboundedSender<T>>,
}

impl<T: Clone> Slot<T> {
    fn publish(&mut self, value: T) {
        self.listeners
            .retain(|listener| listener.unbounded_send(value.clone()).is_ok());
        self.value = Some(value);
    }
}

/// A buffer-of-one cell that replays its latest value to new subscribers.
///
/// Cloning yields another handle to the same cell.
pub struct ReplayLatest<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T: Clone + Send + 'static> ReplayLatest<T> {
    /// Creates an empty cell. Subscribers see nothing until the first `next`.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                value: None,
                listeners: Vec::new(),
            })),
        }
    }

    /// Creates a cell that already holds `value`.
    pub fn with_value(value: T) -> Self {
        let cell = Self::new();
        cell.lock().value = Some(value);
        cell
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the latest value without subscribing.
    pub fn get(&self) -> Option<T> {
        self.lock().value.clone()
    }

    /// Replaces the value and delivers it to every live subscriber.
    pub fn next(&self, value: T) {
        self.lock().publish(value);
    }

    /// Runs a check-and-replace under the cell lock.
    ///
    /// `f` sees the current value and returns `Ok(Some(new))` to publish,
    /// `Ok(None)` to leave the cell untouched, or an error which is passed
    /// back to the caller with the cell unchanged. Returns whether a value
    /// was published.
    pub fn try_update<E>(
        &self,
        f: impl FnOnce(Option<&T>) -> Result<Option<T>, E>,
    ) -> Result<bool, E> {
        let mut slot = self.lock();
        match f(slot.value.as_ref())? {
            Some(value) => {
                slot.publish(value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Infallible form of [`ReplayLatest::try_update`].
    pub fn update(&self, f: impl FnOnce(Option<&T>) -> Option<T>) -> bool {
        let mut slot = self.lock();
        match f(slot.value.as_ref()) {
            Some(value) => {
                slot.publish(value);
                true
            }
            None => false,
        }
    }

    /// Subscribes to the cell.
    ///
    /// The stream yields the current value first (if there is one), then
    /// one item per subsequent `next`, in order. It ends once every handle
    /// to the cell has been dropped.
    pub fn subscribe(&self) -> BoxStream<'static, T> {
        let (tx, rx) = mpsc::unbounded();
        let mut slot = self.lock();
        if let Some(value) = slot.value.clone() {
            // The receiver is alive, this cannot fail.
            let _ = tx.unbounded_send(value);
        }
        slot.listeners.push(tx);
        rx.boxed()
    }

    /// Number of subscribers whose stream has not been dropped.
    pub fn listener_count(&self) -> usize {
        let mut slot = self.lock();
        slot.listeners.retain(|listener| !listener.is_closed());
        slot.listeners.len()
    }
}

impl<T: Clone + Send + 'static> Default for ReplayLatest<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ReplayLatest<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

/// Flattens a stream of streams, always following the most recent inner one.
///
/// When the outer stream yields, the current inner stream is dropped before
/// the new one is polled, so results from a superseded generation are never
/// delivered. Completes once the outer stream and the current inner stream
/// have both ended.
pub struct SwitchLatest<S, T> {
    outer: Option<S>,
    inner: Option<BoxStream<'static, T>>,
    generation: u64,
}

impl<S, T> SwitchLatest<S, T> {
    /// How many inner streams have been started so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Builds a [`SwitchLatest`] over `outer`.
pub fn switch_latest<S, T>(outer: S) -> SwitchLatest<S, T>
where
    S: Stream<Item = BoxStream<'static, T>> + Unpin,
{
    SwitchLatest {
        outer: Some(outer),
        inner: None,
        generation: 0,
    }
}

impl<S, T> Stream for SwitchLatest<S, T>
where
    S: Stream<Item = BoxStream<'static, T>> + Unpin,
{
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();

        // Drain the outer stream first so only the newest inner one survives.
        while let Some(outer) = this.outer.as_mut() {
            match outer.poll_next_unpin(cx) {
                Poll::Ready(Some(next)) => {
                    this.generation += 1;
                    if this.inner.replace(next).is_some() {
                        tracing::trace!(
                            generation = this.generation,
                            "Cancelled superseded inner stream"
                        );
                    }
                }
                Poll::Ready(None) => this.outer = None,
                Poll::Pending => break,
            }
        }

        if let Some(inner) = this.inner.as_mut() {
            match inner.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                Poll::Ready(None) => this.inner = None,
                Poll::Pending => return Poll::Pending,
            }
        }

        if this.outer.is_none() && this.inner.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

/// A group of streams that end together.
///
/// Streams passed through [`Teardown::guard`] keep their upstream in a slot
/// the teardown can reach. [`Teardown::close`] empties every slot on the
/// spot, so each upstream and whatever it subscribed to is dropped even if
/// the guarded stream is never polled again. Cloning yields another handle
/// to the same group.
///
/// ## Learning: Cancelling Without a Poll
///
/// `take_until` only stops yielding; the upstream lives as long as the
/// combinator does. Here the consumer owns a thin shell and the upstream
/// sits behind a shared slot:
///
/// ```text
///   consumer ──► Guarded ──► Arc<Guard> { Option<upstream> }
///                                 ▲
///   Teardown { Weak<Guard>, .. } ─┘  close(): take() and drop
/// ```
#[derive(Clone, Default)]
pub struct Teardown {
    state: Arc<Mutex<TeardownState>>,
}

#[derive(Default)]
struct TeardownState {
    closed: bool,
    guards: Vec<Weak<dyn Close>>,
}

trait Close: Send + Sync {
    fn close(&self);
}

struct Guard<T> {
    upstream: Mutex<Option<BoxStream<'static, T>>>,
    waker: AtomicWaker,
}

impl<T> Guard<T> {
    fn lock(&self) -> MutexGuard<'_, Option<BoxStream<'static, T>>> {
        self.upstream.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: 'static> Close for Guard<T> {
    fn close(&self) {
        let upstream = self.lock().take();
        drop(upstream);
        self.waker.wake();
    }
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TeardownState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wraps `upstream` so that [`Teardown::close`] ends it.
    ///
    /// On an already closed teardown the upstream is dropped immediately
    /// and the returned stream is empty.
    pub fn guard<T: 'static>(&self, upstream: BoxStream<'static, T>) -> Guarded<T> {
        let guard = Arc::new(Guard {
            upstream: Mutex::new(None),
            waker: AtomicWaker::new(),
        });

        let mut state = self.lock();
        if state.closed {
            drop(state);
            drop(upstream);
        } else {
            *guard.lock() = Some(upstream);
            state.guards.retain(|guard| guard.strong_count() > 0);
            let close: Arc<dyn Close> = guard.clone();
            state.guards.push(Arc::downgrade(&close));
        }

        Guarded { guard }
    }

    /// Ends every guarded stream and refuses new ones.
    ///
    /// Returns `false` if the teardown was already closed.
    pub fn close(&self) -> bool {
        let guards = {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            std::mem::take(&mut state.guards)
        };

        for guard in guards.iter().filter_map(Weak::upgrade) {
            guard.close();
        }
        tracing::trace!(streams = guards.len(), "Closed teardown");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Stream returned by [`Teardown::guard`].
pub struct Guarded<T> {
    guard: Arc<Guard<T>>,
}

impl<T> Stream for Guarded<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.guard.waker.register(cx.waker());

        let mut upstream = self.guard.lock();
        let Some(stream) = upstream.as_mut() else {
            return Poll::Ready(None);
        };
        let poll = stream.poll_next_unpin(cx);
        if let Poll::Ready(None) = poll {
            *upstream = None;
        }
        poll
    }
}
