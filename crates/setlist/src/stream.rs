//! Push-based observable over a single current value
//!
//! `ValueStream<T>` is the primitive every other layer is built on:
//! - a newly added listener is immediately invoked with the current value (replay)
//! - listeners run in registration order and observe every later value in order
//! - `teardown()` detaches from the upstream source and drops all listeners
//!
//! Emission is synchronous on the pushing thread. Values pushed while a
//! dispatch is already running (including from inside a listener) are queued
//! and delivered by the running dispatch, so no listener ever sees values out
//! of order and re-entrant pushes cannot deadlock.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;
type TeardownHook = Box<dyn FnOnce() + Send>;

/// Lock a mutex, recovering the data if a listener panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Event<T> {
    /// Deliver to every listener registered before the value was pushed
    Emit { value: T, below: u64 },
    /// Deliver the current value to one freshly added listener
    Replay { listener: u64, value: T },
}

struct State<T> {
    current: Option<T>,
    listeners: Vec<(u64, Listener<T>)>,
    next_id: u64,
    queue: VecDeque<Event<T>>,
    dispatching: bool,
    torn_down: bool,
    upstream: Vec<TeardownHook>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
}

/// Observable single value with replay-on-subscribe.
///
/// Cloning is cheap and yields another handle to the same stream.
pub struct ValueStream<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ValueStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for ValueStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("ValueStream")
            .field("has_value", &state.current.is_some())
            .field("listeners", &state.listeners.len())
            .field("torn_down", &state.torn_down)
            .finish()
    }
}

impl<T> Default for ValueStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ValueStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a stream with no value yet; listeners are not invoked until the first push
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    current: None,
                    listeners: Vec::new(),
                    next_id: 0,
                    queue: VecDeque::new(),
                    dispatching: false,
                    torn_down: false,
                    upstream: Vec::new(),
                }),
            }),
        }
    }

    pub fn with_value(value: T) -> Self {
        let stream = Self::new();
        lock(&stream.inner.state).current = Some(value);
        stream
    }

    pub fn current_value(&self) -> Option<T> {
        lock(&self.inner.state).current.clone()
    }

    pub fn is_torn_down(&self) -> bool {
        lock(&self.inner.state).torn_down
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.state).listeners.len()
    }

    /// Replace the current value and notify listeners. Ignored after teardown.
    pub fn push(&self, value: T) {
        let mut state = lock(&self.inner.state);
        if state.torn_down {
            return;
        }
        state.current = Some(value.clone());
        let below = state.next_id;
        state.queue.push_back(Event::Emit { value, below });
        self.drain(state);
    }

    /// Register a listener. It is invoked once with the current value (if any)
    /// before this call returns, unless another thread is mid-dispatch, in which
    /// case the replay is delivered by that dispatch in order.
    ///
    /// After teardown this is a no-op returning an inert handle.
    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut state = lock(&self.inner.state);
        if state.torn_down {
            return ListenerHandle::inert();
        }
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.push((id, Arc::new(listener)));
        if let Some(value) = state.current.clone() {
            state.queue.push_back(Event::Replay {
                listener: id,
                value,
            });
        }

        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        let handle = ListenerHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner.state).listeners.retain(|(lid, _)| *lid != id);
            }
        });

        self.drain(state);
        handle
    }

    /// Register a hook run exactly once on teardown (used by adapters to
    /// release their store subscription). Runs immediately if already torn down.
    pub fn on_teardown<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = lock(&self.inner.state);
        if state.torn_down {
            drop(state);
            hook();
            return;
        }
        state.upstream.push(Box::new(hook));
    }

    /// Detach from the upstream source and clear listeners. Idempotent.
    pub fn teardown(&self) {
        let hooks = {
            let mut state = lock(&self.inner.state);
            if state.torn_down {
                return;
            }
            state.torn_down = true;
            state.listeners.clear();
            state.queue.clear();
            std::mem::take(&mut state.upstream)
        };
        for hook in hooks {
            hook();
        }
    }

    pub fn downgrade(&self) -> WeakValueStream<T> {
        WeakValueStream {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Consume the stream asynchronously: yields the current value, then every
    /// later value. The watcher unsubscribes when dropped and ends on teardown.
    pub fn watch(&self) -> ValueStreamWatcher<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.add_listener(move |value: &T| {
            let _ = tx.send(value.clone());
        });
        ValueStreamWatcher {
            receiver: UnboundedReceiverStream::new(rx),
            _handle: handle,
        }
    }

    /// Derive a stream from this one through `transform`
    pub fn map<U, F>(&self, transform: F) -> ValueStream<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let derived = ValueStream::new();
        let weak = derived.downgrade();
        let handle = self.add_listener(move |value| {
            if let Some(derived) = weak.upgrade() {
                derived.push(transform(value));
            }
        });
        derived.on_teardown(move || drop(handle));
        derived
    }

    /// Combine two streams through `transform` into one derived stream.
    ///
    /// The derived stream emits once both inputs have a value, and again each
    /// time either input emits. Tearing it down detaches from both inputs but
    /// leaves the inputs themselves alive.
    pub fn combine<A, B, F>(a: &ValueStream<A>, b: &ValueStream<B>, transform: F) -> ValueStream<T>
    where
        A: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
        F: Fn(&A, &B) -> T + Send + Sync + 'static,
    {
        let derived = ValueStream::new();
        let transform = Arc::new(transform);
        // Suppress the two replays; the initial value is computed once below
        let armed = Arc::new(AtomicBool::new(false));

        let handle_a = {
            let weak = derived.downgrade();
            let other = b.downgrade();
            let transform = Arc::clone(&transform);
            let armed = Arc::clone(&armed);
            a.add_listener(move |a_value| {
                if !armed.load(Ordering::Acquire) {
                    return;
                }
                let (Some(derived), Some(b_value)) = (
                    weak.upgrade(),
                    other.upgrade().and_then(|b| b.current_value()),
                ) else {
                    return;
                };
                derived.push(transform(a_value, &b_value));
            })
        };

        let handle_b = {
            let weak = derived.downgrade();
            let other = a.downgrade();
            let transform = Arc::clone(&transform);
            let armed = Arc::clone(&armed);
            b.add_listener(move |b_value| {
                if !armed.load(Ordering::Acquire) {
                    return;
                }
                let (Some(derived), Some(a_value)) = (
                    weak.upgrade(),
                    other.upgrade().and_then(|a| a.current_value()),
                ) else {
                    return;
                };
                derived.push(transform(&a_value, b_value));
            })
        };

        armed.store(true, Ordering::Release);
        if let (Some(a_value), Some(b_value)) = (a.current_value(), b.current_value()) {
            derived.push(transform(&a_value, &b_value));
        }

        derived.on_teardown(move || {
            drop(handle_a);
            drop(handle_b);
        });
        derived
    }

    fn drain<'a>(&'a self, mut state: MutexGuard<'a, State<T>>) {
        if state.dispatching {
            return;
        }
        state.dispatching = true;
        let _unwind = DispatchGuard {
            inner: &*self.inner,
        };
        while let Some(event) = state.queue.pop_front() {
            let (targets, value): (Vec<Listener<T>>, T) = match event {
                Event::Emit { value, below } => (
                    state
                        .listeners
                        .iter()
                        .filter(|(id, _)| *id < below)
                        .map(|(_, l)| Arc::clone(l))
                        .collect(),
                    value,
                ),
                Event::Replay { listener, value } => (
                    state
                        .listeners
                        .iter()
                        .filter(|(id, _)| *id == listener)
                        .map(|(_, l)| Arc::clone(l))
                        .collect(),
                    value,
                ),
            };
            drop(state);
            for listener in targets {
                listener(&value);
            }
            state = lock(&self.inner.state);
        }
        state.dispatching = false;
    }
}

/// Clears `dispatching` when a listener panics, so later pushes still drain
struct DispatchGuard<'a, T> {
    inner: &'a Inner<T>,
}

impl<T> Drop for DispatchGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(&self.inner.state).dispatching = false;
        }
    }
}

/// Non-owning reference to a `ValueStream`
pub struct WeakValueStream<T> {
    inner: Weak<Inner<T>>,
}

impl<T> Clone for WeakValueStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> WeakValueStream<T> {
    pub fn upgrade(&self) -> Option<ValueStream<T>> {
        self.inner.upgrade().map(|inner| ValueStream { inner })
    }
}

/// Unsubscribes its listener when dropped or on `unsubscribe()`.
#[must_use = "dropping the handle removes the listener immediately"]
pub struct ListenerHandle {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    fn inert() -> Self {
        Self { unsubscribe: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }

    /// Keep the listener registered for the lifetime of the stream
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

/// Async view of a `ValueStream`, see [`ValueStream::watch`]
pub struct ValueStreamWatcher<T> {
    receiver: UnboundedReceiverStream<T>,
    _handle: ListenerHandle,
}

impl<T> Stream for ValueStreamWatcher<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}
