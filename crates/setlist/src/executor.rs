//! Shared executors: one running behavior per `BehaviorKey`
//!
//! Every consumer that starts a behavior gets a `SharedResults` handle. The
//! first handle for a key creates the runtime and triggers the activation
//! fetch; later handles reuse it. The runtime is torn down when the last
//! handle goes away.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use setlist_api::NetworkResult;
use tracing::{debug, warn};

use crate::behavior::{ActiveBehavior, BehaviorKey, NetworkBackedBehavior, Refresh, RefreshOutcome};
use crate::clock::SharedClock;
use crate::store::LocalStore;
use crate::stream::{ValueStream, lock};

struct Entry {
    refs: usize,
    active: Arc<dyn Any + Send + Sync>,
    dispose: Box<dyn Fn() + Send + Sync>,
}

struct RegistryInner {
    store: LocalStore,
    clock: SharedClock,
    entries: Mutex<HashMap<BehaviorKey, Entry>>,
}

impl RegistryInner {
    fn release(&self, key: &BehaviorKey) {
        let disposed = {
            let mut entries = lock(&self.entries);
            let Some(entry) = entries.get_mut(key) else {
                return;
            };
            entry.refs -= 1;
            if entry.refs > 0 {
                debug!("[Executor] {} released, {} consumer(s) left", key, entry.refs);
                return;
            }
            entries.remove(key)
        };
        if let Some(entry) = disposed {
            debug!("[Executor] {} disposed", key);
            (entry.dispose)();
        }
    }
}

/// Registry of running behaviors keyed by identity
#[derive(Clone)]
pub struct ExecutorRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("active", &self.active_count())
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new(store: LocalStore, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                store,
                clock,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn active_count(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn ref_count(&self, key: &BehaviorKey) -> usize {
        lock(&self.inner.entries).get(key).map_or(0, |entry| entry.refs)
    }

    /// Start (or join) the executor for `behavior`'s key.
    ///
    /// Only the consumer that brings the count from zero to one triggers the
    /// activation fetch, spawned on the current tokio runtime when there is one.
    pub fn start<B: NetworkBackedBehavior>(&self, behavior: B) -> SharedResults<B::Local> {
        let key = behavior.key();
        let (active, created) = {
            let mut entries = lock(&self.inner.entries);
            match entries.get_mut(&key) {
                Some(entry) => {
                    entry.refs += 1;
                    match Arc::clone(&entry.active).downcast::<ActiveBehavior<B>>() {
                        Ok(active) => (active, false),
                        Err(_) => {
                            // Two behavior types produced the same key
                            warn!("[Executor] key {} reused by another behavior type", key);
                            entry.refs -= 1;
                            drop(entries);
                            return self.start_detached(behavior);
                        }
                    }
                }
                None => {
                    let active = Arc::new(ActiveBehavior::new(
                        behavior,
                        self.inner.store.clone(),
                        Arc::clone(&self.inner.clock),
                    ));
                    active.start();
                    let disposer = Arc::clone(&active);
                    entries.insert(
                        key.clone(),
                        Entry {
                            refs: 1,
                            active: Arc::clone(&active) as Arc<dyn Any + Send + Sync>,
                            dispose: Box::new(move || disposer.tear_down()),
                        },
                    );
                    (active, true)
                }
            }
        };

        if created {
            debug!("[Executor] {} activated", key);
            spawn_activation(&active);
        } else {
            debug!("[Executor] {} joined, {} consumer(s)", key, self.ref_count(&key));
        }

        SharedResults::new(
            active.results(),
            active,
            Some(Lease {
                registry: Arc::downgrade(&self.inner),
                key,
            }),
        )
    }

    fn start_detached<B: NetworkBackedBehavior>(&self, behavior: B) -> SharedResults<B::Local> {
        let active = Arc::new(ActiveBehavior::new(
            behavior,
            self.inner.store.clone(),
            Arc::clone(&self.inner.clock),
        ));
        active.start();
        spawn_activation(&active);
        let disposer = Arc::clone(&active);
        let mut results = SharedResults::new(active.results(), active, None);
        results.on_release = Some(Box::new(move || disposer.tear_down()));
        results
    }
}

fn spawn_activation<B: NetworkBackedBehavior>(active: &Arc<ActiveBehavior<B>>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let active = Arc::clone(active);
            handle.spawn(async move {
                active.refresh(false).await;
            });
        }
        Err(_) => debug!(
            "[Executor] {} started outside a runtime, activation fetch skipped",
            active.key()
        ),
    }
}

struct Lease {
    registry: Weak<RegistryInner>,
    key: BehaviorKey,
}

/// Consumer handle on a shared executor. Dropping it releases the consumer.
pub struct SharedResults<L> {
    results: ValueStream<NetworkResult<L>>,
    refresher: Arc<dyn Refresh>,
    lease: Option<Lease>,
    on_release: Option<Box<dyn FnOnce() + Send + Sync>>,
    released: AtomicBool,
}

impl<L> fmt::Debug for SharedResults<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResults")
            .field("key", &self.lease.as_ref().map(|lease| &lease.key))
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

impl<L: Clone + Send + Sync + 'static> SharedResults<L> {
    fn new(
        results: ValueStream<NetworkResult<L>>,
        refresher: Arc<dyn Refresh>,
        lease: Option<Lease>,
    ) -> Self {
        Self {
            results,
            refresher,
            lease,
            on_release: None,
            released: AtomicBool::new(false),
        }
    }

    pub fn results(&self) -> ValueStream<NetworkResult<L>> {
        self.results.clone()
    }

    pub fn current(&self) -> Option<NetworkResult<L>> {
        self.results.current_value()
    }

    pub fn refresher(&self) -> Arc<dyn Refresh> {
        Arc::clone(&self.refresher)
    }

    pub async fn refresh(&self, forced: bool) -> RefreshOutcome {
        if self.released.load(Ordering::SeqCst) {
            return RefreshOutcome::Discarded;
        }
        self.refresher.refresh(forced).await
    }
}

impl<L> SharedResults<L> {
    /// Release this consumer. Idempotent; also runs on drop.
    pub fn tear_down(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(lease) = self.lease.take() {
            if let Some(registry) = lease.registry.upgrade() {
                registry.release(&lease.key);
            }
        }
        if let Some(release) = self.on_release.take() {
            release();
        }
    }
}

impl<L> Drop for SharedResults<L> {
    fn drop(&mut self) {
        self.tear_down();
    }
}

#[async_trait]
impl<L: Clone + Send + Sync + 'static> Refresh for SharedResults<L> {
    async fn refresh(&self, forced: bool) -> RefreshOutcome {
        SharedResults::refresh(self, forced).await
    }
}
