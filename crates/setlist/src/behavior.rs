//! Network-backed behaviors
//!
//! A behavior couples one live local query with one remote resource:
//! - `create_local_updating_results` builds the store adapter screens read from
//! - `fetch_from_api` + `upsert` bring remote data into the store
//! - the fetch strategy and minimum interval decide when the network is used
//!
//! `ActiveBehavior` is the runtime around a behavior. It owns the per-instance
//! request state (last request time, loading flag, last error) and publishes
//! `NetworkResult`s combining the local data with that state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use setlist_api::{NetworkResult, RequestResult, SyncError};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::store::{LocalStore, WriteTxn};
use crate::stream::{ListenerHandle, ValueStream, lock};

/// Minimum time between two non-forced requests of one behavior, in seconds
pub const DEFAULT_MIN_INTERVAL_SECS: i64 = 15 * 60;

/// Longest configurable minimum interval (one year)
pub const MAX_MIN_INTERVAL_SECS: i64 = 365 * 24 * 60 * 60;

pub fn default_min_interval() -> Duration {
    Duration::seconds(DEFAULT_MIN_INTERVAL_SECS)
}

/// `secs` as a minimum interval, clamped to `0..=MAX_MIN_INTERVAL_SECS`
pub fn min_interval_from_secs(secs: i64) -> Duration {
    Duration::try_seconds(secs.clamp(0, MAX_MIN_INTERVAL_SECS)).unwrap_or_else(default_min_interval)
}

/// When a behavior may use the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Never call the network
    LocalOnly,
    /// Call the network only while the local data is not showable
    NetworkOnlyIfLocalIsNotShowable,
    /// Call the network on every activation
    NetworkAlwaysFirst,
    /// Serve local data and refetch once the minimum interval has elapsed
    StaleWhileRevalidate,
}

/// Inputs of the fetch decision
#[derive(Debug, Clone, Copy)]
pub struct FetchContext {
    pub last_request_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
    pub min_interval: Duration,
    pub local_is_showable: bool,
    pub forced: bool,
}

impl FetchStrategy {
    /// Pure fetch decision. A forced refresh skips the elapsed-time check but
    /// never overrides `LocalOnly`.
    pub fn should_fetch(self, ctx: &FetchContext) -> bool {
        match self {
            FetchStrategy::LocalOnly => false,
            _ if ctx.forced => true,
            FetchStrategy::NetworkOnlyIfLocalIsNotShowable => !ctx.local_is_showable,
            FetchStrategy::NetworkAlwaysFirst => true,
            FetchStrategy::StaleWhileRevalidate => match ctx.last_request_at {
                None => true,
                Some(last) => ctx.now - last >= ctx.min_interval,
            },
        }
    }
}

/// Identity of a behavior: its type plus the parameters it was built with.
/// Two behaviors with equal keys observe and fetch the same data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BehaviorKey {
    kind: &'static str,
    params: String,
}

impl BehaviorKey {
    pub fn new(kind: &'static str, params: impl Into<String>) -> Self {
        Self {
            kind,
            params: params.into(),
        }
    }

    /// Key named after the behavior type, without the module path
    pub fn of<B: ?Sized>(params: impl Into<String>) -> Self {
        let full = std::any::type_name::<B>();
        let kind = full
            .split('<')
            .next()
            .and_then(|path| path.rsplit("::").next())
            .unwrap_or(full);
        Self::new(kind, params)
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn params(&self) -> &str {
        &self.params
    }
}

impl fmt::Display for BehaviorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}({})", self.kind, self.params)
        }
    }
}

#[async_trait]
pub trait NetworkBackedBehavior: Send + Sync + 'static {
    /// What screens read, e.g. a list of rows or an optional object
    type Local: Clone + Send + Sync + 'static;
    /// Decoded remote payload
    type Api: Send + 'static;

    fn key(&self) -> BehaviorKey;

    fn fetch_strategy(&self) -> FetchStrategy {
        FetchStrategy::StaleWhileRevalidate
    }

    fn min_time_between_requests(&self) -> Duration {
        default_min_interval()
    }

    /// Build the live local adapter. Called once per runtime instance.
    fn create_local_updating_results(&self, store: &LocalStore) -> ValueStream<Self::Local>;

    fn is_local_data_showable(&self, local: &Self::Local) -> bool;

    fn should_perform_network_request(
        &self,
        last_request_at: Option<DateTime<Utc>>,
        local: &Self::Local,
        now: DateTime<Utc>,
        forced: bool,
    ) -> bool {
        self.fetch_strategy().should_fetch(&FetchContext {
            last_request_at,
            now,
            min_interval: self.min_time_between_requests(),
            local_is_showable: self.is_local_data_showable(local),
            forced,
        })
    }

    /// Fetch the remote payload. Failures are reported through the result.
    async fn fetch_from_api(&self, forced_refresh: bool) -> RequestResult<Self::Api>;

    /// Reconcile `api` into the store. Runs inside one write transaction;
    /// returning `Err` rolls every change back.
    fn upsert(&self, txn: &mut WriteTxn<'_>, local: &Self::Local, api: Self::Api) -> Result<(), SyncError>;
}

/// What one `refresh` call did
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// The fetch strategy declined the request
    NotNeeded,
    /// A request of this behavior was already running
    InFlight,
    /// Remote data was reconciled into the store
    Updated,
    NotModified,
    Offline,
    Failed(SyncError),
    /// The behavior was torn down before or while fetching
    Discarded,
}

/// Anything that can be asked to refresh from the network
#[async_trait]
pub trait Refresh: Send + Sync {
    async fn refresh(&self, forced: bool) -> RefreshOutcome;
}

#[derive(Debug, Default)]
struct RequestState {
    last_request_at: Option<DateTime<Utc>>,
    in_flight: usize,
    error: Option<SyncError>,
}

/// Runtime of one behavior instance
pub struct ActiveBehavior<B: NetworkBackedBehavior> {
    behavior: B,
    key: BehaviorKey,
    store: LocalStore,
    clock: SharedClock,
    local: ValueStream<B::Local>,
    results: ValueStream<NetworkResult<B::Local>>,
    state: Arc<Mutex<RequestState>>,
    local_listener: Mutex<Option<ListenerHandle>>,
    torn_down: AtomicBool,
}

impl<B: NetworkBackedBehavior> fmt::Debug for ActiveBehavior<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveBehavior")
            .field("key", &self.key)
            .field("state", &*lock(&self.state))
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

impl<B: NetworkBackedBehavior> ActiveBehavior<B> {
    pub fn new(behavior: B, store: LocalStore, clock: SharedClock) -> Self {
        let key = behavior.key();
        let local = behavior.create_local_updating_results(&store);
        Self {
            behavior,
            key,
            store,
            clock,
            local,
            results: ValueStream::new(),
            state: Arc::new(Mutex::new(RequestState::default())),
            local_listener: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Subscribe to the local adapter and start publishing results. Does not
    /// fetch; call `refresh(false)` for the activation request.
    pub fn start(&self) {
        let mut listener = lock(&self.local_listener);
        if listener.is_some() || self.is_torn_down() {
            return;
        }
        let state = Arc::clone(&self.state);
        let results = self.results.clone();
        *listener = Some(self.local.add_listener(move |local: &B::Local| {
            let (loading, error) = {
                let state = lock(&state);
                (state.in_flight > 0, state.error.clone())
            };
            results.push(NetworkResult {
                data: local.clone(),
                is_network_loading: loading,
                error,
            });
        }));
        debug!("[{}] started", self.key);
    }

    pub fn key(&self) -> &BehaviorKey {
        &self.key
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    pub fn results(&self) -> ValueStream<NetworkResult<B::Local>> {
        self.results.clone()
    }

    pub fn current(&self) -> Option<NetworkResult<B::Local>> {
        self.results.current_value()
    }

    pub fn last_request_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.state).last_request_at
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Decide whether to fetch, fetch, and reconcile the response.
    ///
    /// `last_request_at` is recorded when the request is dispatched and stays
    /// set when it fails.
    #[tracing::instrument(skip(self), fields(key = %self.key))]
    pub async fn refresh(&self, forced: bool) -> RefreshOutcome {
        if self.is_torn_down() {
            return RefreshOutcome::Discarded;
        }
        let Some(local) = self.local.current_value() else {
            return RefreshOutcome::NotNeeded;
        };
        let now = self.clock.now();
        {
            let mut state = lock(&self.state);
            if state.in_flight > 0 && !forced {
                debug!("request already in flight, skipping");
                return RefreshOutcome::InFlight;
            }
            if !self
                .behavior
                .should_perform_network_request(state.last_request_at, &local, now, forced)
            {
                debug!(
                    "fetch not needed (strategy {:?}, last request {:?})",
                    self.behavior.fetch_strategy(),
                    state.last_request_at
                );
                return RefreshOutcome::NotNeeded;
            }
            state.last_request_at = Some(now);
            state.in_flight += 1;
        }
        let in_flight = InFlightGuard { active: self };
        self.publish();

        let response = self.behavior.fetch_from_api(forced).await;

        if self.is_torn_down() {
            debug!("torn down while fetching, discarding response");
            return RefreshOutcome::Discarded;
        }

        let outcome = match response {
            RequestResult::Success(api) => {
                let local = self.local.current_value().unwrap_or(local);
                match self
                    .store
                    .write(|txn| self.behavior.upsert(txn, &local, api))
                {
                    Ok(()) => {
                        info!("reconciled remote data");
                        RefreshOutcome::Updated
                    }
                    Err(err) => {
                        warn!("failed to store remote data: {}", err);
                        RefreshOutcome::Failed(err)
                    }
                }
            }
            RequestResult::NotModified => {
                debug!("remote data not modified");
                RefreshOutcome::NotModified
            }
            RequestResult::Offline => {
                debug!("offline, keeping local data");
                RefreshOutcome::Offline
            }
            RequestResult::Failed(err) => {
                warn!("fetch failed: {}", err);
                RefreshOutcome::Failed(err)
            }
        };

        {
            let mut state = lock(&self.state);
            match &outcome {
                RefreshOutcome::Updated | RefreshOutcome::NotModified => state.error = None,
                RefreshOutcome::Failed(err) => state.error = Some(err.clone()),
                _ => {}
            }
        }
        drop(in_flight);
        outcome
    }

    /// Detach from the store and drop every listener. Idempotent; a running
    /// fetch completes without touching the store.
    pub fn tear_down(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.local_listener).take();
        self.local.teardown();
        self.results.teardown();
        debug!("[{}] torn down", self.key);
    }

    fn publish(&self) {
        if lock(&self.local_listener).is_none() {
            return;
        }
        let Some(data) = self.local.current_value() else {
            return;
        };
        let (loading, error) = {
            let state = lock(&self.state);
            (state.in_flight > 0, state.error.clone())
        };
        self.results.push(NetworkResult {
            data,
            is_network_loading: loading,
            error,
        });
    }
}

/// Ends one in-flight request and republishes, also when the refresh future
/// is dropped before completion
struct InFlightGuard<'a, B: NetworkBackedBehavior> {
    active: &'a ActiveBehavior<B>,
}

impl<B: NetworkBackedBehavior> Drop for InFlightGuard<'_, B> {
    fn drop(&mut self) {
        {
            let mut state = lock(&self.active.state);
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.active.publish();
    }
}

#[async_trait]
impl<B: NetworkBackedBehavior> Refresh for ActiveBehavior<B> {
    async fn refresh(&self, forced: bool) -> RefreshOutcome {
        ActiveBehavior::refresh(self, forced).await
    }
}

impl<B: NetworkBackedBehavior> Drop for ActiveBehavior<B> {
    fn drop(&mut self) {
        self.tear_down();
    }
}
