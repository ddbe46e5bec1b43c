//! Request coordinator: the single path from behaviors to the catalog service
//!
//! Responsibilities, in request order:
//! 1. join an identical request that is already in flight (same URL, and
//!    either both or neither send the stored etag)
//! 2. wait for a rate-limit token (bounded)
//! 3. attach the stored etag so the server can answer 304
//! 4. persist the new etag and completion time on success
//!
//! Transport outcomes are folded into `RequestResult`; nothing here panics or
//! returns `Err`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use setlist_api::{RequestMetadata, RequestResult, SyncError};
use tracing::{debug, info, warn};

use super::rate_limit::{RateLimitConfig, RateLimiter};
use super::transport::{Transport, TransportError, TransportRequest, TransportResponse};
use crate::clock::SharedClock;
use crate::store::LocalStore;
use crate::stream::lock;

/// Decoded JSON body shared between every caller of one request
pub type Payload = Arc<Value>;

type SharedFetch = Shared<BoxFuture<'static, RequestResult<Payload>>>;

/// Requests are only shared between callers that would send the same request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    url: String,
    conditional: bool,
}

/// Per-call switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// User-initiated refresh: never sends the stored etag
    pub forced_refresh: bool,
    pub bypass_rate_limit: bool,
    pub bypass_etag_caching: bool,
    pub bypass_request_deduplication: bool,
}

impl FetchOptions {
    pub fn forced(forced_refresh: bool) -> Self {
        Self {
            forced_refresh,
            ..Self::default()
        }
    }

    /// Whether the stored etag is attached to the request
    pub fn is_conditional(&self) -> bool {
        !(self.forced_refresh || self.bypass_etag_caching)
    }
}

struct CoordinatorInner {
    base_url: String,
    transport: Arc<dyn Transport>,
    store: LocalStore,
    clock: SharedClock,
    limiter: RateLimiter,
    in_flight: Mutex<HashMap<DedupKey, (u64, SharedFetch)>>,
    next_generation: AtomicU64,
}

#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("base_url", &self.inner.base_url)
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

impl RequestCoordinator {
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        store: LocalStore,
        clock: SharedClock,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                transport,
                store,
                clock,
                limiter: RateLimiter::new(rate_limit),
                in_flight: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn url_for(&self, resource: &str) -> String {
        if resource.starts_with('/') {
            format!("{}{}", self.inner.base_url, resource)
        } else {
            format!("{}/{}", self.inner.base_url, resource)
        }
    }

    pub fn metadata(&self, resource: &str) -> Option<RequestMetadata> {
        self.inner
            .store
            .object::<RequestMetadata>(&self.url_for(resource))
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }

    /// Fetch `resource` (a path below the base URL)
    #[tracing::instrument(skip(self, options), fields(forced = options.forced_refresh))]
    pub async fn fetch(&self, resource: &str, options: FetchOptions) -> RequestResult<Payload> {
        let url = self.url_for(resource);
        if options.bypass_request_deduplication {
            return perform(Arc::clone(&self.inner), url, options).await;
        }

        let key = DedupKey {
            url: url.clone(),
            conditional: options.is_conditional(),
        };
        let (generation, request) = {
            let mut in_flight = lock(&self.inner.in_flight);
            match in_flight.get(&key) {
                Some((generation, request)) => {
                    debug!("joining in-flight request for {}", url);
                    (*generation, request.clone())
                }
                None => {
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                    let request = perform(Arc::clone(&self.inner), url.clone(), options)
                        .boxed()
                        .shared();
                    in_flight.insert(key.clone(), (generation, request.clone()));
                    (generation, request)
                }
            }
        };

        let result = request.await;

        let mut in_flight = lock(&self.inner.in_flight);
        if in_flight.get(&key).map(|(current, _)| *current) == Some(generation) {
            in_flight.remove(&key);
        }
        result
    }
}

async fn perform(inner: Arc<CoordinatorInner>, url: String, options: FetchOptions) -> RequestResult<Payload> {
    if !options.bypass_rate_limit && !inner.limiter.acquire().await {
        warn!("rate limit exceeded for {}", url);
        return RequestResult::Failed(SyncError::RateLimited { resource: url });
    }

    let etag = if options.is_conditional() {
        inner
            .store
            .object::<RequestMetadata>(&url)
            .and_then(|metadata| metadata.etag)
    } else {
        None
    };
    debug!("GET {} (etag: {:?})", url, etag);

    let response = inner
        .transport
        .get(TransportRequest {
            url: url.clone(),
            etag,
        })
        .await;

    match response {
        Ok(TransportResponse::Ok { body, etag }) => {
            record_completion(&inner, &url, Some(etag));
            info!("fetched {}", url);
            RequestResult::Success(Arc::new(body))
        }
        Ok(TransportResponse::NotModified) => {
            record_completion(&inner, &url, None);
            debug!("{} not modified", url);
            RequestResult::NotModified
        }
        Ok(TransportResponse::Status { code, body }) => {
            warn!("HTTP {} from {}: {}", code, url, body);
            RequestResult::Failed(SyncError::Server { url, status: code })
        }
        Err(TransportError::Offline) => {
            debug!("offline, skipping {}", url);
            RequestResult::Offline
        }
        Err(TransportError::Failed(message)) => {
            warn!("request to {} failed: {}", url, message);
            RequestResult::Failed(SyncError::network(message))
        }
    }
}

/// Store the completion time, and the etag when the response carried a body
fn record_completion(inner: &CoordinatorInner, url: &str, etag: Option<Option<String>>) {
    let now = inner.clock.now();
    let written = inner.store.write(|txn| {
        let mut metadata = txn
            .get::<RequestMetadata>(url)
            .unwrap_or_else(|| RequestMetadata::new(url));
        if let Some(etag) = etag {
            metadata.etag = etag;
        }
        metadata.last_request_completed_at = Some(now);
        txn.put(metadata)
    });
    if let Err(err) = written {
        warn!("failed to record request metadata for {}: {}", url, err);
    }
}
