use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use setlist::behavior::{BehaviorKey, FetchStrategy, NetworkBackedBehavior};
use setlist::clock::SystemClock;
use setlist::remote::{
    FetchOptions, RateLimitConfig, RequestCoordinator, Transport, TransportError, TransportRequest,
    TransportResponse,
};
use setlist::{Entity, ExecutorRegistry, LocalStore, Query, RequestResult, StoreError, SyncError, ValueStream, WriteTxn};

/// Answers every request after a short delay, counting calls
#[derive(Default)]
struct SlowTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for SlowTransport {
    async fn get(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(TransportResponse::Ok {
            body: json!({ "url": request.url }),
            etag: None,
        })
    }
}

fn coordinator(transport: Arc<SlowTransport>, store: LocalStore) -> RequestCoordinator {
    RequestCoordinator::new(
        "https://catalog.test/api",
        transport,
        store,
        Arc::new(SystemClock),
        RateLimitConfig {
            capacity: 1_000,
            ..RateLimitConfig::default()
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_concurrent_identical_requests_hit_transport_once(callers in 1usize..16, resources in 1usize..4) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let transport = Arc::new(SlowTransport::default());
            let coordinator = coordinator(Arc::clone(&transport), LocalStore::new());

            let requests = (0..callers * resources).map(|i| {
                let coordinator = coordinator.clone();
                async move {
                    let resource = format!("/v3/shows/{}", i % resources);
                    coordinator.fetch(&resource, FetchOptions::default()).await
                }
            });
            let results = join_all(requests).await;

            prop_assert!(results.iter().all(RequestResult::is_success));
            prop_assert_eq!(transport.calls.load(Ordering::SeqCst), resources);
            prop_assert_eq!(coordinator.in_flight_count(), 0);
            Ok(())
        })?;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Counter {
    id: String,
    value: u64,
}

impl Entity for Counter {
    const TABLE: &'static str = "counters";

    fn id(&self) -> &str {
        &self.id
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_are_serialized() -> Result<()> {
    let store = LocalStore::new();
    store.write(|txn| {
        txn.put(Counter {
            id: "plays".to_string(),
            value: 0,
        })
    })?;
    let live = store.object_stream::<Counter>("plays");

    let writers = (0..8).map(|_| {
        let store = store.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                store.write(|txn| {
                    txn.update::<Counter>("plays", |counter| counter.value += 1);
                    Ok::<_, StoreError>(())
                })?;
                tokio::task::yield_now().await;
            }
            Ok::<_, StoreError>(())
        })
    });
    for writer in join_all(writers).await {
        writer??;
    }

    assert_eq!(store.object::<Counter>("plays").map(|c| c.value), Some(400));
    assert_eq!(live.current_value().flatten().map(|c| c.value), Some(400));
    Ok(())
}

struct CountersBehavior {
    coordinator: RequestCoordinator,
}

#[async_trait]
impl NetworkBackedBehavior for CountersBehavior {
    type Local = Vec<Counter>;
    type Api = u64;

    fn key(&self) -> BehaviorKey {
        BehaviorKey::of::<Self>("")
    }

    fn fetch_strategy(&self) -> FetchStrategy {
        FetchStrategy::StaleWhileRevalidate
    }

    fn create_local_updating_results(&self, store: &LocalStore) -> ValueStream<Vec<Counter>> {
        store.results_stream(Query::all())
    }

    fn is_local_data_showable(&self, local: &Vec<Counter>) -> bool {
        !local.is_empty()
    }

    async fn fetch_from_api(&self, forced_refresh: bool) -> RequestResult<u64> {
        self.coordinator
            .fetch("/v3/counters", FetchOptions::forced(forced_refresh))
            .await
            .map(|_| 1)
    }

    fn upsert(&self, txn: &mut WriteTxn<'_>, _local: &Vec<Counter>, api: u64) -> Result<(), SyncError> {
        txn.put(Counter {
            id: "remote".to_string(),
            value: api,
        })?;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_consumers_share_one_executor() -> Result<()> {
    let store = LocalStore::new();
    let transport = Arc::new(SlowTransport::default());
    let registry = ExecutorRegistry::new(store.clone(), Arc::new(SystemClock));

    let consumers: Vec<_> = (0..32)
        .map(|_| {
            registry.start(CountersBehavior {
                coordinator: coordinator(Arc::clone(&transport), store.clone()),
            })
        })
        .collect();
    assert_eq!(registry.active_count(), 1);
    assert_eq!(registry.ref_count(&BehaviorKey::of::<CountersBehavior>("")), 32);

    for _ in 0..200 {
        if store.count::<Counter>() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(store.count::<Counter>(), 1);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert!(consumers.iter().all(|c| c.current().is_some_and(|r| r.data.len() == 1)));

    drop(consumers);
    assert_eq!(registry.active_count(), 0);
    assert_eq!(store.observer_count(), 0);
    Ok(())
}
