//! Combining several result streams into one
//!
//! Screens that show data from more than one behavior merge their results:
//! the merged result is loading while any input is loading, carries the first
//! error in key order, and maps every key to that input's data.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;
use setlist_api::{NetworkResult, SyncError};

use crate::behavior::{Refresh, RefreshOutcome};
use crate::executor::SharedResults;
use crate::stream::ValueStream;

/// Pure merge of keyed results
pub fn compose<T: Clone>(inputs: &[(String, NetworkResult<T>)]) -> NetworkResult<IndexMap<String, T>> {
    let mut data = IndexMap::with_capacity(inputs.len());
    let mut is_network_loading = false;
    let mut error: Option<SyncError> = None;
    for (key, result) in inputs {
        is_network_loading |= result.is_network_loading;
        if error.is_none() {
            error = result.error.clone();
        }
        data.insert(key.clone(), result.data.clone());
    }
    NetworkResult {
        data,
        is_network_loading,
        error,
    }
}

/// Anything that exposes a result stream and can be refreshed
pub trait ResultSource<T>: Send + Sync + 'static {
    fn results(&self) -> ValueStream<NetworkResult<T>>;
    fn refresher(&self) -> Arc<dyn Refresh>;
}

impl<T: Clone + Send + Sync + 'static> ResultSource<T> for SharedResults<T> {
    fn results(&self) -> ValueStream<NetworkResult<T>> {
        SharedResults::results(self)
    }

    fn refresher(&self) -> Arc<dyn Refresh> {
        SharedResults::refresher(self)
    }
}

impl<T: Clone + Send + Sync + 'static> ResultSource<T> for ComposedResults<T> {
    fn results(&self) -> ValueStream<NetworkResult<T>> {
        ComposedResults::results(self)
    }

    fn refresher(&self) -> Arc<dyn Refresh> {
        Arc::new(RefreshAll(self.refreshers.clone()))
    }
}

struct RefreshAll(Vec<Arc<dyn Refresh>>);

#[async_trait]
impl Refresh for RefreshAll {
    async fn refresh(&self, forced: bool) -> RefreshOutcome {
        let outcomes = join_all(self.0.iter().map(|source| source.refresh(forced))).await;
        summarize(outcomes)
    }
}

/// First failure wins, then any update, then the first outcome
fn summarize(outcomes: Vec<RefreshOutcome>) -> RefreshOutcome {
    if let Some(failed) = outcomes
        .iter()
        .find(|outcome| matches!(outcome, RefreshOutcome::Failed(_)))
    {
        return failed.clone();
    }
    if outcomes.contains(&RefreshOutcome::Updated) {
        return RefreshOutcome::Updated;
    }
    outcomes.into_iter().next().unwrap_or(RefreshOutcome::NotNeeded)
}

/// Merged view over several sources. Owns the sources: tearing it down (or
/// dropping it) releases every input.
pub struct ComposedResults<T> {
    results: ValueStream<NetworkResult<T>>,
    refreshers: Vec<Arc<dyn Refresh>>,
    sources: Vec<Box<dyn Any + Send + Sync>>,
}

impl<T: Clone + Send + Sync + 'static> ComposedResults<T> {
    pub fn results(&self) -> ValueStream<NetworkResult<T>> {
        self.results.clone()
    }

    pub fn current(&self) -> Option<NetworkResult<T>> {
        self.results.current_value()
    }

    /// Refresh every input
    pub async fn refresh(&self, forced: bool) -> RefreshOutcome {
        RefreshAll(self.refreshers.clone()).refresh(forced).await
    }

    pub fn tear_down(&mut self) {
        self.results.teardown();
        self.refreshers.clear();
        self.sources.clear();
    }
}

/// Merge any number of same-typed sources under string keys
pub fn merge_results<T, S>(sources: Vec<(String, S)>) -> ComposedResults<IndexMap<String, T>>
where
    T: Clone + Send + Sync + 'static,
    S: ResultSource<T>,
{
    let merged: ValueStream<NetworkResult<IndexMap<String, T>>> = ValueStream::new();
    let mut refreshers = Vec::with_capacity(sources.len());
    let mut inputs: Vec<(String, ValueStream<NetworkResult<T>>)> = Vec::with_capacity(sources.len());
    let mut owned: Vec<Box<dyn Any + Send + Sync>> = Vec::with_capacity(sources.len());

    for (key, source) in sources {
        refreshers.push(source.refresher());
        inputs.push((key, source.results()));
        owned.push(Box::new(source));
    }

    let inputs = Arc::new(inputs);
    let recompute = {
        let weak = merged.downgrade();
        let inputs = Arc::clone(&inputs);
        move || {
            let Some(merged) = weak.upgrade() else {
                return;
            };
            let mut current = Vec::with_capacity(inputs.len());
            for (key, stream) in inputs.iter() {
                // Wait until every input has produced a value
                let Some(value) = stream.current_value() else {
                    return;
                };
                current.push((key.clone(), value));
            }
            merged.push(compose(&current));
        }
    };
    let recompute = Arc::new(recompute);

    for (_, stream) in inputs.iter() {
        let recompute = Arc::clone(&recompute);
        let handle = stream.add_listener(move |_| recompute());
        merged.on_teardown(move || drop(handle));
    }
    if inputs.is_empty() {
        merged.push(compose(&[]));
    }

    ComposedResults {
        results: merged,
        refreshers,
        sources: owned,
    }
}

/// Merge two differently typed sources into tuple data
pub fn merge_pair<A, B, SA, SB>(a: SA, b: SB) -> ComposedResults<(A, B)>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    SA: ResultSource<A>,
    SB: ResultSource<B>,
{
    let merged = ValueStream::combine(&a.results(), &b.results(), |a: &NetworkResult<A>, b: &NetworkResult<B>| {
        NetworkResult {
            data: (a.data.clone(), b.data.clone()),
            is_network_loading: a.is_network_loading || b.is_network_loading,
            error: a.error.clone().or_else(|| b.error.clone()),
        }
    });
    ComposedResults {
        results: merged,
        refreshers: vec![a.refresher(), b.refresher()],
        sources: vec![
            Box::new(a) as Box<dyn Any + Send + Sync>,
            Box::new(b) as Box<dyn Any + Send + Sync>,
        ],
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn result(data: u32, loading: bool, error: Option<&str>) -> NetworkResult<u32> {
        NetworkResult {
            data,
            is_network_loading: loading,
            error: error.map(SyncError::network),
        }
    }

    struct CountingRefresh(Arc<AtomicUsize>, RefreshOutcome);

    #[async_trait]
    impl Refresh for CountingRefresh {
        async fn refresh(&self, _forced: bool) -> RefreshOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            self.1.clone()
        }
    }

    struct ManualSource {
        stream: ValueStream<NetworkResult<u32>>,
        refresh: Arc<dyn Refresh>,
    }

    impl ResultSource<u32> for ManualSource {
        fn results(&self) -> ValueStream<NetworkResult<u32>> {
            self.stream.clone()
        }

        fn refresher(&self) -> Arc<dyn Refresh> {
            Arc::clone(&self.refresh)
        }
    }

    fn source(
        initial: Option<NetworkResult<u32>>,
        calls: &Arc<AtomicUsize>,
        outcome: RefreshOutcome,
    ) -> ManualSource {
        let stream = match initial {
            Some(value) => ValueStream::with_value(value),
            None => ValueStream::new(),
        };
        ManualSource {
            stream,
            refresh: Arc::new(CountingRefresh(Arc::clone(calls), outcome)),
        }
    }

    #[test]
    fn test_loading_is_any_and_error_is_first() {
        let composed = compose(&[
            ("a".to_string(), result(1, true, None)),
            ("b".to_string(), result(2, false, Some("boom"))),
        ]);

        assert!(composed.is_network_loading);
        assert_eq!(composed.error, Some(SyncError::network("boom")));
        assert_eq!(composed.data.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_first_error_in_key_order() {
        let composed = compose(&[
            ("a".to_string(), result(1, false, Some("first"))),
            ("b".to_string(), result(2, false, Some("second"))),
        ]);
        assert_eq!(composed.error, Some(SyncError::network("first")));
    }

    #[test]
    fn test_merge_waits_for_every_input_then_tracks_changes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a = source(Some(result(1, false, None)), &calls, RefreshOutcome::NotNeeded);
        let b = source(None, &calls, RefreshOutcome::NotNeeded);
        let b_stream = b.stream.clone();
        let a_stream = a.stream.clone();

        let merged = merge_results(vec![("a".to_string(), a), ("b".to_string(), b)]);
        assert!(merged.current().is_none());

        b_stream.push(result(2, true, None));
        let current = merged.current().unwrap();
        assert_eq!(current.data["a"], 1);
        assert_eq!(current.data["b"], 2);
        assert!(current.is_network_loading);

        a_stream.push(result(5, false, Some("down")));
        let current = merged.current().unwrap();
        assert_eq!(current.data["a"], 5);
        assert_eq!(current.error, Some(SyncError::network("down")));
    }

    #[tokio::test]
    async fn test_refresh_refreshes_every_input() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a = source(Some(result(1, false, None)), &calls, RefreshOutcome::Updated);
        let b = source(
            Some(result(2, false, None)),
            &calls,
            RefreshOutcome::Failed(SyncError::network("x")),
        );

        let merged = merge_pair(a, b);
        assert_eq!(merged.current().unwrap().data, (1, 2));

        let outcome = merged.refresh(true).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome, RefreshOutcome::Failed(SyncError::network("x")));
    }

    #[test]
    fn test_tear_down_detaches_from_inputs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a = source(Some(result(1, false, None)), &calls, RefreshOutcome::NotNeeded);
        let a_stream = a.stream.clone();

        let mut merged = merge_results(vec![("a".to_string(), a)]);
        assert_eq!(a_stream.listener_count(), 1);

        merged.tear_down();
        assert_eq!(a_stream.listener_count(), 0);
        assert!(merged.results().is_torn_down());
    }

    #[test]
    fn test_summarize_prefers_failure_then_update() {
        assert_eq!(
            summarize(vec![RefreshOutcome::NotNeeded, RefreshOutcome::Updated]),
            RefreshOutcome::Updated
        );
        assert_eq!(summarize(Vec::new()), RefreshOutcome::NotNeeded);
    }
}
