//! Local store adapters: live `ValueStream`s over store contents
//!
//! An adapter evaluates once when created, then re-evaluates after every
//! committed transaction that touched one of the tables it reads. Tearing the
//! stream down releases the store subscription.
//!
//! Every evaluation is tagged with the store version it read. A value is only
//! pushed when it is newer than the last one pushed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use setlist_api::Entity;
use tracing::{trace, warn};

use super::memory::{LocalStore, ReadTxn};
use super::types::{Query, TableId};
use crate::stream::ValueStream;

impl LocalStore {
    /// Live stream of an arbitrary computation over `tables`.
    ///
    /// `compute` must only read the listed tables; changes to other tables do
    /// not trigger re-evaluation.
    pub fn computed_stream<V, F>(&self, tables: &[TableId], compute: F) -> ValueStream<V>
    where
        V: Clone + Send + Sync + 'static,
        F: Fn(&ReadTxn<'_>) -> V + Send + Sync + 'static,
    {
        if let Err(err) = self.load_tables(tables) {
            warn!("[LocalStore] live query over unloaded tables: {}", err);
        }
        let compute = Arc::new(compute);
        let (version, initial) = self.read_versioned(&*compute);
        let stream = ValueStream::with_value(initial);
        let pushed = Arc::new(AtomicU64::new(version));

        let reevaluate = {
            let weak_store = self.downgrade();
            let weak_stream = stream.downgrade();
            let compute = Arc::clone(&compute);
            let pushed = Arc::clone(&pushed);
            move || {
                let (Some(store), Some(stream)) = (weak_store.upgrade(), weak_stream.upgrade())
                else {
                    return;
                };
                if stream.is_torn_down() {
                    return;
                }
                let (version, value) = store.read_versioned(&*compute);
                if pushed.fetch_max(version, Ordering::SeqCst) < version {
                    trace!("[LocalStore] live query at version {}", version);
                    stream.push(value);
                }
            }
        };
        let reevaluate = Arc::new(reevaluate);
        let on_commit = Arc::clone(&reevaluate);
        let token = self.observe_tables(tables, move || on_commit());
        // Commits between the first evaluation and registration
        reevaluate();

        stream.on_teardown(move || token.cancel());
        stream
    }

    /// Live result set of `query`
    pub fn results_stream<T: Entity>(&self, query: Query<T>) -> ValueStream<Vec<T>> {
        self.computed_stream(&[TableId::of::<T>()], move |txn| txn.query(&query))
    }

    /// Live lookup of a single object; `None` while it does not exist
    pub fn object_stream<T: Entity>(&self, id: impl Into<String>) -> ValueStream<Option<T>> {
        let id = id.into();
        self.computed_stream(&[TableId::of::<T>()], move |txn| txn.object::<T>(&id).cloned())
    }
}
