//! The local object store
//!
//! Typed tables of entities keyed by identifier, held in memory and
//! optionally written through to a `StoreBackend`, with:
//! - snapshot reads (`read`)
//! - scoped write transactions with commit-or-rollback (`write`)
//! - per-table change notifications, delivered once per committed
//!   transaction and outside every store lock
//!
//! Writes are serialized by the store itself. Opening a write transaction
//! while the current thread already holds one is rejected with
//! `StoreError::NestedWrite`.
//!
//! With a backend, a table is loaded the first time it is accessed through a
//! typed accessor, a live adapter, a write, or `load_tables`. A transaction
//! becomes visible in memory only after the backend accepted its changes.
//! Closures passed to `read` only see tables that were loaded before.

use std::any::{Any, TypeId};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::thread::{self, ThreadId};

use indexmap::IndexMap;
use setlist_api::Entity;
use tracing::{debug, info, warn};

use super::backend::{PersistedChange, StoreBackend};
use super::sqlite::SqliteBackend;
use super::types::{Query, Result, StoreError, TableId};
use crate::stream::lock;

type AnyTable = Box<dyn Any + Send + Sync>;
type ObserverCallback = Arc<dyn Fn() + Send + Sync>;

struct Table<T> {
    rows: IndexMap<String, T>,
}

impl<T: Entity> Table<T> {
    fn new() -> Self {
        Self {
            rows: IndexMap::new(),
        }
    }

    fn duplicate(&self) -> Self {
        Self {
            rows: self.rows.clone(),
        }
    }
}

struct ObserverEntry {
    id: u64,
    tables: Vec<TypeId>,
    callback: ObserverCallback,
}

struct StoreInner {
    tables: RwLock<HashMap<TypeId, AnyTable>>,
    /// Thread currently inside `write`, used to detect nesting
    writer: Mutex<Option<ThreadId>>,
    /// Serializes write transactions across threads
    write_lock: Mutex<()>,
    observers: Mutex<Vec<ObserverEntry>>,
    next_observer_id: AtomicU64,
    /// Number of committed transactions, bumped under the tables lock
    version: AtomicU64,
    closed: AtomicBool,
    backend: Option<Arc<dyn StoreBackend>>,
    /// Tables already read from the backend
    loaded: Mutex<HashSet<TypeId>>,
}

impl StoreInner {
    fn read_tables(&self) -> RwLockReadGuard<'_, HashMap<TypeId, AnyTable>> {
        self.tables
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_tables(&self) -> RwLockWriteGuard<'_, HashMap<TypeId, AnyTable>> {
        self.tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Read table `T` from the backend unless already loaded.
    ///
    /// The caller must hold `write_lock` so no commit races the load.
    fn load_table<T: Entity>(&self) -> Result<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        let type_id = TypeId::of::<T>();
        if lock(&self.loaded).contains(&type_id) {
            return Ok(());
        }

        let mut table = Table::<T>::new();
        for (id, body) in backend.load_rows(T::TABLE)? {
            match serde_json::from_str::<T>(&body) {
                Ok(row) => {
                    table.rows.insert(id, row);
                }
                Err(err) => warn!(
                    "[LocalStore] skipping unreadable row {} in {}: {}",
                    id,
                    T::TABLE,
                    err
                ),
            }
        }
        debug!("[LocalStore] loaded {} rows into {}", table.rows.len(), T::TABLE);
        self.write_tables().insert(type_id, Box::new(table));
        lock(&self.loaded).insert(type_id);
        Ok(())
    }

    fn is_writer(&self) -> bool {
        *lock(&self.writer) == Some(thread::current().id())
    }
}

/// Handle to the shared local store. Cloning is cheap.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("tables", &self.inner.read_tables().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl LocalStore {
    /// Store that lives only in memory
    pub fn new() -> Self {
        Self::with_backend(None)
    }

    /// Store persisted through `backend`
    pub fn open(backend: Arc<dyn StoreBackend>) -> Self {
        Self::with_backend(Some(backend))
    }

    /// Store persisted in the SQLite database at `path`
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let backend = SqliteBackend::open(path)?;
        Ok(Self::open(Arc::new(backend)))
    }

    fn with_backend(backend: Option<Arc<dyn StoreBackend>>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                tables: RwLock::new(HashMap::new()),
                writer: Mutex::new(None),
                write_lock: Mutex::new(()),
                observers: Mutex::new(Vec::new()),
                next_observer_id: AtomicU64::new(0),
                version: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                backend,
                loaded: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.backend.is_some()
    }

    /// Load table `T` from the backend. No-op for in-memory stores and for
    /// tables already loaded.
    pub fn load<T: Entity>(&self) -> Result<()> {
        if self.inner.backend.is_none() {
            return Ok(());
        }
        if self.inner.is_writer() {
            return self.inner.load_table::<T>();
        }
        let _serial = lock(&self.inner.write_lock);
        self.inner.load_table::<T>()
    }

    pub fn load_tables(&self, tables: &[TableId]) -> Result<()> {
        tables.iter().try_for_each(|table| table.load(self))
    }

    fn ensure_loaded<T: Entity>(&self) {
        if let Err(err) = self.load::<T>() {
            warn!("[LocalStore] could not load {}: {}", T::TABLE, err);
        }
    }

    pub fn downgrade(&self) -> WeakLocalStore {
        WeakLocalStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Close the store. Later writes fail with `StoreError::Closed`; reads keep
    /// serving the last committed state.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            info!("[LocalStore] closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Run `f` against a consistent snapshot of the committed state
    pub fn read<R>(&self, f: impl FnOnce(&ReadTxn<'_>) -> R) -> R {
        let tables = self.inner.read_tables();
        f(&ReadTxn { tables: &tables })
    }

    /// Like `read`, also returning the number of transactions committed
    /// before the snapshot
    pub fn read_versioned<R>(&self, f: impl FnOnce(&ReadTxn<'_>) -> R) -> (u64, R) {
        let tables = self.inner.read_tables();
        let version = self.inner.version.load(Ordering::SeqCst);
        (version, f(&ReadTxn { tables: &tables }))
    }

    pub fn object<T: Entity>(&self, id: &str) -> Option<T> {
        self.ensure_loaded::<T>();
        self.read(|txn| txn.object::<T>(id).cloned())
    }

    pub fn objects<T: Entity>(&self) -> Vec<T> {
        self.ensure_loaded::<T>();
        self.read(|txn| txn.objects::<T>().cloned().collect())
    }

    pub fn query<T: Entity>(&self, query: &Query<T>) -> Vec<T> {
        self.ensure_loaded::<T>();
        self.read(|txn| txn.query(query))
    }

    pub fn count<T: Entity>(&self) -> usize {
        self.ensure_loaded::<T>();
        self.read(|txn| txn.count::<T>())
    }

    /// Run `f` inside a write transaction.
    ///
    /// Returning `Ok` commits every change atomically and then notifies the
    /// observers of the touched tables; returning `Err` discards them.
    pub fn write<R, E>(&self, f: impl FnOnce(&mut WriteTxn<'_>) -> std::result::Result<R, E>) -> std::result::Result<R, E>
    where
        E: From<StoreError>,
    {
        if self.is_closed() {
            return Err(StoreError::Closed.into());
        }
        let current = thread::current().id();
        if *lock(&self.inner.writer) == Some(current) {
            warn!("[LocalStore] rejected nested write transaction");
            return Err(StoreError::NestedWrite.into());
        }

        let serial = lock(&self.inner.write_lock);
        *lock(&self.inner.writer) = Some(current);
        let reset = WriterReset(&self.inner);

        let mut txn = WriteTxn {
            store: &self.inner,
            staged: HashMap::new(),
            touched: Vec::new(),
            changes: Vec::new(),
            failure: Cell::new(None),
        };
        let outcome = f(&mut txn);

        let touched = match &outcome {
            Ok(_) => {
                // The store may have been closed while the transaction ran
                if self.is_closed() {
                    drop(reset);
                    drop(serial);
                    return Err(StoreError::Closed.into());
                }
                match txn.commit() {
                    Ok(touched) => touched,
                    Err(err) => {
                        warn!("[LocalStore] commit failed, transaction discarded: {}", err);
                        drop(reset);
                        drop(serial);
                        return Err(err.into());
                    }
                }
            }
            Err(_) => {
                debug!("[LocalStore] transaction rolled back");
                Vec::new()
            }
        };

        drop(reset);
        drop(serial);
        self.notify(&touched);
        outcome
    }

    /// Register `callback` to run after every committed transaction that
    /// touched one of `tables`. The returned token unregisters on drop.
    pub fn observe_tables(
        &self,
        tables: &[TableId],
        callback: impl Fn() + Send + Sync + 'static,
    ) -> ObserverToken {
        let id = self.inner.next_observer_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.observers).push(ObserverEntry {
            id,
            tables: tables.iter().map(TableId::type_id).collect(),
            callback: Arc::new(callback),
        });
        ObserverToken {
            store: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    pub fn observe<T: Entity>(&self, callback: impl Fn() + Send + Sync + 'static) -> ObserverToken {
        self.observe_tables(&[TableId::of::<T>()], callback)
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.inner.observers).len()
    }

    fn notify(&self, touched: &[TableId]) {
        if touched.is_empty() {
            return;
        }
        let callbacks: Vec<ObserverCallback> = lock(&self.inner.observers)
            .iter()
            .filter(|entry| {
                touched
                    .iter()
                    .any(|table| entry.tables.contains(&table.type_id()))
            })
            .map(|entry| Arc::clone(&entry.callback))
            .collect();
        debug!(
            "[LocalStore] committed {:?}, notifying {} observers",
            touched,
            callbacks.len()
        );
        for callback in callbacks {
            callback();
        }
    }
}

/// Non-owning store handle, used by adapters to avoid reference cycles
#[derive(Clone)]
pub struct WeakLocalStore {
    inner: Weak<StoreInner>,
}

impl WeakLocalStore {
    pub fn upgrade(&self) -> Option<LocalStore> {
        self.inner.upgrade().map(|inner| LocalStore { inner })
    }
}

struct WriterReset<'a>(&'a StoreInner);

impl Drop for WriterReset<'_> {
    fn drop(&mut self) {
        *lock(&self.0.writer) = None;
    }
}

/// Unregisters a store observer when dropped or cancelled
#[must_use = "dropping the token unregisters the observer"]
pub struct ObserverToken {
    store: Weak<StoreInner>,
    id: Option<u64>,
}

impl ObserverToken {
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let (Some(id), Some(store)) = (self.id.take(), self.store.upgrade()) {
            lock(&store.observers).retain(|entry| entry.id != id);
        }
    }
}

impl Drop for ObserverToken {
    fn drop(&mut self) {
        self.release();
    }
}

fn downcast<T: Entity>(table: &AnyTable) -> &Table<T> {
    table
        .downcast_ref::<Table<T>>()
        .expect("tables are keyed by their own TypeId")
}

fn downcast_mut<T: Entity>(table: &mut AnyTable) -> &mut Table<T> {
    table
        .downcast_mut::<Table<T>>()
        .expect("tables are keyed by their own TypeId")
}

/// Read access to a committed snapshot
pub struct ReadTxn<'a> {
    tables: &'a HashMap<TypeId, AnyTable>,
}

impl<'a> ReadTxn<'a> {
    fn table<T: Entity>(&self) -> Option<&'a Table<T>> {
        self.tables.get(&TypeId::of::<T>()).map(downcast::<T>)
    }

    pub fn object<T: Entity>(&self, id: &str) -> Option<&'a T> {
        self.table::<T>().and_then(|table| table.rows.get(id))
    }

    pub fn objects<T: Entity>(&self) -> impl Iterator<Item = &'a T> + 'a {
        self.table::<T>()
            .into_iter()
            .flat_map(|table| table.rows.values())
    }

    pub fn query<T: Entity>(&self, query: &Query<T>) -> Vec<T> {
        query.apply(self.objects::<T>())
    }

    pub fn count<T: Entity>(&self) -> usize {
        self.table::<T>().map_or(0, |table| table.rows.len())
    }
}

/// Staged changes of an open write transaction.
///
/// Tables are copied on first mutation; reads see staged rows first and fall
/// back to the committed state. A transaction that failed to load a table or
/// to serialize a row does not commit.
pub struct WriteTxn<'a> {
    store: &'a StoreInner,
    staged: HashMap<TypeId, AnyTable>,
    touched: Vec<TableId>,
    /// Row changes for the backend, empty for in-memory stores
    changes: Vec<PersistedChange>,
    failure: Cell<Option<StoreError>>,
}

impl WriteTxn<'_> {
    fn fail(&self, err: StoreError) {
        warn!("[LocalStore] transaction will not commit: {}", err);
        if let Some(first) = self.failure.take() {
            self.failure.set(Some(first));
        } else {
            self.failure.set(Some(err));
        }
    }

    fn ensure_loaded<T: Entity>(&self) {
        if let Err(err) = self.store.load_table::<T>() {
            self.fail(err);
        }
    }

    fn record_upsert<T: Entity>(&mut self, row: &T) {
        if self.store.backend.is_none() {
            return;
        }
        match serde_json::to_string(row) {
            Ok(body) => self.changes.push(PersistedChange::Upsert {
                table: T::TABLE,
                id: row.id().to_string(),
                body,
            }),
            Err(err) => self.fail(StoreError::Serialization {
                table: T::TABLE,
                id: row.id().to_string(),
                message: err.to_string(),
            }),
        }
    }

    fn record_delete<T: Entity>(&mut self, id: &str) {
        if self.store.backend.is_some() {
            self.changes.push(PersistedChange::Delete {
                table: T::TABLE,
                id: id.to_string(),
            });
        }
    }

    fn staged_table<T: Entity>(&self) -> Option<&Table<T>> {
        self.staged.get(&TypeId::of::<T>()).map(downcast::<T>)
    }

    fn staged_table_mut<T: Entity>(&mut self) -> &mut Table<T> {
        let type_id = TypeId::of::<T>();
        self.ensure_loaded::<T>();
        if !self.staged.contains_key(&type_id) {
            let copy = match self.store.read_tables().get(&type_id) {
                Some(committed) => downcast::<T>(committed).duplicate(),
                None => Table::<T>::new(),
            };
            self.staged.insert(type_id, Box::new(copy));
            self.touched.push(TableId::of::<T>());
        }
        let table = self
            .staged
            .get_mut(&type_id)
            .expect("table staged just above");
        downcast_mut::<T>(table)
    }

    pub fn get<T: Entity>(&self, id: &str) -> Option<T> {
        self.ensure_loaded::<T>();
        match self.staged_table::<T>() {
            Some(table) => table.rows.get(id).cloned(),
            None => self
                .store
                .read_tables()
                .get(&TypeId::of::<T>())
                .and_then(|table| downcast::<T>(table).rows.get(id).cloned()),
        }
    }

    pub fn objects<T: Entity>(&self) -> Vec<T> {
        self.query(&Query::all())
    }

    pub fn query<T: Entity>(&self, query: &Query<T>) -> Vec<T> {
        self.ensure_loaded::<T>();
        match self.staged_table::<T>() {
            Some(table) => query.apply(table.rows.values()),
            None => {
                let tables = self.store.read_tables();
                let rows = tables
                    .get(&TypeId::of::<T>())
                    .map(downcast::<T>)
                    .into_iter()
                    .flat_map(|table| table.rows.values());
                query.apply(rows)
            }
        }
    }

    /// Insert a new row or replace the row with the same identifier in place
    pub fn put<T: Entity>(&mut self, entity: T) -> Result<()> {
        if entity.id().trim().is_empty() {
            return Err(StoreError::MissingIdentifier { table: T::TABLE });
        }
        self.record_upsert(&entity);
        let id = entity.id().to_string();
        self.staged_table_mut::<T>().rows.insert(id, entity);
        Ok(())
    }

    /// Mutate an existing row; returns false when no row has `id`
    pub fn update<T: Entity>(&mut self, id: &str, f: impl FnOnce(&mut T)) -> bool {
        if self.get::<T>(id).is_none() {
            return false;
        }
        let updated = match self.staged_table_mut::<T>().rows.get_mut(id) {
            Some(row) => {
                f(row);
                row.clone()
            }
            None => return false,
        };
        self.record_upsert(&updated);
        true
    }

    pub fn delete<T: Entity>(&mut self, id: &str) -> Option<T> {
        self.get::<T>(id)?;
        self.record_delete::<T>(id);
        self.staged_table_mut::<T>().rows.shift_remove(id)
    }

    fn commit(self) -> Result<Vec<TableId>> {
        if let Some(err) = self.failure.take() {
            return Err(err);
        }
        if let (Some(backend), false) = (&self.store.backend, self.changes.is_empty()) {
            backend.apply(&self.changes)?;
        }
        let mut tables = self.store.write_tables();
        for (type_id, table) in self.staged {
            tables.insert(type_id, table);
        }
        self.store.version.fetch_add(1, Ordering::SeqCst);
        Ok(self.touched)
    }
}
