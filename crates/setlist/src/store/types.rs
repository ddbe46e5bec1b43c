use std::any::TypeId;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use setlist_api::{Entity, SyncError};
use thiserror::Error;

use super::memory::LocalStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store is closed")]
    Closed,

    #[error("A write transaction is already open on this thread")]
    NestedWrite,

    #[error("Entity in table {table} has an empty identifier")]
    MissingIdentifier { table: &'static str },

    #[error("Transaction rolled back: {0}")]
    Rollback(String),

    #[error("Row {id} in table {table} could not be serialized: {message}")]
    Serialization {
        table: &'static str,
        id: String,
        message: String,
    },

    #[error("Persistence failed: {message}")]
    Backend { message: String },
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::Storage {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Identifies one table of the store (one table per entity type)
#[derive(Clone, Copy)]
pub struct TableId {
    type_id: TypeId,
    name: &'static str,
    load: fn(&LocalStore) -> Result<()>,
}

impl TableId {
    pub fn of<T: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: T::TABLE,
            load: LocalStore::load::<T>,
        }
    }

    /// Load this table from the store's backend if it is not loaded yet
    pub fn load(&self, store: &LocalStore) -> Result<()> {
        (self.load)(store)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl PartialEq for TableId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for TableId {}

impl Hash for TableId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId({})", self.name)
    }
}

type FilterFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type SortFn<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Filter + sort + limit over one table, evaluated against a snapshot.
pub struct Query<T> {
    filters: Vec<FilterFn<T>>,
    sort: Option<SortFn<T>>,
    limit: Option<usize>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            filters: self.filters.clone(),
            sort: self.sort.clone(),
            limit: self.limit,
        }
    }
}

impl<T: Entity> Default for Query<T> {
    fn default() -> Self {
        Self::all()
    }
}

impl<T: Entity> Query<T> {
    /// Every row, in insertion order
    pub fn all() -> Self {
        Self {
            filters: Vec::new(),
            sort: None,
            limit: None,
        }
    }

    pub fn filter(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filters.push(Arc::new(predicate));
        self
    }

    pub fn sort_by(mut self, compare: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        self.sort = Some(Arc::new(compare));
        self
    }

    pub fn sort_by_key<K: Ord>(self, key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        self.sort_by(move |a, b| key(a).cmp(&key(b)))
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entity: &T) -> bool {
        self.filters.iter().all(|f| f(entity))
    }

    pub fn apply<'a>(&self, rows: impl Iterator<Item = &'a T>) -> Vec<T> {
        let mut result: Vec<T> = rows.filter(|row| self.matches(row)).cloned().collect();
        if let Some(sort) = &self.sort {
            result.sort_by(|a, b| sort(a, b));
        }
        if let Some(limit) = self.limit {
            result.truncate(limit);
        }
        result
    }
}
