//! Persistence seam below the local store
//!
//! The store keeps every table in memory and writes each committed
//! transaction through to a backend. Rows cross the seam as their JSON
//! serialization, keyed by table name and identifier.

use super::types::Result;

/// One row-level change of a committed transaction, in the order it was made
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistedChange {
    Upsert {
        table: &'static str,
        id: String,
        body: String,
    },
    Delete {
        table: &'static str,
        id: String,
    },
}

impl PersistedChange {
    pub fn table(&self) -> &'static str {
        match self {
            PersistedChange::Upsert { table, .. } | PersistedChange::Delete { table, .. } => table,
        }
    }
}

pub trait StoreBackend: Send + Sync {
    /// Rows of `table` in insertion order, as `(identifier, serialized row)`
    fn load_rows(&self, table: &str) -> Result<Vec<(String, String)>>;

    /// Apply every change of one transaction atomically
    fn apply(&self, changes: &[PersistedChange]) -> Result<()>;
}
