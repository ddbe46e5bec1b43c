pub mod adapters;
pub mod backend;
pub mod memory;
pub mod sqlite;
pub mod types;

pub use backend::{PersistedChange, StoreBackend};
pub use memory::*;
pub use sqlite::SqliteBackend;
pub use types::*;
