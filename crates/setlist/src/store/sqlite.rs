//! SQLite persistence for the local store
//!
//! A single `entity_rows` table holds every store table. Row order is the
//! SQLite rowid, so replacing a row keeps its position and re-inserting a
//! deleted row appends it, the same as the in-memory tables.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, params};
use tracing::{debug, info};

use super::backend::{PersistedChange, StoreBackend};
use super::types::{Result, StoreError};
use crate::stream::lock;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entity_rows (
    tbl  TEXT NOT NULL,
    id   TEXT NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (tbl, id)
);
";

const UPSERT: &str = "
INSERT INTO entity_rows (tbl, id, body) VALUES (?1, ?2, ?3)
ON CONFLICT (tbl, id) DO UPDATE SET body = excluded.body
";

const DELETE: &str = "DELETE FROM entity_rows WHERE tbl = ?1 AND id = ?2";

const SELECT: &str = "SELECT id, body FROM entity_rows WHERE tbl = ?1 ORDER BY rowid";

fn backend_error(err: rusqlite::Error) -> StoreError {
    StoreError::Backend {
        message: err.to_string(),
    }
}

#[derive(Debug)]
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteBackend {
    /// Open or create the database file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(backend_error)?;
        info!("[SqliteBackend] opened {}", path.display());
        Self::init(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(backend_error)?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(backend_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl StoreBackend for SqliteBackend {
    fn load_rows(&self, table: &str) -> Result<Vec<(String, String)>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare_cached(SELECT).map_err(backend_error)?;
        let rows = stmt
            .query_map([table], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(backend_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend_error)?;
        debug!("[SqliteBackend] loaded {} rows from {}", rows.len(), table);
        Ok(rows)
    }

    fn apply(&self, changes: &[PersistedChange]) -> Result<()> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction().map_err(backend_error)?;
        for change in changes {
            match change {
                PersistedChange::Upsert { table, id, body } => {
                    tx.execute(UPSERT, params![table, id, body])
                        .map_err(backend_error)?;
                }
                PersistedChange::Delete { table, id } => {
                    tx.execute(DELETE, params![table, id])
                        .map_err(backend_error)?;
                }
            }
        }
        tx.commit().map_err(backend_error)?;
        debug!("[SqliteBackend] applied {} changes", changes.len());
        Ok(())
    }
}
