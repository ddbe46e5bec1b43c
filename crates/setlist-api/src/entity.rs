//! Entity traits shared by the local store, the reconciler and providers.
//!
//! - `Entity`: a row in the local store, keyed by a stable identifier
//! - `ApiRecord`: a freshly fetched record from the remote catalog
//! - `RequestMetadata`: per-resource conditional-cache bookkeeping

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A persisted model living in one table of the local store.
///
/// Identifiers are opaque, stable strings (the catalog's primary key for the
/// entity type) and must be unique within a table. Rows are persisted as
/// their serde representation.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Table name, also the key rows are persisted under
    const TABLE: &'static str;

    fn id(&self) -> &str;
}

/// A record decoded from a remote payload.
///
/// Identifiers may repeat within one batch; the reconciler deduplicates them.
pub trait ApiRecord: Send + Sync {
    fn identifier(&self) -> &str;

    /// Records without a usable identifier are dropped before reconciliation
    fn has_identifier(&self) -> bool {
        !self.identifier().trim().is_empty()
    }
}

/// Conditional-cache state for one remote resource.
///
/// One row per resource URL, read and written only by the request coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub url: String,
    pub etag: Option<String>,
    pub last_request_completed_at: Option<DateTime<Utc>>,
}

impl RequestMetadata {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            etag: None,
            last_request_completed_at: None,
        }
    }
}

impl Entity for RequestMetadata {
    const TABLE: &'static str = "request_metadata";

    fn id(&self) -> &str {
        &self.url
    }
}
