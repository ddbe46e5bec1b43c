use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// One GET against the catalog service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub url: String,
    /// Sent as `If-None-Match` when present
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportResponse {
    Ok { body: Value, etag: Option<String> },
    NotModified,
    Status { code: u16, body: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("No network connection")]
    Offline,

    #[error("Request failed: {0}")]
    Failed(String),
}

/// The wire below the request coordinator. Implementations perform the actual
/// request; caching, deduplication and rate limiting happen above them.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}
