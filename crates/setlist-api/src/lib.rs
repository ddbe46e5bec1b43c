use serde::{Deserialize, Serialize};

pub mod entity;
pub mod streaming;

// Re-export entity types
pub use entity::{ApiRecord, Entity, RequestMetadata};

// Re-export streaming types
pub use streaming::{NetworkResult, RequestResult};

/// Structured error type for synchronization failures.
///
/// These errors are surfaced to consumers through `NetworkResult::error`,
/// so they are cheap to clone and serializable for frontends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum SyncError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("HTTP {status} error from {url}")]
    Server { url: String, status: u16 },

    #[error("Failed to decode {resource}: {message}")]
    Decode { resource: String, message: String },

    #[error("Rate limited while requesting {resource}")]
    RateLimited { resource: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the failure came from the remote side rather than the device
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Server { .. } | Self::RateLimited { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_serialization() {
        let errors = vec![
            SyncError::network("connection reset"),
            SyncError::Server {
                url: "https://api.example.com/v3/artists".to_string(),
                status: 503,
            },
            SyncError::Decode {
                resource: "/v3/artists".to_string(),
                message: "expected array".to_string(),
            },
            SyncError::RateLimited {
                resource: "/v3/artists".to_string(),
            },
        ];

        for error in errors {
            let json = serde_json::to_string(&error).expect("Failed to serialize");
            let back: SyncError = serde_json::from_str(&json).expect("Failed to deserialize");
            assert_eq!(error, back);
        }
    }

    #[test]
    fn test_sync_error_display() {
        let err = SyncError::Server {
            url: "https://api.example.com/v2/artists".to_string(),
            status: 500,
        };
        assert_eq!(
            err.to_string(),
            "HTTP 500 error from https://api.example.com/v2/artists"
        );
        assert!(err.is_remote());
        assert!(!SyncError::internal("boom").is_remote());
    }
}
