use serde::{Deserialize, Serialize};

use crate::SyncError;

/// Outcome of a call to the remote catalog.
///
/// Remote calls never raise across this boundary: every failure mode is a
/// variant here. `NotModified` and `Offline` carry no payload and mean
/// "nothing to reconcile".
#[derive(Debug, Clone, PartialEq)]
pub enum RequestResult<T> {
    /// Fresh payload from the server
    Success(T),
    /// The conditional-cache token matched; local data is current
    NotModified,
    /// No connectivity, or the request was not attempted
    Offline,
    /// Transport, server or decode failure
    Failed(SyncError),
}

impl<T> RequestResult<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RequestResult<U> {
        match self {
            Self::Success(value) => RequestResult::Success(f(value)),
            Self::NotModified => RequestResult::NotModified,
            Self::Offline => RequestResult::Offline,
            Self::Failed(err) => RequestResult::Failed(err),
        }
    }

    /// Like `map`, for conversions that can themselves fail (e.g. decoding)
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Result<U, SyncError>) -> RequestResult<U> {
        match self {
            Self::Success(value) => match f(value) {
                Ok(mapped) => RequestResult::Success(mapped),
                Err(err) => RequestResult::Failed(err),
            },
            Self::NotModified => RequestResult::NotModified,
            Self::Offline => RequestResult::Offline,
            Self::Failed(err) => RequestResult::Failed(err),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Consumer-facing view of a synchronized query.
///
/// `data` is always the local store's current answer; network activity only
/// toggles `is_network_loading` and `error`. An error next to showable data is
/// a soft failure, the data stays authoritative until a later fetch succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkResult<T> {
    pub data: T,
    pub is_network_loading: bool,
    pub error: Option<SyncError>,
}

impl<T> NetworkResult<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            is_network_loading: false,
            error: None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> NetworkResult<U> {
        NetworkResult {
            data: f(self.data),
            is_network_loading: self.is_network_loading,
            error: self.error,
        }
    }
}
