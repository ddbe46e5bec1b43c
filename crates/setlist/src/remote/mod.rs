//! Remote catalog access: transport abstraction, request coordination and
//! rate limiting

pub mod coordinator;
pub mod rate_limit;
pub mod transport;

pub use coordinator::{FetchOptions, Payload, RequestCoordinator};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use transport::{Transport, TransportError, TransportRequest, TransportResponse};
