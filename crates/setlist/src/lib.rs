pub mod behavior;
pub mod clock;
pub mod composer;
pub mod config;
pub mod executor;
pub mod remote;
pub mod repository;
pub mod store;
pub mod stream;
pub mod telemetry;

pub use behavior::{
    ActiveBehavior, BehaviorKey, FetchContext, FetchStrategy, NetworkBackedBehavior, Refresh,
    RefreshOutcome,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use composer::{ComposedResults, ResultSource, merge_pair, merge_results};
pub use config::{EngineConfig, LoggingConfig};
pub use executor::{ExecutorRegistry, SharedResults};
pub use remote::{FetchOptions, RequestCoordinator, Transport};
pub use repository::{Reconcile, Repository, UpsertOutcome};
pub use store::{
    LocalStore, Query, ReadTxn, SqliteBackend, StoreBackend, StoreError, TableId, WriteTxn,
};
pub use stream::{ListenerHandle, ValueStream};

pub use setlist_api::{ApiRecord, Entity, NetworkResult, RequestMetadata, RequestResult, SyncError};
