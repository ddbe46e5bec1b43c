//! The network-backed behaviors screens start through the catalog

mod artists;
mod favorites;
mod shows;
mod years;

pub use artists::{ArtistBehavior, ArtistsBehavior};
pub use favorites::{FavoriteArtistsBehavior, set_artist_favorite};
pub use shows::{ShowDetail, ShowWithSourcesBehavior};
pub use years::{YearShows, YearShowsBehavior, YearsBehavior};

use chrono::Duration;
use setlist::behavior::{FetchStrategy, default_min_interval};

/// Fetch strategy and throttle of one behavior instance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BehaviorSettings {
    pub strategy: FetchStrategy,
    pub min_interval: Duration,
}

impl BehaviorSettings {
    pub fn new(strategy: FetchStrategy) -> Self {
        Self {
            strategy,
            min_interval: default_min_interval(),
        }
    }
}

impl Default for BehaviorSettings {
    fn default() -> Self {
        Self::new(FetchStrategy::StaleWhileRevalidate)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use setlist::clock::ManualClock;
    use setlist::store::LocalStore;

    use crate::client::CatalogClient;
    use crate::fake::FakeCatalogTransport;

    pub(crate) struct Harness {
        pub transport: Arc<FakeCatalogTransport>,
        pub store: LocalStore,
        pub clock: ManualClock,
        pub client: CatalogClient,
    }

    pub(crate) fn harness() -> Harness {
        let transport = Arc::new(FakeCatalogTransport::new("http://catalog.test/api"));
        let store = LocalStore::new();
        let clock = ManualClock::default();
        let client = transport.client(&store, Arc::new(clock.clone()));
        Harness {
            transport,
            store,
            clock,
            client,
        }
    }
}
