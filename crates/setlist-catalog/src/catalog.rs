//! Entry point screens use: one store, one client, one executor registry

use std::sync::Arc;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use setlist::behavior::{BehaviorKey, FetchStrategy};
use setlist::clock::{SharedClock, SystemClock};
use setlist::composer::{ComposedResults, merge_pair, merge_results};
use setlist::executor::{ExecutorRegistry, SharedResults};
use setlist::remote::{RequestCoordinator, Transport};
use setlist::store::{LocalStore, StoreError, TableId};
use setlist_api::RequestMetadata;
use tracing::info;

use crate::behaviors::{
    ArtistBehavior, ArtistsBehavior, BehaviorSettings, FavoriteArtistsBehavior, ShowDetail,
    ShowWithSourcesBehavior, YearShows, YearShowsBehavior, YearsBehavior, set_artist_favorite,
};
use crate::client::CatalogClient;
use crate::config::CatalogConfig;
use crate::models::{Artist, Show, Source, SourceTrack, Tour, Venue, Year};

/// Every table the catalog reads or writes
pub fn catalog_tables() -> Vec<TableId> {
    vec![
        TableId::of::<Artist>(),
        TableId::of::<Year>(),
        TableId::of::<Venue>(),
        TableId::of::<Tour>(),
        TableId::of::<Show>(),
        TableId::of::<Source>(),
        TableId::of::<SourceTrack>(),
        TableId::of::<RequestMetadata>(),
    ]
}

#[derive(Debug, Clone)]
pub struct Catalog {
    config: Arc<CatalogConfig>,
    store: LocalStore,
    client: CatalogClient,
    executors: ExecutorRegistry,
}

impl Catalog {
    pub fn new(
        config: CatalogConfig,
        transport: Arc<dyn Transport>,
        store: LocalStore,
        clock: SharedClock,
    ) -> Self {
        let coordinator = RequestCoordinator::new(
            config.engine.base_url.clone(),
            transport,
            store.clone(),
            Arc::clone(&clock),
            config.engine.rate_limit.clone(),
        );
        info!("[Catalog] using {}", coordinator.base_url());
        Self {
            config: Arc::new(config),
            client: CatalogClient::new(coordinator),
            executors: ExecutorRegistry::new(store.clone(), clock),
            store,
        }
    }

    /// Catalog on the system clock, persisted at `engine.store_path` when set
    pub fn open(config: CatalogConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let store = match &config.engine.store_path {
            Some(path) => LocalStore::open_path(path)
                .with_context(|| format!("Failed to open local store {}", path.display()))?,
            None => LocalStore::new(),
        };
        store
            .load_tables(&catalog_tables())
            .context("Failed to load catalog tables")?;
        Ok(Self::new(config, transport, store, Arc::new(SystemClock)))
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn client(&self) -> &CatalogClient {
        &self.client
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    fn settings<B>(&self, default_strategy: FetchStrategy) -> BehaviorSettings {
        self.config
            .settings_for(BehaviorKey::of::<B>("").kind(), default_strategy)
    }

    pub fn artists(&self) -> SharedResults<Vec<Artist>> {
        let settings = self.settings::<ArtistsBehavior>(FetchStrategy::StaleWhileRevalidate);
        self.executors
            .start(ArtistsBehavior::new(self.client.clone(), settings))
    }

    pub fn artist(&self, artist_uuid: &str) -> SharedResults<Option<Artist>> {
        let settings = self.settings::<ArtistBehavior>(FetchStrategy::StaleWhileRevalidate);
        self.executors
            .start(ArtistBehavior::new(self.client.clone(), settings, artist_uuid))
    }

    pub fn years(&self, artist_uuid: &str) -> SharedResults<Vec<Year>> {
        let settings = self.settings::<YearsBehavior>(FetchStrategy::StaleWhileRevalidate);
        self.executors
            .start(YearsBehavior::new(self.client.clone(), settings, artist_uuid))
    }

    pub fn year_shows(&self, artist_uuid: &str, year_uuid: &str) -> SharedResults<YearShows> {
        let settings = self.settings::<YearShowsBehavior>(FetchStrategy::StaleWhileRevalidate);
        self.executors.start(YearShowsBehavior::new(
            self.client.clone(),
            settings,
            artist_uuid,
            year_uuid,
        ))
    }

    pub fn show(&self, show_uuid: &str) -> SharedResults<ShowDetail> {
        let settings = self.settings::<ShowWithSourcesBehavior>(FetchStrategy::StaleWhileRevalidate);
        self.executors
            .start(ShowWithSourcesBehavior::new(self.client.clone(), settings, show_uuid))
    }

    pub fn favorite_artists(&self) -> SharedResults<Vec<Artist>> {
        self.executors.start(FavoriteArtistsBehavior)
    }

    pub fn set_artist_favorite(&self, artist_uuid: &str, favorite: bool) -> Result<bool, StoreError> {
        set_artist_favorite(&self.store, artist_uuid, favorite)
    }

    /// Artist header plus its years, for the artist screen
    pub fn artist_with_years(&self, artist_uuid: &str) -> ComposedResults<(Option<Artist>, Vec<Year>)> {
        merge_pair(self.artist(artist_uuid), self.years(artist_uuid))
    }

    /// Years of several artists keyed by artist uuid, in the given order
    pub fn years_of(&self, artist_uuids: &[&str]) -> ComposedResults<IndexMap<String, Vec<Year>>> {
        merge_results(
            artist_uuids
                .iter()
                .map(|uuid| (uuid.to_string(), self.years(uuid)))
                .collect(),
        )
    }
}
