use async_trait::async_trait;
use chrono::Duration;
use setlist::behavior::{BehaviorKey, FetchStrategy, NetworkBackedBehavior};
use setlist::repository::Repository;
use setlist::store::{LocalStore, Query, WriteTxn};
use setlist::stream::ValueStream;
use setlist_api::{RequestResult, SyncError};
use tracing::info;

use super::BehaviorSettings;
use crate::client::CatalogClient;
use crate::models::{Artist, ArtistApi};

/// Every artist of the catalog, sorted by sort name. The remote list is
/// authoritative: artists it no longer returns are deleted.
#[derive(Debug, Clone)]
pub struct ArtistsBehavior {
    client: CatalogClient,
    settings: BehaviorSettings,
}

impl ArtistsBehavior {
    pub fn new(client: CatalogClient, settings: BehaviorSettings) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl NetworkBackedBehavior for ArtistsBehavior {
    type Local = Vec<Artist>;
    type Api = Vec<ArtistApi>;

    fn key(&self) -> BehaviorKey {
        BehaviorKey::of::<Self>("")
    }

    fn fetch_strategy(&self) -> FetchStrategy {
        self.settings.strategy
    }

    fn min_time_between_requests(&self) -> Duration {
        self.settings.min_interval
    }

    fn create_local_updating_results(&self, store: &LocalStore) -> ValueStream<Vec<Artist>> {
        store.results_stream(Query::<Artist>::all().sort_by(|a, b| a.sort_name.cmp(&b.sort_name)))
    }

    fn is_local_data_showable(&self, local: &Vec<Artist>) -> bool {
        !local.is_empty()
    }

    async fn fetch_from_api(&self, forced_refresh: bool) -> RequestResult<Vec<ArtistApi>> {
        self.client.artists(forced_refresh).await
    }

    fn upsert(&self, txn: &mut WriteTxn<'_>, local: &Vec<Artist>, api: Vec<ArtistApi>) -> Result<(), SyncError> {
        let outcome = Repository::<Artist>::new().upsert_multiple(txn, &api, local, true)?;
        info!(
            "[ArtistsBehavior] synced artists: {} created, {} updated, {} deleted",
            outcome.created.len(),
            outcome.updated.len(),
            outcome.deleted.len()
        );
        Ok(())
    }
}

/// A single artist
#[derive(Debug, Clone)]
pub struct ArtistBehavior {
    client: CatalogClient,
    settings: BehaviorSettings,
    artist_uuid: String,
}

impl ArtistBehavior {
    pub fn new(client: CatalogClient, settings: BehaviorSettings, artist_uuid: impl Into<String>) -> Self {
        Self {
            client,
            settings,
            artist_uuid: artist_uuid.into(),
        }
    }
}

#[async_trait]
impl NetworkBackedBehavior for ArtistBehavior {
    type Local = Option<Artist>;
    type Api = ArtistApi;

    fn key(&self) -> BehaviorKey {
        BehaviorKey::of::<Self>(self.artist_uuid.clone())
    }

    fn fetch_strategy(&self) -> FetchStrategy {
        self.settings.strategy
    }

    fn min_time_between_requests(&self) -> Duration {
        self.settings.min_interval
    }

    fn create_local_updating_results(&self, store: &LocalStore) -> ValueStream<Option<Artist>> {
        store.object_stream(self.artist_uuid.clone())
    }

    fn is_local_data_showable(&self, local: &Option<Artist>) -> bool {
        local.is_some()
    }

    async fn fetch_from_api(&self, forced_refresh: bool) -> RequestResult<ArtistApi> {
        self.client.artist(&self.artist_uuid, forced_refresh).await
    }

    fn upsert(&self, txn: &mut WriteTxn<'_>, local: &Option<Artist>, api: ArtistApi) -> Result<(), SyncError> {
        Repository::<Artist>::new().upsert(txn, &api, local.as_ref())?;
        Ok(())
    }
}
