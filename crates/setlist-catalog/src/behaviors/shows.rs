use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::Duration;
use setlist::behavior::{BehaviorKey, FetchStrategy, NetworkBackedBehavior};
use setlist::repository::Repository;
use setlist::store::{LocalStore, ReadTxn, TableId, WriteTxn};
use setlist::stream::ValueStream;
use setlist_api::{RequestResult, SyncError};
use tracing::info;

use super::BehaviorSettings;
use crate::client::CatalogClient;
use crate::models::{Show, ShowWithSourcesApi, Source, SourceTrack, SourceTrackApi, Tour, Venue};
use crate::reconcile::upsert_shows;

/// Everything the show screen displays
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShowDetail {
    pub show: Option<Show>,
    pub venue: Option<Venue>,
    pub tour: Option<Tour>,
    /// Best rated first
    pub sources: Vec<Source>,
    /// Grouped by source, in track order
    pub tracks: Vec<SourceTrack>,
}

impl ShowDetail {
    pub fn tracks_of<'a>(&'a self, source_uuid: &'a str) -> impl Iterator<Item = &'a SourceTrack> + 'a {
        self.tracks
            .iter()
            .filter(move |track| track.source_uuid == source_uuid)
    }

    fn load(txn: &ReadTxn<'_>, show_uuid: &str) -> Self {
        let show = txn.object::<Show>(show_uuid).cloned();
        let venue = show
            .as_ref()
            .and_then(|show| show.venue_uuid.as_deref())
            .and_then(|uuid| txn.object::<Venue>(uuid))
            .cloned();
        let tour = show
            .as_ref()
            .and_then(|show| show.tour_uuid.as_deref())
            .and_then(|uuid| txn.object::<Tour>(uuid))
            .cloned();

        let mut sources: Vec<Source> = txn
            .objects::<Source>()
            .filter(|source| source.show_uuid == show_uuid)
            .cloned()
            .collect();
        sources.sort_by(|a, b| {
            b.avg_rating
                .partial_cmp(&a.avg_rating)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.uuid.cmp(&b.uuid))
        });

        let mut tracks: Vec<SourceTrack> = txn
            .objects::<SourceTrack>()
            .filter(|track| track.show_uuid == show_uuid)
            .cloned()
            .collect();
        tracks.sort_by(|a, b| {
            a.source_uuid
                .cmp(&b.source_uuid)
                .then(a.track_position.cmp(&b.track_position))
        });

        Self {
            show,
            venue,
            tour,
            sources,
            tracks,
        }
    }
}

/// Show detail with its sources and their tracks. Sources and tracks of this
/// show missing from the response are deleted.
#[derive(Debug, Clone)]
pub struct ShowWithSourcesBehavior {
    client: CatalogClient,
    settings: BehaviorSettings,
    show_uuid: String,
}

impl ShowWithSourcesBehavior {
    pub fn new(client: CatalogClient, settings: BehaviorSettings, show_uuid: impl Into<String>) -> Self {
        Self {
            client,
            settings,
            show_uuid: show_uuid.into(),
        }
    }
}

#[async_trait]
impl NetworkBackedBehavior for ShowWithSourcesBehavior {
    type Local = ShowDetail;
    type Api = ShowWithSourcesApi;

    fn key(&self) -> BehaviorKey {
        BehaviorKey::of::<Self>(self.show_uuid.clone())
    }

    fn fetch_strategy(&self) -> FetchStrategy {
        self.settings.strategy
    }

    fn min_time_between_requests(&self) -> Duration {
        self.settings.min_interval
    }

    fn create_local_updating_results(&self, store: &LocalStore) -> ValueStream<ShowDetail> {
        let show_uuid = self.show_uuid.clone();
        store.computed_stream(
            &[
                TableId::of::<Show>(),
                TableId::of::<Venue>(),
                TableId::of::<Tour>(),
                TableId::of::<Source>(),
                TableId::of::<SourceTrack>(),
            ],
            move |txn| ShowDetail::load(txn, &show_uuid),
        )
    }

    fn is_local_data_showable(&self, local: &ShowDetail) -> bool {
        local.show.is_some() && !local.sources.is_empty()
    }

    async fn fetch_from_api(&self, forced_refresh: bool) -> RequestResult<ShowWithSourcesApi> {
        self.client.show(&self.show_uuid, forced_refresh).await
    }

    fn upsert(&self, txn: &mut WriteTxn<'_>, local: &ShowDetail, api: ShowWithSourcesApi) -> Result<(), SyncError> {
        upsert_shows(
            txn,
            std::slice::from_ref(&api.show),
            local.show.as_slice(),
            false,
        )?;

        let show_uuid = api.show.uuid.as_str();
        let sources = Repository::<Source>::new().upsert_multiple_with(
            txn,
            &api.sources,
            &local.sources,
            true,
            |source, _| source.show_uuid = show_uuid.to_string(),
        )?;

        let tracks: Vec<SourceTrackApi> = api
            .sources
            .iter()
            .flat_map(|source| source.sets.iter())
            .flat_map(|set| set.tracks.iter().cloned())
            .collect();
        let tracks = Repository::<SourceTrack>::new().upsert_multiple_with(
            txn,
            &tracks,
            &local.tracks,
            true,
            |track, _| track.show_uuid = show_uuid.to_string(),
        )?;

        info!(
            "[ShowWithSourcesBehavior] synced show {}: {} source(s), {} track(s), {} source(s) and {} track(s) deleted",
            show_uuid,
            sources.created.len() + sources.updated.len(),
            tracks.created.len() + tracks.updated.len(),
            sources.deleted.len(),
            tracks.deleted.len()
        );
        Ok(())
    }
}
