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
use crate::models::{Show, ShowApi, Year, YearApi, YearWithShowsApi};
use crate::reconcile::upsert_shows;

/// Years of one artist. Years of that artist missing from the response are
/// deleted; other artists' years are left alone.
#[derive(Debug, Clone)]
pub struct YearsBehavior {
    client: CatalogClient,
    settings: BehaviorSettings,
    artist_uuid: String,
}

impl YearsBehavior {
    pub fn new(client: CatalogClient, settings: BehaviorSettings, artist_uuid: impl Into<String>) -> Self {
        Self {
            client,
            settings,
            artist_uuid: artist_uuid.into(),
        }
    }
}

#[async_trait]
impl NetworkBackedBehavior for YearsBehavior {
    type Local = Vec<Year>;
    type Api = Vec<YearApi>;

    fn key(&self) -> BehaviorKey {
        BehaviorKey::of::<Self>(self.artist_uuid.clone())
    }

    fn fetch_strategy(&self) -> FetchStrategy {
        self.settings.strategy
    }

    fn min_time_between_requests(&self) -> Duration {
        self.settings.min_interval
    }

    fn create_local_updating_results(&self, store: &LocalStore) -> ValueStream<Vec<Year>> {
        let artist_uuid = self.artist_uuid.clone();
        store.results_stream(
            Query::<Year>::all()
                .filter(move |year| year.artist_uuid == artist_uuid)
                .sort_by(|a, b| a.year.cmp(&b.year)),
        )
    }

    fn is_local_data_showable(&self, local: &Vec<Year>) -> bool {
        !local.is_empty()
    }

    async fn fetch_from_api(&self, forced_refresh: bool) -> RequestResult<Vec<YearApi>> {
        self.client.years(&self.artist_uuid, forced_refresh).await
    }

    fn upsert(&self, txn: &mut WriteTxn<'_>, local: &Vec<Year>, api: Vec<YearApi>) -> Result<(), SyncError> {
        let outcome = Repository::<Year>::new().upsert_multiple(txn, &api, local, true)?;
        info!(
            "[YearsBehavior] synced years of {}: {} created, {} updated, {} deleted",
            self.artist_uuid,
            outcome.created.len(),
            outcome.updated.len(),
            outcome.deleted.len()
        );
        Ok(())
    }
}

/// A year together with its shows, sorted by date
#[derive(Debug, Clone, Default, PartialEq)]
pub struct YearShows {
    pub year: Option<Year>,
    pub shows: Vec<Show>,
}

/// Shows of one year, with their venues and tours resolved
#[derive(Debug, Clone)]
pub struct YearShowsBehavior {
    client: CatalogClient,
    settings: BehaviorSettings,
    artist_uuid: String,
    year_uuid: String,
}

impl YearShowsBehavior {
    pub fn new(
        client: CatalogClient,
        settings: BehaviorSettings,
        artist_uuid: impl Into<String>,
        year_uuid: impl Into<String>,
    ) -> Self {
        Self {
            client,
            settings,
            artist_uuid: artist_uuid.into(),
            year_uuid: year_uuid.into(),
        }
    }
}

#[async_trait]
impl NetworkBackedBehavior for YearShowsBehavior {
    type Local = YearShows;
    type Api = YearWithShowsApi;

    fn key(&self) -> BehaviorKey {
        BehaviorKey::of::<Self>(format!("{}/{}", self.artist_uuid, self.year_uuid))
    }

    fn fetch_strategy(&self) -> FetchStrategy {
        self.settings.strategy
    }

    fn min_time_between_requests(&self) -> Duration {
        self.settings.min_interval
    }

    fn create_local_updating_results(&self, store: &LocalStore) -> ValueStream<YearShows> {
        let year = store.object_stream::<Year>(self.year_uuid.clone());
        let year_uuid = self.year_uuid.clone();
        let shows = store.results_stream(
            Query::<Show>::all()
                .filter(move |show| show.year_uuid.as_deref() == Some(year_uuid.as_str()))
                .sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.uuid.cmp(&b.uuid))),
        );

        let combined = ValueStream::combine(&year, &shows, |year: &Option<Year>, shows: &Vec<Show>| YearShows {
            year: year.clone(),
            shows: shows.clone(),
        });
        // The combined stream only holds its inputs weakly
        combined.on_teardown(move || {
            year.teardown();
            shows.teardown();
        });
        combined
    }

    fn is_local_data_showable(&self, local: &YearShows) -> bool {
        local.year.is_some() && !local.shows.is_empty()
    }

    async fn fetch_from_api(&self, forced_refresh: bool) -> RequestResult<YearWithShowsApi> {
        self.client
            .year(&self.artist_uuid, &self.year_uuid, forced_refresh)
            .await
    }

    fn upsert(&self, txn: &mut WriteTxn<'_>, local: &YearShows, api: YearWithShowsApi) -> Result<(), SyncError> {
        Repository::<Year>::new().upsert(txn, &api.year, local.year.as_ref())?;

        // Shows listed under a year belong to it even when the payload omits the id
        let shows: Vec<ShowApi> = api
            .shows
            .into_iter()
            .map(|mut show| {
                if show.year_uuid.is_none() {
                    show.year_uuid = Some(self.year_uuid.clone());
                }
                show
            })
            .collect();
        let outcome = upsert_shows(txn, &shows, &local.shows, true)?;
        info!(
            "[YearShowsBehavior] synced year {}: {} created, {} updated, {} deleted",
            self.year_uuid,
            outcome.created.len(),
            outcome.updated.len(),
            outcome.deleted.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use setlist::behavior::{ActiveBehavior, RefreshOutcome};

    use super::*;
    use crate::behaviors::testing::harness;
    use crate::fake::fixtures;
    use crate::models::Venue;

    #[tokio::test]
    async fn test_years_deletes_scoped_to_artist() {
        let h = harness();
        h.transport
            .serve_years(
                "dead",
                &[
                    fixtures::year("dead-1977", "dead", "1977"),
                    fixtures::year("dead-1972", "dead", "1972"),
                ],
            )
            .unwrap();
        h.store
            .write(|txn| {
                Repository::<Year>::new().upsert_multiple(
                    txn,
                    &[fixtures::year("phish-1997", "phish", "1997")],
                    &[],
                    false,
                )
            })
            .unwrap();

        let behavior = YearsBehavior::new(
            h.client.clone(),
            BehaviorSettings::new(FetchStrategy::NetworkAlwaysFirst),
            "dead",
        );
        let active = ActiveBehavior::new(behavior, h.store.clone(), Arc::new(h.clock.clone()));
        active.start();

        assert_eq!(active.refresh(false).await, RefreshOutcome::Updated);
        let years: Vec<String> = active.current().unwrap().data.into_iter().map(|y| y.year).collect();
        assert_eq!(years, vec!["1972", "1977"]);

        h.transport.serve_years("dead", &[]).unwrap();
        assert_eq!(active.refresh(false).await, RefreshOutcome::Updated);
        assert!(active.current().unwrap().data.is_empty());
        assert!(h.store.object::<Year>("phish-1997").is_some());
    }

    #[tokio::test]
    async fn test_year_shows_resolves_venues_and_removes_dropped_shows() {
        let h = harness();
        let venue = fixtures::venue("barton", "Barton Hall");
        let mut unassigned = fixtures::show("show-2", "dead", "dead-1977", None, None);
        unassigned.year_uuid = None;
        unassigned.date = chrono::NaiveDate::from_ymd_opt(1977, 5, 9).unwrap();
        h.transport
            .serve_year(&YearWithShowsApi {
                year: fixtures::year("dead-1977", "dead", "1977"),
                shows: vec![
                    unassigned,
                    fixtures::show("show-1", "dead", "dead-1977", Some(venue), None),
                ],
            })
            .unwrap();

        let behavior = YearShowsBehavior::new(
            h.client.clone(),
            BehaviorSettings::default(),
            "dead",
            "dead-1977",
        );
        let active = ActiveBehavior::new(behavior, h.store.clone(), Arc::new(h.clock.clone()));
        active.start();
        let initial = active.current().unwrap().data;
        assert_eq!(initial, YearShows::default());

        assert_eq!(active.refresh(false).await, RefreshOutcome::Updated);
        let loaded = active.current().unwrap().data;
        assert_eq!(loaded.year.as_ref().unwrap().year, "1977");
        let shows: Vec<&str> = loaded.shows.iter().map(|s| s.uuid.as_str()).collect();
        assert_eq!(shows, vec!["show-1", "show-2"]);
        assert_eq!(loaded.shows[0].venue_uuid.as_deref(), Some("barton"));
        assert!(h.store.object::<Venue>("barton").is_some());

        h.transport
            .serve_year(&YearWithShowsApi {
                year: fixtures::year("dead-1977", "dead", "1977"),
                shows: vec![fixtures::show("show-1", "dead", "dead-1977", None, None)],
            })
            .unwrap();
        assert_eq!(active.refresh(true).await, RefreshOutcome::Updated);
        let shows = active.current().unwrap().data.shows;
        assert_eq!(shows.len(), 1);
        // No venue in the payload: the resolved venue stays attached
        assert_eq!(shows[0].venue_uuid.as_deref(), Some("barton"));
    }

    #[tokio::test]
    async fn test_teardown_releases_both_inputs() {
        let h = harness();
        let behavior = YearShowsBehavior::new(h.client.clone(), BehaviorSettings::default(), "dead", "y");
        let active = ActiveBehavior::new(behavior, h.store.clone(), Arc::new(h.clock.clone()));
        active.start();
        assert_eq!(h.store.observer_count(), 2);

        active.tear_down();
        assert_eq!(h.store.observer_count(), 0);
    }
}
