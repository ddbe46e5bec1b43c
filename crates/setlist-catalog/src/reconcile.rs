//! Reconciliation rules for catalog models, and relationship resolution
//!
//! `update_from_api` copies remote scalars only. Relationship ids of shows are
//! set by `attach_show_relationships` after `resolve_venues`/`resolve_tours`
//! have stored the related records. Ids that match no stored record are not
//! attached.

use std::collections::HashSet;

use indexmap::IndexMap;
use setlist::repository::{Reconcile, Repository, UpsertOutcome};
use setlist::store::{Result, WriteTxn};
use setlist_api::ApiRecord;
use tracing::debug;

use crate::models::*;

impl Reconcile for Artist {
    type Api = ArtistApi;

    fn create_from_api(api: &ArtistApi) -> Self {
        Artist {
            uuid: api.uuid.clone(),
            name: api.name.clone(),
            slug: api.slug.clone(),
            sort_name: api.sort_name.clone(),
            featured: api.featured != 0,
            show_count: api.show_count,
            source_count: api.source_count,
            updated_at: api.updated_at,
            is_favorite: false,
        }
    }

    fn update_from_api(&mut self, api: &ArtistApi) {
        self.name = api.name.clone();
        self.slug = api.slug.clone();
        self.sort_name = api.sort_name.clone();
        self.featured = api.featured != 0;
        self.show_count = api.show_count;
        self.source_count = api.source_count;
        self.updated_at = api.updated_at;
    }
}

impl Reconcile for Year {
    type Api = YearApi;

    fn create_from_api(api: &YearApi) -> Self {
        Year {
            uuid: api.uuid.clone(),
            artist_uuid: api.artist_uuid.clone(),
            year: api.year.clone(),
            show_count: api.show_count,
            source_count: api.source_count,
            duration: api.duration,
            avg_rating: api.avg_rating,
            avg_duration: api.avg_duration,
            updated_at: api.updated_at,
        }
    }

    fn update_from_api(&mut self, api: &YearApi) {
        self.year = api.year.clone();
        self.show_count = api.show_count;
        self.source_count = api.source_count;
        self.duration = api.duration;
        self.avg_rating = api.avg_rating;
        self.avg_duration = api.avg_duration;
        self.updated_at = api.updated_at;
    }
}

impl Reconcile for Venue {
    type Api = VenueApi;

    fn create_from_api(api: &VenueApi) -> Self {
        Venue {
            uuid: api.uuid.clone(),
            artist_uuid: api.artist_uuid.clone(),
            name: api.name.clone(),
            location: api.location.clone(),
            slug: api.slug.clone(),
            latitude: api.latitude,
            longitude: api.longitude,
            past_names: api.past_names.clone(),
            shows_at_venue: api.shows_at_venue,
            updated_at: api.updated_at,
        }
    }

    fn update_from_api(&mut self, api: &VenueApi) {
        self.name = api.name.clone();
        self.location = api.location.clone();
        self.slug = api.slug.clone();
        self.latitude = api.latitude;
        self.longitude = api.longitude;
        self.past_names = api.past_names.clone();
        self.shows_at_venue = api.shows_at_venue;
        self.updated_at = api.updated_at;
    }
}

impl Reconcile for Tour {
    type Api = TourApi;

    fn create_from_api(api: &TourApi) -> Self {
        Tour {
            uuid: api.uuid.clone(),
            artist_uuid: api.artist_uuid.clone(),
            name: api.name.clone(),
            slug: api.slug.clone(),
            start_date: api.start_date,
            end_date: api.end_date,
            updated_at: api.updated_at,
        }
    }

    fn update_from_api(&mut self, api: &TourApi) {
        self.name = api.name.clone();
        self.slug = api.slug.clone();
        self.start_date = api.start_date;
        self.end_date = api.end_date;
        self.updated_at = api.updated_at;
    }
}

impl Reconcile for Show {
    type Api = ShowApi;

    fn create_from_api(api: &ShowApi) -> Self {
        Show {
            uuid: api.uuid.clone(),
            artist_uuid: api.artist_uuid.clone(),
            year_uuid: api.year_uuid.clone(),
            venue_uuid: None,
            tour_uuid: None,
            display_date: api.display_date.clone(),
            date: api.date,
            avg_rating: api.avg_rating,
            avg_duration: api.avg_duration,
            has_soundboard_source: api.has_soundboard_source,
            source_count: api.source_count,
            most_recent_source_updated_at: api.most_recent_source_updated_at,
            updated_at: api.updated_at,
            is_favorite: false,
        }
    }

    fn update_from_api(&mut self, api: &ShowApi) {
        if api.year_uuid.is_some() {
            self.year_uuid = api.year_uuid.clone();
        }
        self.display_date = api.display_date.clone();
        self.date = api.date;
        self.avg_rating = api.avg_rating;
        self.avg_duration = api.avg_duration;
        self.has_soundboard_source = api.has_soundboard_source;
        self.source_count = api.source_count;
        self.most_recent_source_updated_at = api.most_recent_source_updated_at;
        self.updated_at = api.updated_at;
    }
}

impl Reconcile for Source {
    type Api = SourceApi;

    /// `show_uuid` is filled in by the caller through `attach`
    fn create_from_api(api: &SourceApi) -> Self {
        Source {
            uuid: api.uuid.clone(),
            show_uuid: String::new(),
            artist_uuid: api.artist_uuid.clone(),
            is_soundboard: api.is_soundboard,
            is_remaster: api.is_remaster,
            avg_rating: api.avg_rating,
            num_ratings: api.num_ratings,
            duration: api.duration,
            taper: api.taper.clone(),
            transferrer: api.transferrer.clone(),
            lineage: api.lineage.clone(),
            description: api.description.clone(),
            updated_at: api.updated_at,
            is_favorite: false,
        }
    }

    fn update_from_api(&mut self, api: &SourceApi) {
        self.is_soundboard = api.is_soundboard;
        self.is_remaster = api.is_remaster;
        self.avg_rating = api.avg_rating;
        self.num_ratings = api.num_ratings;
        self.duration = api.duration;
        self.taper = api.taper.clone();
        self.transferrer = api.transferrer.clone();
        self.lineage = api.lineage.clone();
        self.description = api.description.clone();
        self.updated_at = api.updated_at;
    }
}

impl Reconcile for SourceTrack {
    type Api = SourceTrackApi;

    fn create_from_api(api: &SourceTrackApi) -> Self {
        SourceTrack {
            uuid: api.uuid.clone(),
            source_uuid: api.source_uuid.clone(),
            show_uuid: String::new(),
            artist_uuid: api.artist_uuid.clone(),
            track_position: api.track_position,
            title: api.title.clone(),
            duration: api.duration,
            mp3_url: api.mp3_url.clone(),
            updated_at: api.updated_at,
        }
    }

    fn update_from_api(&mut self, api: &SourceTrackApi) {
        self.source_uuid = api.source_uuid.clone();
        self.track_position = api.track_position;
        self.title = api.title.clone();
        self.duration = api.duration;
        self.mp3_url = api.mp3_url.clone();
        self.updated_at = api.updated_at;
    }
}

/// Pass one for venues: look up or create every venue embedded in `shows`.
/// Never deletes.
pub fn resolve_venues(txn: &mut WriteTxn<'_>, shows: &[ShowApi]) -> Result<UpsertOutcome<Venue>> {
    let venues = collect_unique(shows.iter().filter_map(|show| show.venue.as_ref()));
    Repository::<Venue>::new().upsert_multiple(txn, &venues, &[], false)
}

/// Pass one for tours, as `resolve_venues`
pub fn resolve_tours(txn: &mut WriteTxn<'_>, shows: &[ShowApi]) -> Result<UpsertOutcome<Tour>> {
    let tours = collect_unique(shows.iter().filter_map(|show| show.tour.as_ref()));
    Repository::<Tour>::new().upsert_multiple(txn, &tours, &[], false)
}

fn collect_unique<'a, A>(records: impl Iterator<Item = &'a A>) -> Vec<A>
where
    A: ApiRecord + Clone + 'a,
{
    let mut unique: IndexMap<String, A> = IndexMap::new();
    for record in records {
        unique.insert(record.identifier().to_string(), record.clone());
    }
    unique.into_values().collect()
}

/// Venue and tour ids referenced by a batch of shows that exist in the store
#[derive(Debug, Default)]
pub struct ResolvedRelations {
    venues: HashSet<String>,
    tours: HashSet<String>,
}

impl ResolvedRelations {
    /// Run after pass one, so embedded records are already stored
    pub fn lookup(txn: &WriteTxn<'_>, shows: &[ShowApi]) -> Self {
        let mut resolved = Self::default();
        for show in shows {
            if let Some(uuid) = show.resolved_venue_uuid() {
                if txn.get::<Venue>(uuid).is_some() {
                    resolved.venues.insert(uuid.to_string());
                }
            }
            if let Some(uuid) = show.resolved_tour_uuid() {
                if txn.get::<Tour>(uuid).is_some() {
                    resolved.tours.insert(uuid.to_string());
                }
            }
        }
        resolved
    }
}

/// Pass two: point a reconciled show at its resolved venue and tour.
///
/// An id supplied by the server replaces the stored one; a payload without
/// relationship information, or naming a record that is not stored, leaves
/// the stored ids alone.
pub fn attach_show_relationships(show: &mut Show, api: &ShowApi, resolved: &ResolvedRelations) {
    if let Some(venue_uuid) = api.resolved_venue_uuid() {
        if !resolved.venues.contains(venue_uuid) {
            debug!("show {} references unknown venue {}", show.uuid, venue_uuid);
        } else if show.venue_uuid.as_deref() != Some(venue_uuid) {
            show.venue_uuid = Some(venue_uuid.to_string());
        }
    }
    if let Some(tour_uuid) = api.resolved_tour_uuid() {
        if !resolved.tours.contains(tour_uuid) {
            debug!("show {} references unknown tour {}", show.uuid, tour_uuid);
        } else if show.tour_uuid.as_deref() != Some(tour_uuid) {
            show.tour_uuid = Some(tour_uuid.to_string());
        }
    }
}

/// Reconcile shows with their venues and tours in one go (both passes).
/// With `perform_deletes`, shows of `local` missing from `shows` are removed.
pub fn upsert_shows(
    txn: &mut WriteTxn<'_>,
    shows: &[ShowApi],
    local: &[Show],
    perform_deletes: bool,
) -> Result<UpsertOutcome<Show>> {
    resolve_venues(txn, shows)?;
    resolve_tours(txn, shows)?;
    let resolved = ResolvedRelations::lookup(txn, shows);
    Repository::<Show>::new().upsert_multiple_with(
        txn,
        shows,
        local,
        perform_deletes,
        |show, api| attach_show_relationships(show, api, &resolved),
    )
}

#[cfg(test)]
mod tests {
    use setlist::store::{LocalStore, StoreError};

    use super::*;
    use crate::fake::fixtures;

    #[test]
    fn test_user_state_survives_update() {
        let store = LocalStore::new();
        let artist = fixtures::artist("artist-1", "Grateful Dead");
        store
            .write(|txn| Repository::<Artist>::new().upsert(txn, &artist, None))
            .unwrap();
        store
            .write(|txn| Ok::<_, StoreError>(txn.update::<Artist>("artist-1", |a| a.is_favorite = true)))
            .unwrap();

        let mut renamed = artist.clone();
        renamed.name = "The Grateful Dead".to_string();
        let local = store.object::<Artist>("artist-1");
        store
            .write(|txn| Repository::<Artist>::new().upsert(txn, &renamed, local.as_ref()))
            .unwrap();

        let stored = store.object::<Artist>("artist-1").unwrap();
        assert_eq!(stored.name, "The Grateful Dead");
        assert!(stored.is_favorite);
    }

    #[test]
    fn test_shows_resolve_shared_venue_once() {
        let store = LocalStore::new();
        let venue = fixtures::venue("venue-1", "Barton Hall");
        let shows = vec![
            fixtures::show("show-1", "artist-1", "year-1", Some(venue.clone()), None),
            fixtures::show("show-2", "artist-1", "year-1", Some(venue), None),
        ];

        store.write(|txn| upsert_shows(txn, &shows, &[], false)).unwrap();

        assert_eq!(store.count::<Venue>(), 1);
        assert_eq!(store.count::<Show>(), 2);
        let show = store.object::<Show>("show-2").unwrap();
        assert_eq!(show.venue_uuid.as_deref(), Some("venue-1"));
    }

    #[test]
    fn test_relationship_overwritten_when_server_moves_show() {
        let store = LocalStore::new();
        let first = fixtures::show(
            "show-1",
            "artist-1",
            "year-1",
            Some(fixtures::venue("venue-1", "Old Venue")),
            Some(fixtures::tour("tour-1", "Spring")),
        );
        store.write(|txn| upsert_shows(txn, &[first], &[], false)).unwrap();

        let moved = fixtures::show(
            "show-1",
            "artist-1",
            "year-1",
            Some(fixtures::venue("venue-2", "New Venue")),
            None,
        );
        let local = store.objects::<Show>();
        store.write(|txn| upsert_shows(txn, &[moved], &local, false)).unwrap();

        let show = store.object::<Show>("show-1").unwrap();
        assert_eq!(show.venue_uuid.as_deref(), Some("venue-2"));
        // No tour information in the payload: the stored tour stays
        assert_eq!(show.tour_uuid.as_deref(), Some("tour-1"));
        // Venues are never deleted by show reconciliation
        assert_eq!(store.count::<Venue>(), 2);
    }

    #[test]
    fn test_bare_id_attached_only_when_record_is_stored() {
        let store = LocalStore::new();
        let seed = fixtures::show(
            "seed",
            "artist-1",
            "year-1",
            Some(fixtures::venue("venue-1", "Barton Hall")),
            None,
        );
        store.write(|txn| resolve_venues(txn, &[seed])).unwrap();

        let mut known = fixtures::show("show-1", "artist-1", "year-1", None, None);
        known.venue_uuid = Some("venue-1".to_string());
        let mut dangling = fixtures::show("show-2", "artist-1", "year-1", None, None);
        dangling.venue_uuid = Some("venue-404".to_string());
        dangling.tour_uuid = Some("tour-404".to_string());

        store
            .write(|txn| upsert_shows(txn, &[known, dangling], &[], false))
            .unwrap();

        let known = store.object::<Show>("show-1").unwrap();
        assert_eq!(known.venue_uuid.as_deref(), Some("venue-1"));
        let dangling = store.object::<Show>("show-2").unwrap();
        assert_eq!(dangling.venue_uuid, None);
        assert_eq!(dangling.tour_uuid, None);
        assert_eq!(store.count::<Venue>(), 1);
    }
}
