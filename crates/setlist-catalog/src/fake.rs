//! Fake catalog service for offline mode and tests
//!
//! `FakeCatalogTransport` serves JSON bodies registered per path:
//! - every registered body gets a version; its etag is `"v{version}"`
//! - a request carrying the current etag is answered 304
//! - failures can be queued, and the whole service can be taken offline
//! - requests are counted per path

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use setlist::clock::SharedClock;
use setlist::remote::{
    RateLimitConfig, RequestCoordinator, Transport, TransportError, TransportRequest,
    TransportResponse,
};
use setlist::store::LocalStore;
use tracing::debug;

use crate::client::CatalogClient;
use crate::models::{ArtistApi, ShowWithSourcesApi, YearApi, YearWithShowsApi};

/// A queued failure, consumed by the next request
#[derive(Debug, Clone, PartialEq)]
pub enum FakeFailure {
    Status(u16),
    Network(String),
    Offline,
}

#[derive(Debug)]
struct Route {
    body: Value,
    version: u64,
}

#[derive(Debug, Default)]
struct FakeState {
    routes: HashMap<String, Route>,
    next_version: u64,
    offline: bool,
    failures: VecDeque<FakeFailure>,
    requests: HashMap<String, usize>,
    delay: Option<Duration>,
}

#[derive(Debug)]
pub struct FakeCatalogTransport {
    base_url: String,
    state: Mutex<FakeState>,
}

impl FakeCatalogTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Catalog client talking to this transport, with default rate limits
    pub fn client(self: &Arc<Self>, store: &LocalStore, clock: SharedClock) -> CatalogClient {
        let coordinator = RequestCoordinator::new(
            self.base_url.clone(),
            Arc::clone(self) as Arc<dyn Transport>,
            store.clone(),
            clock,
            RateLimitConfig::default(),
        );
        CatalogClient::new(coordinator)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Serve `body` at `path`, replacing any previous body and changing its etag
    pub fn set_route(&self, path: &str, body: Value) {
        let mut state = self.state();
        state.next_version += 1;
        let version = state.next_version;
        state.routes.insert(path.to_string(), Route { body, version });
    }

    pub fn remove_route(&self, path: &str) {
        self.state().routes.remove(path);
    }

    pub fn serve<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        self.set_route(path, serde_json::to_value(body)?);
        Ok(())
    }

    pub fn serve_artists(&self, artists: &[ArtistApi]) -> Result<()> {
        self.serve(&CatalogClient::artists_path(), artists)
    }

    pub fn serve_artist(&self, artist: &ArtistApi) -> Result<()> {
        self.serve(&CatalogClient::artist_path(&artist.uuid), artist)
    }

    pub fn serve_years(&self, artist_uuid: &str, years: &[YearApi]) -> Result<()> {
        self.serve(&CatalogClient::years_path(artist_uuid), years)
    }

    pub fn serve_year(&self, year: &YearWithShowsApi) -> Result<()> {
        let mut body = serde_json::to_value(&year.year)?;
        body["shows"] = serde_json::to_value(&year.shows)?;
        self.set_route(
            &CatalogClient::year_path(&year.year.artist_uuid, &year.year.uuid),
            body,
        );
        Ok(())
    }

    pub fn serve_show(&self, show: &ShowWithSourcesApi) -> Result<()> {
        let mut body = serde_json::to_value(&show.show)?;
        body["sources"] = serde_json::to_value(&show.sources)?;
        self.set_route(&CatalogClient::show_path(&show.show.uuid), body);
        Ok(())
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn fail_next(&self, failure: FakeFailure) {
        self.state().failures.push_back(failure);
    }

    /// Delay every response, to keep requests in flight
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state().delay = delay;
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.state().requests.get(path).copied().unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.state().requests.values().sum()
    }

    fn path_of<'a>(&self, url: &'a str) -> &'a str {
        url.strip_prefix(self.base_url.as_str()).unwrap_or(url)
    }
}

#[async_trait]
impl Transport for FakeCatalogTransport {
    async fn get(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError> {
        let path = self.path_of(&request.url).to_string();
        let delay = {
            let mut state = self.state();
            *state.requests.entry(path.clone()).or_insert(0) += 1;
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(failure) = state.failures.pop_front() {
            debug!("[FakeCatalog] failing {} with {:?}", path, failure);
            return match failure {
                FakeFailure::Status(code) => Ok(TransportResponse::Status {
                    code,
                    body: format!("injected failure for {}", path),
                }),
                FakeFailure::Network(message) => Err(TransportError::Failed(message)),
                FakeFailure::Offline => Err(TransportError::Offline),
            };
        }
        if state.offline {
            return Err(TransportError::Offline);
        }
        let Some(route) = state.routes.get(&path) else {
            return Ok(TransportResponse::Status {
                code: 404,
                body: format!("no route for {}", path),
            });
        };

        let etag = format!("\"v{}\"", route.version);
        if request.etag.as_deref() == Some(etag.as_str()) {
            return Ok(TransportResponse::NotModified);
        }
        Ok(TransportResponse::Ok {
            body: route.body.clone(),
            etag: Some(etag),
        })
    }
}

/// Builders for API records with plausible defaults
pub mod fixtures {
    use chrono::{DateTime, NaiveDate, Utc};

    use crate::models::*;

    pub fn timestamp() -> DateTime<Utc> {
        DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default()
    }

    pub fn artist(uuid: &str, name: &str) -> ArtistApi {
        ArtistApi {
            uuid: uuid.to_string(),
            name: name.to_string(),
            slug: name.to_lowercase().replace(' ', "-"),
            sort_name: name.to_string(),
            featured: 0,
            show_count: 0,
            source_count: 0,
            updated_at: timestamp(),
        }
    }

    pub fn year(uuid: &str, artist_uuid: &str, year: &str) -> YearApi {
        YearApi {
            uuid: uuid.to_string(),
            artist_uuid: artist_uuid.to_string(),
            year: year.to_string(),
            show_count: 0,
            source_count: 0,
            duration: None,
            avg_rating: 0.0,
            avg_duration: None,
            updated_at: timestamp(),
        }
    }

    pub fn venue(uuid: &str, name: &str) -> VenueApi {
        VenueApi {
            uuid: uuid.to_string(),
            artist_uuid: None,
            name: name.to_string(),
            location: String::new(),
            slug: name.to_lowercase().replace(' ', "-"),
            latitude: None,
            longitude: None,
            past_names: None,
            shows_at_venue: None,
            updated_at: timestamp(),
        }
    }

    pub fn tour(uuid: &str, name: &str) -> TourApi {
        TourApi {
            uuid: uuid.to_string(),
            artist_uuid: String::new(),
            name: name.to_string(),
            slug: name.to_lowercase().replace(' ', "-"),
            start_date: None,
            end_date: None,
            updated_at: timestamp(),
        }
    }

    pub fn show(
        uuid: &str,
        artist_uuid: &str,
        year_uuid: &str,
        venue: Option<VenueApi>,
        tour: Option<TourApi>,
    ) -> ShowApi {
        let date = NaiveDate::from_ymd_opt(1977, 5, 8).unwrap_or_default();
        ShowApi {
            uuid: uuid.to_string(),
            artist_uuid: artist_uuid.to_string(),
            year_uuid: Some(year_uuid.to_string()),
            venue_uuid: venue.as_ref().map(|v| v.uuid.clone()),
            tour_uuid: tour.as_ref().map(|t| t.uuid.clone()),
            display_date: date.to_string(),
            date,
            avg_rating: 0.0,
            avg_duration: None,
            has_soundboard_source: false,
            source_count: 0,
            most_recent_source_updated_at: None,
            updated_at: timestamp(),
            venue,
            tour,
        }
    }

    pub fn source(uuid: &str, artist_uuid: &str, tracks: Vec<SourceTrackApi>) -> SourceApi {
        SourceApi {
            uuid: uuid.to_string(),
            artist_uuid: artist_uuid.to_string(),
            is_soundboard: false,
            is_remaster: false,
            avg_rating: 0.0,
            num_ratings: None,
            duration: None,
            taper: None,
            transferrer: None,
            lineage: None,
            description: None,
            updated_at: timestamp(),
            sets: vec![SourceSetApi {
                name: Some("Set 1".to_string()),
                tracks,
            }],
        }
    }

    pub fn track(uuid: &str, source_uuid: &str, artist_uuid: &str, position: i64, title: &str) -> SourceTrackApi {
        SourceTrackApi {
            uuid: uuid.to_string(),
            source_uuid: source_uuid.to_string(),
            artist_uuid: artist_uuid.to_string(),
            track_position: position,
            title: title.to_string(),
            duration: None,
            mp3_url: None,
            updated_at: timestamp(),
        }
    }
}
