//! Catalog models (local store rows) and the API records they are built from

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use setlist_api::{ApiRecord, Entity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub uuid: String,
    pub name: String,
    pub slug: String,
    pub sort_name: String,
    pub featured: bool,
    pub show_count: i64,
    pub source_count: i64,
    pub updated_at: DateTime<Utc>,
    /// User state, never written by reconciliation
    pub is_favorite: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Year {
    pub uuid: String,
    pub artist_uuid: String,
    pub year: String,
    pub show_count: i64,
    pub source_count: i64,
    pub duration: Option<f64>,
    pub avg_rating: f64,
    pub avg_duration: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub uuid: String,
    pub artist_uuid: Option<String>,
    pub name: String,
    pub location: String,
    pub slug: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub past_names: Option<String>,
    pub shows_at_venue: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tour {
    pub uuid: String,
    pub artist_uuid: String,
    pub name: String,
    pub slug: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Show {
    pub uuid: String,
    pub artist_uuid: String,
    pub year_uuid: Option<String>,
    pub venue_uuid: Option<String>,
    pub tour_uuid: Option<String>,
    pub display_date: String,
    pub date: NaiveDate,
    pub avg_rating: f64,
    pub avg_duration: Option<f64>,
    pub has_soundboard_source: bool,
    pub source_count: i64,
    pub most_recent_source_updated_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub is_favorite: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub uuid: String,
    pub show_uuid: String,
    pub artist_uuid: String,
    pub is_soundboard: bool,
    pub is_remaster: bool,
    pub avg_rating: f64,
    pub num_ratings: Option<i64>,
    pub duration: Option<f64>,
    pub taper: Option<String>,
    pub transferrer: Option<String>,
    pub lineage: Option<String>,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub is_favorite: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTrack {
    pub uuid: String,
    pub source_uuid: String,
    pub show_uuid: String,
    pub artist_uuid: String,
    pub track_position: i64,
    pub title: String,
    pub duration: Option<f64>,
    pub mp3_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

macro_rules! impl_entity {
    ($($model:ty => $table:literal),* $(,)?) => {
        $(
            impl Entity for $model {
                const TABLE: &'static str = $table;

                fn id(&self) -> &str {
                    &self.uuid
                }
            }
        )*
    };
}

impl_entity! {
    Artist => "artists",
    Year => "years",
    Venue => "venues",
    Tour => "tours",
    Show => "shows",
    Source => "sources",
    SourceTrack => "source_tracks",
}

// API records

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistApi {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub sort_name: String,
    #[serde(default)]
    pub featured: i64,
    #[serde(default)]
    pub show_count: i64,
    #[serde(default)]
    pub source_count: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearApi {
    pub uuid: String,
    pub artist_uuid: String,
    pub year: String,
    #[serde(default)]
    pub show_count: i64,
    #[serde(default)]
    pub source_count: i64,
    pub duration: Option<f64>,
    #[serde(default)]
    pub avg_rating: f64,
    pub avg_duration: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// `GET /v2/artists/{artist}/years/{year}`
#[derive(Debug, Clone, PartialEq)]
pub struct YearWithShowsApi {
    pub year: YearApi,
    pub shows: Vec<ShowApi>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueApi {
    pub uuid: String,
    pub artist_uuid: Option<String>,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub slug: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub past_names: Option<String>,
    pub shows_at_venue: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TourApi {
    pub uuid: String,
    pub artist_uuid: String,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowApi {
    pub uuid: String,
    pub artist_uuid: String,
    pub year_uuid: Option<String>,
    pub venue_uuid: Option<String>,
    pub tour_uuid: Option<String>,
    pub display_date: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub avg_rating: f64,
    pub avg_duration: Option<f64>,
    #[serde(default)]
    pub has_soundboard_source: bool,
    #[serde(default)]
    pub source_count: i64,
    pub most_recent_source_updated_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Embedded related records, present on most show payloads
    pub venue: Option<VenueApi>,
    pub tour: Option<TourApi>,
}

impl ShowApi {
    /// Venue id, preferring the embedded record
    pub fn resolved_venue_uuid(&self) -> Option<&str> {
        self.venue
            .as_ref()
            .map(|venue| venue.uuid.as_str())
            .or(self.venue_uuid.as_deref())
            .filter(|uuid| !uuid.trim().is_empty())
    }

    pub fn resolved_tour_uuid(&self) -> Option<&str> {
        self.tour
            .as_ref()
            .map(|tour| tour.uuid.as_str())
            .or(self.tour_uuid.as_deref())
            .filter(|uuid| !uuid.trim().is_empty())
    }
}

/// `GET /v3/shows/{show}`
#[derive(Debug, Clone, PartialEq)]
pub struct ShowWithSourcesApi {
    pub show: ShowApi,
    pub sources: Vec<SourceApi>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceApi {
    pub uuid: String,
    pub artist_uuid: String,
    #[serde(default)]
    pub is_soundboard: bool,
    #[serde(default)]
    pub is_remaster: bool,
    #[serde(default)]
    pub avg_rating: f64,
    pub num_ratings: Option<i64>,
    pub duration: Option<f64>,
    pub taper: Option<String>,
    pub transferrer: Option<String>,
    pub lineage: Option<String>,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sets: Vec<SourceSetApi>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSetApi {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tracks: Vec<SourceTrackApi>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTrackApi {
    pub uuid: String,
    pub source_uuid: String,
    pub artist_uuid: String,
    pub track_position: i64,
    pub title: String,
    pub duration: Option<f64>,
    pub mp3_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

macro_rules! impl_api_record {
    ($($record:ty),* $(,)?) => {
        $(
            impl ApiRecord for $record {
                fn identifier(&self) -> &str {
                    &self.uuid
                }
            }
        )*
    };
}

impl_api_record!(ArtistApi, YearApi, VenueApi, TourApi, ShowApi, SourceApi, SourceTrackApi);

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_show_decodes_with_embedded_venue() {
        let show: ShowApi = serde_json::from_value(json!({
            "uuid": "show-1",
            "artist_uuid": "artist-1",
            "year_uuid": "year-1977",
            "venue_uuid": null,
            "display_date": "1977-05-08",
            "date": "1977-05-08",
            "avg_rating": 9.8,
            "updated_at": "2024-01-01T00:00:00Z",
            "venue": {
                "uuid": "venue-1",
                "artist_uuid": "artist-1",
                "name": "Barton Hall",
                "location": "Ithaca, NY",
                "updated_at": "2024-01-01T00:00:00Z"
            }
        }))
        .unwrap();

        assert_eq!(show.resolved_venue_uuid(), Some("venue-1"));
        assert_eq!(show.resolved_tour_uuid(), None);
        assert_eq!(show.date, NaiveDate::from_ymd_opt(1977, 5, 8).unwrap());
        assert!(show.has_identifier());
    }

    #[test]
    fn test_missing_required_field_fails() {
        let result = serde_json::from_value::<ArtistApi>(json!({
            "uuid": "a",
            "updated_at": "2024-01-01T00:00:00Z"
        }));
        assert!(result.is_err());
    }
}
