use serde::de::DeserializeOwned;
use serde_json::Value;
use setlist::remote::{FetchOptions, RequestCoordinator};
use setlist_api::{RequestResult, SyncError};
use tracing::{debug, warn};

use crate::models::{ArtistApi, ShowApi, ShowWithSourcesApi, SourceApi, YearApi, YearWithShowsApi};

/// Typed access to the catalog service
#[derive(Debug, Clone)]
pub struct CatalogClient {
    coordinator: RequestCoordinator,
}

impl CatalogClient {
    pub fn new(coordinator: RequestCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    pub fn artists_path() -> String {
        "/v3/artists".to_string()
    }

    pub fn artist_path(artist_uuid: &str) -> String {
        format!("/v3/artists/{}", artist_uuid)
    }

    pub fn years_path(artist_uuid: &str) -> String {
        format!("/v2/artists/{}/years", artist_uuid)
    }

    pub fn year_path(artist_uuid: &str, year_uuid: &str) -> String {
        format!("/v2/artists/{}/years/{}", artist_uuid, year_uuid)
    }

    pub fn show_path(show_uuid: &str) -> String {
        format!("/v3/shows/{}", show_uuid)
    }

    pub async fn artists(&self, forced: bool) -> RequestResult<Vec<ArtistApi>> {
        let resource = Self::artists_path();
        self.get(&resource, forced)
            .await
            .and_then(|body| decode_list(&resource, &body))
    }

    pub async fn artist(&self, artist_uuid: &str, forced: bool) -> RequestResult<ArtistApi> {
        let resource = Self::artist_path(artist_uuid);
        self.get(&resource, forced)
            .await
            .and_then(|body| decode(&resource, &body))
    }

    pub async fn years(&self, artist_uuid: &str, forced: bool) -> RequestResult<Vec<YearApi>> {
        let resource = Self::years_path(artist_uuid);
        self.get(&resource, forced)
            .await
            .and_then(|body| decode_list(&resource, &body))
    }

    pub async fn year(
        &self,
        artist_uuid: &str,
        year_uuid: &str,
        forced: bool,
    ) -> RequestResult<YearWithShowsApi> {
        let resource = Self::year_path(artist_uuid, year_uuid);
        self.get(&resource, forced).await.and_then(|body| {
            Ok(YearWithShowsApi {
                year: decode(&resource, &body)?,
                shows: decode_field_list::<ShowApi>(&resource, &body, "shows")?,
            })
        })
    }

    pub async fn show(&self, show_uuid: &str, forced: bool) -> RequestResult<ShowWithSourcesApi> {
        let resource = Self::show_path(show_uuid);
        self.get(&resource, forced).await.and_then(|body| {
            Ok(ShowWithSourcesApi {
                show: decode(&resource, &body)?,
                sources: decode_field_list::<SourceApi>(&resource, &body, "sources")?,
            })
        })
    }

    async fn get(&self, resource: &str, forced: bool) -> RequestResult<setlist::remote::Payload> {
        debug!("[CatalogClient] GET {} (forced: {})", resource, forced);
        self.coordinator
            .fetch(resource, FetchOptions::forced(forced))
            .await
    }
}

fn decode_error(resource: &str, message: impl ToString) -> SyncError {
    SyncError::Decode {
        resource: resource.to_string(),
        message: message.to_string(),
    }
}

fn decode<T: DeserializeOwned>(resource: &str, body: &Value) -> Result<T, SyncError> {
    T::deserialize(body).map_err(|e| decode_error(resource, e))
}

/// Decode a JSON array element by element. Elements that fail to decode are
/// dropped and logged; a body that is not an array is an error.
fn decode_list<T: DeserializeOwned>(resource: &str, body: &Value) -> Result<Vec<T>, SyncError> {
    let Some(items) = body.as_array() else {
        return Err(decode_error(resource, "expected a JSON array"));
    };
    let mut decoded = Vec::with_capacity(items.len());
    let mut dropped = 0;
    for item in items {
        match T::deserialize(item) {
            Ok(record) => decoded.push(record),
            Err(e) => {
                dropped += 1;
                debug!("[CatalogClient] undecodable record in {}: {}", resource, e);
            }
        }
    }
    if dropped > 0 {
        warn!(
            "[CatalogClient] dropped {} undecodable record(s) from {}",
            dropped, resource
        );
    }
    Ok(decoded)
}

/// `decode_list` over an optional array field of an object body
fn decode_field_list<T: DeserializeOwned>(
    resource: &str,
    body: &Value,
    field: &str,
) -> Result<Vec<T>, SyncError> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(items) => decode_list(resource, items),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fake::fixtures;

    #[test]
    fn test_decode_list_drops_bad_records() {
        let body = json!([
            serde_json::to_value(fixtures::artist("a", "Phish")).unwrap(),
            {"uuid": "broken"},
            serde_json::to_value(fixtures::artist("b", "Goose")).unwrap(),
        ]);
        let artists: Vec<ArtistApi> = decode_list("/v3/artists", &body).unwrap();
        let names: Vec<&str> = artists.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Phish", "Goose"]);
    }

    #[test]
    fn test_decode_list_rejects_non_array() {
        let result: Result<Vec<ArtistApi>, _> = decode_list("/v3/artists", &json!({"oops": 1}));
        assert!(matches!(result, Err(SyncError::Decode { .. })));
    }

    #[test]
    fn test_missing_list_field_is_empty() {
        let shows: Vec<ShowApi> = decode_field_list("/year", &json!({"uuid": "y"}), "shows").unwrap();
        assert!(shows.is_empty());
    }
}
