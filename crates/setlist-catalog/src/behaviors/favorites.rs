use async_trait::async_trait;
use setlist::behavior::{BehaviorKey, FetchStrategy, NetworkBackedBehavior};
use setlist::store::{LocalStore, Query, StoreError, WriteTxn};
use setlist::stream::ValueStream;
use setlist_api::{RequestResult, SyncError};
use tracing::debug;

use crate::models::Artist;

/// The user's favorite artists. Purely local: never calls the network.
#[derive(Debug, Clone, Default)]
pub struct FavoriteArtistsBehavior;

#[async_trait]
impl NetworkBackedBehavior for FavoriteArtistsBehavior {
    type Local = Vec<Artist>;
    type Api = ();

    fn key(&self) -> BehaviorKey {
        BehaviorKey::of::<Self>("")
    }

    fn fetch_strategy(&self) -> FetchStrategy {
        FetchStrategy::LocalOnly
    }

    fn create_local_updating_results(&self, store: &LocalStore) -> ValueStream<Vec<Artist>> {
        store.results_stream(
            Query::<Artist>::all()
                .filter(|artist| artist.is_favorite)
                .sort_by(|a, b| a.sort_name.cmp(&b.sort_name)),
        )
    }

    fn is_local_data_showable(&self, _local: &Vec<Artist>) -> bool {
        true
    }

    async fn fetch_from_api(&self, _forced_refresh: bool) -> RequestResult<()> {
        RequestResult::NotModified
    }

    fn upsert(&self, _txn: &mut WriteTxn<'_>, _local: &Vec<Artist>, _api: ()) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Mark or unmark an artist as favorite. Returns `false` when the artist is
/// not stored.
pub fn set_artist_favorite(store: &LocalStore, artist_uuid: &str, favorite: bool) -> Result<bool, StoreError> {
    let found = store.write(|txn| {
        Ok::<_, StoreError>(txn.update::<Artist>(artist_uuid, |artist| artist.is_favorite = favorite))
    })?;
    debug!(
        "[Favorites] artist {} favorite={} (found: {})",
        artist_uuid, favorite, found
    );
    Ok(found)
}
