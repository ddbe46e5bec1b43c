use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use setlist::behavior::{FetchStrategy, RefreshOutcome};
use setlist::clock::ManualClock;
use setlist::executor::SharedResults;
use setlist::remote::Transport;
use setlist::store::LocalStore;
use setlist::{NetworkResult, RequestMetadata, SyncError};
use setlist_catalog::fake::fixtures;
use setlist_catalog::{
    Artist, BehaviorOverride, Catalog, CatalogClient, CatalogConfig, FakeCatalogTransport,
    FakeFailure, Show, YearWithShowsApi,
};
use tokio::time::timeout;
use tokio_stream::StreamExt;

struct Fixture {
    transport: Arc<FakeCatalogTransport>,
    clock: ManualClock,
    catalog: Catalog,
}

fn fixture(overrides: &[(&str, FetchStrategy)]) -> Fixture {
    setlist::telemetry::try_init_logging(&setlist::LoggingConfig::default());
    let transport = Arc::new(FakeCatalogTransport::new("http://catalog.test/api"));
    let clock = ManualClock::default();
    let mut config = CatalogConfig::default();
    config.engine.base_url = transport.base_url().to_string();
    for (kind, strategy) in overrides {
        config.behaviors.insert(
            kind.to_string(),
            BehaviorOverride {
                strategy: Some(*strategy),
                min_interval_secs: None,
            },
        );
    }
    let catalog = Catalog::new(
        config,
        Arc::clone(&transport) as Arc<dyn Transport>,
        LocalStore::new(),
        Arc::new(clock.clone()),
    );
    Fixture {
        transport,
        clock,
        catalog,
    }
}

/// First published result matching `predicate`
async fn wait_for<T, F>(results: &SharedResults<T>, predicate: F) -> NetworkResult<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&NetworkResult<T>) -> bool,
{
    let mut watcher = results.results().watch();
    timeout(Duration::from_secs(5), async {
        while let Some(result) = watcher.next().await {
            if predicate(&result) {
                return result;
            }
        }
        panic!("result stream ended");
    })
    .await
    .expect("timed out waiting for result")
}

fn settled<T>(result: &NetworkResult<T>) -> bool {
    !result.is_network_loading
}

#[tokio::test]
async fn test_failed_activation_then_successful_refresh() -> Result<()> {
    let f = fixture(&[("ArtistsBehavior", FetchStrategy::NetworkAlwaysFirst)]);
    f.transport.serve_artists(&[
        fixtures::artist("dead", "Grateful Dead"),
        fixtures::artist("phish", "Phish"),
        fixtures::artist("goose", "Goose"),
    ])?;
    f.transport.fail_next(FakeFailure::Status(500));

    let artists = f.catalog.artists();
    let failed = wait_for(&artists, |r| r.error.is_some() && settled(r)).await;
    assert!(failed.data.is_empty());
    assert!(matches!(failed.error, Some(SyncError::Server { status: 500, .. })));

    assert_eq!(artists.refresh(false).await, RefreshOutcome::Updated);
    let loaded = artists.current().expect("results published");
    assert_eq!(loaded.data.len(), 3);
    assert_eq!(loaded.error, None);
    assert!(!loaded.is_network_loading);
    Ok(())
}

#[tokio::test]
async fn test_two_consumers_share_one_request() -> Result<()> {
    let f = fixture(&[]);
    f.transport.serve_artists(&[fixtures::artist("dead", "Grateful Dead")])?;
    f.transport.set_delay(Some(Duration::from_millis(20)));

    let first = f.catalog.artists();
    let second = f.catalog.artists();
    assert_eq!(f.catalog.executors().active_count(), 1);

    let loaded = wait_for(&first, |r| !r.data.is_empty() && settled(r)).await;
    assert_eq!(loaded.data[0].name, "Grateful Dead");
    assert_eq!(second.current().map(|r| r.data), Some(loaded.data));
    assert_eq!(f.transport.request_count("/v3/artists"), 1);

    drop(first);
    assert_eq!(f.catalog.executors().active_count(), 1);
    drop(second);
    assert_eq!(f.catalog.executors().active_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unchanged_resource_answers_not_modified() -> Result<()> {
    let f = fixture(&[]);
    f.transport
        .serve_years("dead", &[fixtures::year("dead-1977", "dead", "1977")])?;

    let years = f.catalog.years("dead");
    wait_for(&years, |r| !r.data.is_empty() && settled(r)).await;

    // Throttled until the minimum interval has passed
    assert_eq!(years.refresh(false).await, RefreshOutcome::NotNeeded);

    let url = f.catalog.client().coordinator().url_for(&CatalogClient::years_path("dead"));
    let first_completion = f
        .catalog
        .store()
        .object::<RequestMetadata>(&url)
        .and_then(|m| m.last_request_completed_at)
        .expect("completion recorded");

    f.clock.advance(chrono::Duration::minutes(16));
    assert_eq!(years.refresh(false).await, RefreshOutcome::NotModified);
    let metadata = f
        .catalog
        .store()
        .object::<RequestMetadata>(&url)
        .expect("metadata stored");
    assert!(metadata.last_request_completed_at > Some(first_completion));
    assert_eq!(metadata.etag.as_deref(), Some("\"v1\""));
    assert_eq!(years.current().map(|r| r.data.len()), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_favorites_survive_remote_updates() -> Result<()> {
    let f = fixture(&[]);
    f.transport.serve_artists(&[
        fixtures::artist("dead", "Grateful Dead"),
        fixtures::artist("phish", "Phish"),
    ])?;

    let artists = f.catalog.artists();
    wait_for(&artists, |r| r.data.len() == 2 && settled(r)).await;

    let favorites = f.catalog.favorite_artists();
    assert!(f.catalog.set_artist_favorite("dead", true)?);
    assert_eq!(favorites.current().map(|r| r.data.len()), Some(1));

    let mut renamed = fixtures::artist("dead", "The Grateful Dead");
    renamed.show_count = 2300;
    f.transport
        .serve_artists(&[renamed, fixtures::artist("phish", "Phish")])?;
    assert_eq!(artists.refresh(true).await, RefreshOutcome::Updated);

    let favorites: Vec<Artist> = favorites.current().map(|r| r.data).unwrap_or_default();
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].name, "The Grateful Dead");
    assert_eq!(favorites[0].show_count, 2300);
    assert!(favorites[0].is_favorite);
    Ok(())
}

#[tokio::test]
async fn test_show_deletes_stay_within_their_year() -> Result<()> {
    let f = fixture(&[("YearShowsBehavior", FetchStrategy::NetworkAlwaysFirst)]);
    let serve = |year: &str, shows: &[&str]| {
        f.transport.serve_year(&YearWithShowsApi {
            year: fixtures::year(year, "dead", year),
            shows: shows
                .iter()
                .map(|uuid| fixtures::show(uuid, "dead", year, None, None))
                .collect(),
        })
    };
    serve("1972", &["1972-a", "1972-b"])?;
    serve("1977", &["1977-a"])?;

    let y72 = f.catalog.year_shows("dead", "1972");
    let y77 = f.catalog.year_shows("dead", "1977");
    wait_for(&y72, |r| r.data.shows.len() == 2 && settled(r)).await;
    wait_for(&y77, |r| r.data.shows.len() == 1 && settled(r)).await;

    serve("1972", &["1972-b"])?;
    assert_eq!(y72.refresh(false).await, RefreshOutcome::Updated);

    assert_eq!(y72.current().map(|r| r.data.shows.len()), Some(1));
    assert_eq!(y77.current().map(|r| r.data.shows.len()), Some(1));
    assert!(f.catalog.store().object::<Show>("1972-a").is_none());
    assert!(f.catalog.store().object::<Show>("1977-a").is_some());
    Ok(())
}

#[tokio::test]
async fn test_offline_keeps_local_data_without_error() -> Result<()> {
    let f = fixture(&[]);
    f.transport
        .serve_years("dead", &[fixtures::year("dead-1977", "dead", "1977")])?;
    let years = f.catalog.years("dead");
    wait_for(&years, |r| !r.data.is_empty() && settled(r)).await;

    f.transport.set_offline(true);
    assert_eq!(years.refresh(true).await, RefreshOutcome::Offline);

    let result = years.current().expect("results published");
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.error, None);
    Ok(())
}

#[tokio::test]
async fn test_response_after_release_is_dropped() -> Result<()> {
    let f = fixture(&[]);
    f.transport.serve_show(&setlist_catalog::ShowWithSourcesApi {
        show: fixtures::show("cornell", "dead", "1977", None, None),
        sources: vec![fixtures::source("sbd", "dead", vec![])],
    })?;
    f.transport.set_delay(Some(Duration::from_millis(20)));

    let show = f.catalog.show("cornell");
    while f.transport.request_count("/v3/shows/cornell") == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    drop(show);
    assert_eq!(f.catalog.executors().active_count(), 0);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(f.catalog.store().object::<Show>("cornell").is_none());
    Ok(())
}

#[tokio::test]
async fn test_composed_artist_screen_reports_first_error() -> Result<()> {
    let f = fixture(&[]);
    f.transport.serve_artist(&fixtures::artist("dead", "Grateful Dead"))?;
    // No years route: the years request fails with 404

    let screen = f.catalog.artist_with_years("dead");
    let mut watcher = screen.results().watch();
    let result = timeout(Duration::from_secs(5), async {
        while let Some(result) = watcher.next().await {
            if result.data.0.is_some() && result.error.is_some() && !result.is_network_loading {
                return result;
            }
        }
        panic!("result stream ended");
    })
    .await?;

    assert_eq!(result.data.0.map(|a| a.name).as_deref(), Some("Grateful Dead"));
    assert!(result.data.1.is_empty());
    assert!(matches!(result.error, Some(SyncError::Server { status: 404, .. })));
    Ok(())
}
