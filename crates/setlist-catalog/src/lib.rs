//! Live concert catalog on top of the `setlist` sync engine
//!
//! `Catalog` is what screens talk to. Every screen query is a shared
//! network-backed behavior; results come from the local store and are kept
//! fresh from the catalog service according to each behavior's fetch strategy.

pub mod behaviors;
pub mod catalog;
pub mod client;
pub mod config;
pub mod fake;
pub mod models;
pub mod reconcile;

pub use behaviors::{
    ArtistBehavior, ArtistsBehavior, BehaviorSettings, FavoriteArtistsBehavior, ShowDetail,
    ShowWithSourcesBehavior, YearShows, YearShowsBehavior, YearsBehavior,
};
pub use catalog::{Catalog, catalog_tables};
pub use client::CatalogClient;
pub use config::{BehaviorOverride, CatalogConfig};
pub use fake::{FakeCatalogTransport, FakeFailure};
pub use models::*;
