//! Core types and the sync engine for geosync.
//!
//! This crate provides:
//! - Geometry helpers (bounding boxes, zoom, haversine)
//! - SQLite store for snapshots, pages, listings, POIs, coverage and favorites
//! - Source traits implemented by the HTTP clients
//! - The sync engine: snapshot pager, POI dedup cache and enrichment
//! - Unified error types and layered configuration

pub mod cache;
pub mod config;
pub mod error;
pub mod geo;
pub mod model;
pub mod sources;
pub mod sync;

pub use cache::CacheDb;
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use geo::{BoundingBox, Coordinate, Viewport};
pub use model::{EnrichedListing, Listing, Page, Poi, SearchFilters, SnapshotState, SyncSnapshot, UpsertStats};
pub use sources::{FavoritesStore, GeocodeResult, Geocoder, ListingPage, ListingSource, PoiSource};
pub use sync::{EnrichedPage, GeoSync, SnapshotRequest, Sources, SyncOutcome};
