//! HTTP source clients for geosync.
//!
//! This crate provides the listing search, places and geocoder clients that
//! implement the source traits from `geosync-core`, with a shared rate
//! limiter and an `Option`-based parsing boundary.

pub mod error;
pub mod geocode;
pub mod http;
pub mod listings;
pub mod places;

pub use error::SourceError;
pub use geocode::GeocoderClient;
pub use http::SourceConfig;
pub use listings::{ListingSearchRequest, ListingsClient};
pub use places::PlacesClient;
