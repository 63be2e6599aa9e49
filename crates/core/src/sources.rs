//! Seams to the outside world.
//!
//! The sync engine only ever talks to these traits; HTTP implementations
//! live in the client crate and tests plug in in-memory fakes.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::geo::{BoundingBox, Coordinate};
use crate::model::{Listing, Poi, SearchFilters};

/// A resolved place: its center and the box a map would show for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub coordinate: Coordinate,
    pub bounding_box: BoundingBox,
}

/// One page of listing results plus the full cursor sequence, when known.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPage {
    pub listings: Vec<Listing>,
    /// Every page cursor of the result set; empty when the source does not
    /// report pagination.
    pub cursors: Vec<String>,
}

/// Resolves a free-text place name.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Returns `Error::NotFound` when the term resolves to nothing.
    async fn resolve(&self, search_term: &str) -> Result<GeocodeResult, Error>;
}

/// Paginated listing search.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// `cursor == None` fetches the first page.
    async fn fetch_page(
        &self, search_term: &str, filters: &SearchFilters, bbox: &BoundingBox, cursor: Option<&str>,
    ) -> Result<ListingPage, Error>;
}

/// Category search around a point.
#[async_trait]
pub trait PoiSource: Send + Sync {
    async fn fetch_near(&self, category: &str, coordinate: Coordinate) -> Result<Vec<Poi>, Error>;
}

/// Per-user favorite listing ids.
#[async_trait]
pub trait FavoritesStore: Send + Sync {
    async fn list_favorite_ids(&self, user_id: &str) -> Result<HashSet<String>, Error>;
}
