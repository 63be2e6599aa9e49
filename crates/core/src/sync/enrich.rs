//! Read-time enrichment of listings.

use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::CacheDb;
use crate::geo::Coordinate;
use crate::model::{EnrichedListing, Listing, NearestPoi};
use crate::sources::FavoritesStore;

/// Attaches nearest-POI distance and favorite status to listings.
///
/// Never fails: lookup errors are logged and the affected fields are left
/// at their "unknown" values.
#[derive(Clone)]
pub struct Enricher {
    db: CacheDb,
    favorites: Arc<dyn FavoritesStore>,
}

impl Enricher {
    pub fn new(db: CacheDb, favorites: Arc<dyn FavoritesStore>) -> Self {
        Self { db, favorites }
    }

    /// Enrich `listings`, keeping their order.
    pub async fn enrich(&self, listings: Vec<Listing>, user_id: Option<&str>) -> Vec<EnrichedListing> {
        let favorites = match user_id {
            Some(user_id) => self.favorites.list_favorite_ids(user_id).await.unwrap_or_else(|e| {
                tracing::warn!(user_id, error = %e, "favorites lookup failed");
                HashSet::new()
            }),
            None => HashSet::new(),
        };

        let coordinates: Vec<Coordinate> = listings.iter().map(|l| l.coordinate).collect();
        let nearest = self.db.nearest_pois(&coordinates).await.unwrap_or_else(|e| {
            tracing::warn!(listings = coordinates.len(), error = %e, "nearest POI lookup failed");
            vec![None; coordinates.len()]
        });

        listings
            .into_iter()
            .zip(nearest)
            .map(|(listing, nearest)| {
                let is_favorited = favorites.contains(&listing.external_id);
                let (distance, poi_id) = match nearest {
                    Some(NearestPoi { external_id, distance_meters }) => (Some(distance_meters), Some(external_id)),
                    None => (None, None),
                };
                EnrichedListing {
                    listing,
                    nearest_poi_distance_meters: distance,
                    nearest_poi_id: poi_id,
                    is_favorited,
                }
            })
            .collect()
    }
}
