//! The sync engine: snapshots, POI dedup and enrichment behind one facade.

pub mod dedup;
pub mod enrich;
pub mod flight;
pub mod pager;

use std::sync::Arc;

use futures_util::future::join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::cache::CacheDb;
use crate::config::AppConfig;
use crate::geo::Coordinate;
use crate::model::{EnrichedListing, Poi, SyncSnapshot};
use crate::sources::{FavoritesStore, Geocoder, ListingSource, PoiSource};

pub use dedup::{BatchCoverage, CoverageOutcome, CoverageSettings, PoiCoverage, cluster};
pub use enrich::Enricher;
pub use flight::SingleFlight;
pub use pager::{PagerSettings, SnapshotRequest, SyncPager};

/// Remote collaborators the engine calls.
#[derive(Clone)]
pub struct Sources {
    pub geocoder: Arc<dyn Geocoder>,
    pub listings: Arc<dyn ListingSource>,
    pub pois: Arc<dyn PoiSource>,
}

/// Coverage result for one interest category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CategoryCoverage {
    pub category: String,
    pub outcome: CoverageOutcome,
}

/// Result of [`GeoSync::sync`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub snapshot: SyncSnapshot,
    /// Stored POIs of the requested categories inside the snapshot box.
    pub pois: Vec<Poi>,
    pub coverage: Vec<CategoryCoverage>,
}

/// Result of [`GeoSync::page`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EnrichedPage {
    pub snapshot_id: String,
    pub cursor: String,
    pub midpoint: Coordinate,
    pub listings: Vec<EnrichedListing>,
    pub next_cursor: Option<String>,
}

/// Trimmed, non-empty, first-occurrence-only categories.
fn normalize_interests(interests: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(interests.len());
    for interest in interests {
        let interest = interest.trim().to_lowercase();
        if !interest.is_empty() && !out.contains(&interest) {
            out.push(interest);
        }
    }
    out
}

/// Engine facade used by the MCP tools.
#[derive(Clone)]
pub struct GeoSync {
    db: CacheDb,
    pager: SyncPager,
    coverage: PoiCoverage,
    enricher: Enricher,
}

impl GeoSync {
    /// Wire the engine from configuration. Favorites come from the store.
    pub fn new(db: CacheDb, sources: Sources, config: &AppConfig) -> Self {
        let favorites: Arc<dyn FavoritesStore> = Arc::new(db.clone());
        Self::with_parts(
            db,
            sources,
            favorites,
            PagerSettings::from_config(config),
            CoverageSettings::from_config(config),
        )
    }

    pub fn with_parts(
        db: CacheDb, sources: Sources, favorites: Arc<dyn FavoritesStore>, pager: PagerSettings,
        coverage: CoverageSettings,
    ) -> Self {
        Self {
            pager: SyncPager::new(db.clone(), sources.geocoder, sources.listings, pager),
            coverage: PoiCoverage::new(db.clone(), sources.pois, coverage),
            enricher: Enricher::new(db.clone(), favorites),
            db,
        }
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    pub fn pager(&self) -> &SyncPager {
        &self.pager
    }

    pub fn coverage(&self) -> &PoiCoverage {
        &self.coverage
    }

    /// Create or reuse a snapshot and make sure its neighborhood is covered
    /// for every interest category.
    ///
    /// # Errors
    ///
    /// Only snapshot creation errors propagate; coverage failures are
    /// reported per category in the outcome.
    pub async fn sync(&self, request: SnapshotRequest, interests: &[String]) -> Result<SyncOutcome, Error> {
        let snapshot = self.pager.create_snapshot(request).await?;
        let interests = normalize_interests(interests);

        let outcomes = join_all(
            interests
                .iter()
                .map(|category| self.coverage.ensure_covered(category, snapshot.midpoint)),
        )
        .await;
        let coverage = interests
            .iter()
            .zip(outcomes)
            .map(|(category, outcome)| CategoryCoverage { category: category.clone(), outcome })
            .collect();

        let pois = if interests.is_empty() {
            Vec::new()
        } else {
            self.db.pois_in_bounds(&snapshot.bounding_box, &interests).await?
        };

        tracing::info!(
            snapshot_id = %snapshot.id,
            interests = interests.len(),
            pois = pois.len(),
            "sync done"
        );
        Ok(SyncOutcome { snapshot, pois, coverage })
    }

    /// One enriched page of a snapshot.
    ///
    /// POIs around the page's listings are covered for each interest before
    /// enrichment, so distances reflect the page's own neighborhoods.
    pub async fn page(
        &self, snapshot_id: &str, cursor: Option<&str>, user_id: Option<&str>, interests: &[String],
    ) -> Result<EnrichedPage, Error> {
        let snapshot = self.pager.live_snapshot(snapshot_id).await?;
        let page = self.pager.page_of(&snapshot, cursor).await?;

        let points: Vec<Coordinate> = page.listings.iter().map(|l| l.coordinate).collect();
        for category in normalize_interests(interests) {
            self.coverage.ensure_covered_batch(&category, &points).await;
        }

        let listings = self.enricher.enrich(page.listings, user_id).await;
        Ok(EnrichedPage {
            snapshot_id: page.snapshot_id,
            cursor: page.cursor,
            midpoint: snapshot.midpoint,
            listings,
            next_cursor: page.next_cursor,
        })
    }

    /// Drop expired snapshots and their pages.
    pub async fn purge_snapshots(&self) -> Result<u64, Error> {
        self.pager.purge_expired().await
    }

    /// Drop coverage records older than the coverage TTL.
    pub async fn purge_coverage(&self) -> Result<u64, Error> {
        let cutoff = dedup::freshness_cutoff(chrono::Utc::now(), self.coverage.settings().ttl);
        let purged = self.db.purge_stale_coverage(cutoff).await?;
        if purged > 0 {
            tracing::info!(purged, "stale coverage removed");
        }
        Ok(purged)
    }

    /// Both purges. Returns (snapshots removed, coverage records removed).
    pub async fn purge(&self) -> Result<(u64, u64), Error> {
        Ok((self.purge_snapshots().await?, self.purge_coverage().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{BoundingBox, distance_meters};
    use dedup::tests::FakePois;
    use pager::tests::{FakeGeocoder, FakeListings};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    async fn engine() -> (GeoSync, Arc<FakeListings>, Arc<FakePois>) {
        let db = CacheDb::open_in_memory().await.unwrap();
        let listings = Arc::new(FakeListings::default());
        let pois = Arc::new(FakePois::default());
        let sources = Sources {
            geocoder: Arc::new(FakeGeocoder::default()),
            listings: listings.clone(),
            pois: pois.clone(),
        };
        let pager = PagerSettings {
            snapshot_ttl: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(2),
            default_viewport: crate::geo::Viewport { width: 936, height: 925 },
        };
        let favorites: Arc<dyn FavoritesStore> = Arc::new(db.clone());
        (GeoSync::with_parts(db, sources, favorites, pager, dedup::tests::settings()), listings, pois)
    }

    fn interests() -> Vec<String> {
        vec!["Cafe".into(), " cafe ".into(), "gym".into()]
    }

    #[test]
    fn test_normalize_interests() {
        assert_eq!(normalize_interests(&interests()), vec!["cafe".to_string(), "gym".to_string()]);
        assert!(normalize_interests(&[" ".into()]).is_empty());
    }

    #[tokio::test]
    async fn test_mexico_city_end_to_end() {
        let (engine, listings, pois) = engine().await;
        let request = SnapshotRequest { search_term: "Mexico City".into(), ..Default::default() };

        let outcome = engine.sync(request.clone(), &interests()).await.unwrap();
        let snapshot = &outcome.snapshot;
        assert!((snapshot.midpoint.latitude - 19.42).abs() < 1e-3);
        assert!((snapshot.midpoint.longitude + 99.16).abs() < 1e-3);
        assert!((14..=17).contains(&snapshot.zoom));
        assert_eq!(outcome.coverage.len(), 2);
        assert!(outcome.coverage.iter().all(|c| matches!(c.outcome, CoverageOutcome::Fetched { .. })));
        assert_eq!(outcome.pois.len(), 2);
        assert_eq!(pois.calls.load(Ordering::SeqCst), 2);

        // Second sync of the same view: same snapshot, no remote calls.
        let again = engine.sync(request, &interests()).await.unwrap();
        assert_eq!(again.snapshot.id, snapshot.id);
        assert!(again.coverage.iter().all(|c| c.outcome == CoverageOutcome::AlreadyCovered));
        assert_eq!(listings.calls.load(Ordering::SeqCst), 1);
        assert_eq!(pois.calls.load(Ordering::SeqCst), 2);

        engine.db().add_favorite("u1", "l1").await.unwrap();
        let page = engine.page(&snapshot.id, None, Some("u1"), &interests()).await.unwrap();
        assert_eq!(page.cursor, "c0");
        assert_eq!(page.next_cursor.as_deref(), Some("c1"));
        assert_eq!(page.midpoint, snapshot.midpoint);
        assert_eq!(page.listings.len(), 2);
        assert!(!page.listings[0].is_favorited);
        assert!(page.listings[1].is_favorited);
        for enriched in &page.listings {
            let distance = enriched.nearest_poi_distance_meters.unwrap();
            assert!(distance >= 0.0);
            assert!(distance <= distance_meters(enriched.listing.coordinate, snapshot.midpoint) + 1e-6);
        }
    }

    #[tokio::test]
    async fn test_page_without_interests_or_pois() {
        let (engine, _listings, pois) = engine().await;
        let bbox = BoundingBox { ne_lat: 19.43, ne_lng: -99.15, sw_lat: 19.41, sw_lng: -99.17 };
        let request = SnapshotRequest {
            search_term: "roma norte".into(),
            bounding_box: Some(bbox),
            ..Default::default()
        };
        let outcome = engine.sync(request, &[]).await.unwrap();
        assert!(outcome.pois.is_empty());

        let page = engine.page(&outcome.snapshot.id, None, None, &[]).await.unwrap();
        assert!(page.listings.iter().all(|l| l.nearest_poi_distance_meters.is_none()));
        assert_eq!(pois.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_page_covers_listing_neighborhoods() {
        let (engine, _listings, pois) = engine().await;
        let request = SnapshotRequest { search_term: "Mexico City".into(), ..Default::default() };
        let outcome = engine.sync(request, &[]).await.unwrap();

        let gym = vec!["gym".to_string()];
        engine.page(&outcome.snapshot.id, Some("c1"), None, &gym).await.unwrap();
        let calls = pois.calls.load(Ordering::SeqCst);
        assert!(calls >= 1);

        engine.page(&outcome.snapshot.id, Some("c1"), None, &gym).await.unwrap();
        assert_eq!(pois.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_purge_on_fresh_store() {
        let (engine, _, _) = engine().await;
        assert_eq!(engine.purge().await.unwrap(), (0, 0));
    }
}
