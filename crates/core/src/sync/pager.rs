//! Sync snapshots over a paginated listing source.
//!
//! A snapshot freezes one search (term, filters, bounding-box class) and the
//! cursor sequence the source returned for it. Pages are fetched lazily, at
//! most once per (snapshot, cursor), and served from the store afterwards.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::flight::SingleFlight;
use crate::Error;
use crate::cache::CacheDb;
use crate::cache::hash::{snapshot_id, snapshot_key};
use crate::config::AppConfig;
use crate::geo::{BoundingBox, Viewport, bounding_box_equal, midpoint, zoom_level};
use crate::model::{FIRST_PAGE_CURSOR, Page, SearchFilters, SnapshotState, SyncSnapshot, timestamp};
use crate::sources::{Geocoder, ListingSource};

/// Everything needed to create (or reuse) a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub search_term: String,
    #[serde(default)]
    pub filters: SearchFilters,
    /// Visible map box; resolved through the geocoder when absent.
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
}

#[derive(Debug, Clone)]
pub struct PagerSettings {
    pub snapshot_ttl: Duration,
    pub fetch_timeout: Duration,
    pub default_viewport: Viewport,
}

impl PagerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            snapshot_ttl: config.snapshot_ttl(),
            fetch_timeout: config.timeout(),
            default_viewport: config.default_viewport(),
        }
    }
}

struct Inner {
    db: CacheDb,
    geocoder: Arc<dyn Geocoder>,
    source: Arc<dyn ListingSource>,
    settings: PagerSettings,
    creations: SingleFlight<String, SyncSnapshot>,
    pages: SingleFlight<(String, String), Page>,
}

/// Snapshot creation and page access. Cheap to clone.
#[derive(Clone)]
pub struct SyncPager {
    inner: Arc<Inner>,
}

/// Bound a remote call by `limit`; a timeout is an upstream failure.
async fn with_timeout<T>(
    limit: Duration, what: &str, fut: impl std::future::Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::UpstreamUnavailable(format!("{what} timed out after {}ms", limit.as_millis())))?
}

impl SyncPager {
    pub fn new(
        db: CacheDb, geocoder: Arc<dyn Geocoder>, source: Arc<dyn ListingSource>, settings: PagerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                geocoder,
                source,
                settings,
                creations: SingleFlight::new(),
                pages: SingleFlight::new(),
            }),
        }
    }

    /// Create a snapshot, or return the live one for the same search.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an impossible box or an empty search term with
    /// no box, `NotFound` when the term does not geocode, and
    /// `UpstreamUnavailable` when the geocoder or first page fetch fails.
    pub async fn create_snapshot(&self, request: SnapshotRequest) -> Result<SyncSnapshot, Error> {
        let search_term = request.search_term.trim().to_string();
        let bbox = match request.bounding_box {
            Some(bbox) => {
                bbox.validate()?;
                bbox
            }
            None if search_term.is_empty() => {
                return Err(Error::InvalidArgument("search_term or bounding_box is required".into()));
            }
            None => {
                let resolved = with_timeout(
                    self.inner.settings.fetch_timeout,
                    "geocoding",
                    self.inner.geocoder.resolve(&search_term),
                )
                .await?;
                resolved.bounding_box.validate()?;
                resolved.bounding_box
            }
        };

        let key = snapshot_key(&search_term, &request.filters, &bbox);
        if let Some(live) = self.inner.db.find_live_snapshot(&key, Utc::now()).await? {
            tracing::debug!(snapshot_id = %live.id, "reusing live snapshot");
            return Ok(live);
        }

        let viewport = request.viewport.unwrap_or(self.inner.settings.default_viewport);
        let this = self.clone();
        let filters = request.filters;
        let flight_key = key.clone();
        self.inner
            .creations
            .run(flight_key, move || async move { this.materialize(key, search_term, filters, bbox, viewport).await })
            .await
    }

    async fn materialize(
        &self, key: String, search_term: String, filters: SearchFilters, bbox: BoundingBox, viewport: Viewport,
    ) -> Result<SyncSnapshot, Error> {
        let db = &self.inner.db;
        if let Some(live) = db.find_live_snapshot(&key, Utc::now()).await? {
            return Ok(live);
        }

        let started = Instant::now();
        let first = with_timeout(
            self.inner.settings.fetch_timeout,
            "listing fetch",
            self.inner.source.fetch_page(&search_term, &filters, &bbox, None),
        )
        .await?;

        let cursors = if first.cursors.is_empty() { vec![FIRST_PAGE_CURSOR.to_string()] } else { first.cursors };

        let now = Utc::now();
        let expires = chrono::Duration::from_std(self.inner.settings.snapshot_ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| Error::InvalidArgument("snapshot TTL out of range".into()))?;
        let created_at = timestamp(now);

        let snapshot = SyncSnapshot {
            id: snapshot_id(&key, &created_at),
            key,
            search_term,
            filters,
            bounding_box: bbox,
            viewport,
            midpoint: midpoint(bbox.north_east(), bbox.south_west()),
            zoom: zoom_level(&bbox, viewport),
            cursors,
            created_at,
            expires_at: timestamp(expires),
        };

        let stats = db.insert_sync_snapshot(&snapshot, &first.listings).await?;
        tracing::info!(
            snapshot_id = %snapshot.id,
            cursors = snapshot.cursors.len(),
            zoom = snapshot.zoom,
            inserted = stats.inserted,
            updated = stats.updated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// Load a snapshot that exists and has not expired.
    pub async fn live_snapshot(&self, snapshot_id: &str) -> Result<SyncSnapshot, Error> {
        let snapshot = self
            .inner
            .db
            .get_sync_snapshot(snapshot_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("snapshot {snapshot_id}")))?;
        if snapshot.is_expired_at(Utc::now()) {
            return Err(Error::Expired(format!("snapshot {snapshot_id} expired at {}", snapshot.expires_at)));
        }
        Ok(snapshot)
    }

    /// One page of a snapshot; `None` means page 0.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown snapshot or a cursor outside its sequence,
    /// `Expired` past the TTL, `UpstreamUnavailable` when the fetch fails.
    pub async fn get_page(&self, snapshot_id: &str, cursor: Option<&str>) -> Result<Page, Error> {
        let snapshot = self.live_snapshot(snapshot_id).await?;
        self.page_of(&snapshot, cursor).await
    }

    pub(crate) async fn page_of(&self, snapshot: &SyncSnapshot, cursor: Option<&str>) -> Result<Page, Error> {
        let cursor = cursor.unwrap_or_else(|| snapshot.first_cursor()).to_string();
        if !snapshot.cursors.contains(&cursor) {
            return Err(Error::NotFound(format!("cursor {cursor} in snapshot {}", snapshot.id)));
        }
        let next_cursor = snapshot.next_cursor(&cursor).map(str::to_string);

        if let Some(listings) = self.inner.db.get_page_listings(&snapshot.id, &cursor).await? {
            tracing::debug!(snapshot_id = %snapshot.id, cursor = %cursor, "page served from store");
            return Ok(Page { snapshot_id: snapshot.id.clone(), cursor, listings, next_cursor });
        }

        let this = self.clone();
        let owned = snapshot.clone();
        let flight_key = (snapshot.id.clone(), cursor.clone());
        self.inner
            .pages
            .run(flight_key, move || async move { this.fetch_page(owned, cursor, next_cursor).await })
            .await
    }

    async fn fetch_page(
        &self, snapshot: SyncSnapshot, cursor: String, next_cursor: Option<String>,
    ) -> Result<Page, Error> {
        let db = &self.inner.db;
        if let Some(listings) = db.get_page_listings(&snapshot.id, &cursor).await? {
            return Ok(Page { snapshot_id: snapshot.id, cursor, listings, next_cursor });
        }

        let started = Instant::now();
        let fetched = with_timeout(
            self.inner.settings.fetch_timeout,
            "listing fetch",
            self.inner.source.fetch_page(
                &snapshot.search_term,
                &snapshot.filters,
                &snapshot.bounding_box,
                Some(&cursor),
            ),
        )
        .await?;

        let stats = db.put_page(&snapshot.id, &cursor, &fetched.listings).await?;
        tracing::info!(
            snapshot_id = %snapshot.id,
            cursor = %cursor,
            listings = fetched.listings.len(),
            inserted = stats.inserted,
            updated = stats.updated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "page fetched"
        );
        Ok(Page { snapshot_id: snapshot.id, cursor, listings: fetched.listings, next_cursor })
    }

    /// Lifecycle state of a snapshot.
    pub async fn state(&self, snapshot_id: &str) -> Result<SnapshotState, Error> {
        let snapshot = self
            .inner
            .db
            .get_sync_snapshot(snapshot_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("snapshot {snapshot_id}")))?;
        if snapshot.is_expired_at(Utc::now()) {
            return Ok(SnapshotState::Expired);
        }
        match self.inner.db.count_pages(snapshot_id).await? {
            0 | 1 => Ok(SnapshotState::Created),
            _ => Ok(SnapshotState::PagesPartiallyLoaded),
        }
    }

    /// Whether a map now showing `bbox` has panned away from the snapshot.
    ///
    /// Advisory only; callers decide whether to create a new snapshot.
    pub fn needs_resync(snapshot: &SyncSnapshot, bbox: &BoundingBox) -> bool {
        !bounding_box_equal(&snapshot.bounding_box, bbox)
    }

    /// Drop expired snapshots and their pages.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        let purged = self.inner.db.purge_expired_snapshots(Utc::now()).await?;
        if purged > 0 {
            tracing::info!(purged, "expired snapshots removed");
        }
        Ok(purged)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use crate::model::Listing;
    use crate::sources::{GeocodeResult, ListingPage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn cdmx_box() -> BoundingBox {
        BoundingBox { ne_lat: 19.43, ne_lng: -99.15, sw_lat: 19.41, sw_lng: -99.17 }
    }

    /// Geocoder that knows one place.
    #[derive(Default)]
    pub(crate) struct FakeGeocoder {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl Geocoder for FakeGeocoder {
        async fn resolve(&self, search_term: &str) -> Result<GeocodeResult, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if search_term.eq_ignore_ascii_case("mexico city") {
                Ok(GeocodeResult { coordinate: Coordinate::new(19.42, -99.16), bounding_box: cdmx_box() })
            } else {
                Err(Error::NotFound(format!("no place named {search_term}")))
            }
        }
    }

    /// Listing source with three pages of two listings, cursors "c0".."c2".
    pub(crate) struct FakeListings {
        pub calls: AtomicUsize,
        pub delay: Duration,
        pub cursors: Vec<String>,
    }

    impl Default for FakeListings {
        fn default() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                cursors: vec!["c0".into(), "c1".into(), "c2".into()],
            }
        }
    }

    pub(crate) fn listing(id: &str, lat: f64, lng: f64) -> Listing {
        Listing {
            external_id: id.to_string(),
            name: format!("Stay {id}"),
            price: Some(80.0),
            rating_label: Some("4.8".into()),
            coordinate: Coordinate::new(lat, lng),
            images: vec![],
            link: format!("https://listings.example/rooms/{id}"),
        }
    }

    #[async_trait]
    impl ListingSource for FakeListings {
        async fn fetch_page(
            &self, _search_term: &str, _filters: &SearchFilters, _bbox: &BoundingBox, cursor: Option<&str>,
        ) -> Result<ListingPage, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let page = cursor.unwrap_or("c0");
            let base = match page {
                "c0" => 0,
                "c1" => 2,
                _ => 4,
            };
            let listings = (base..base + 2)
                .map(|i| listing(&format!("l{i}"), 19.41 + f64::from(i) * 0.003, -99.16))
                .collect();
            Ok(ListingPage { listings, cursors: self.cursors.clone() })
        }
    }

    async fn pager_with(listings: Arc<FakeListings>, ttl: Duration) -> (SyncPager, Arc<FakeGeocoder>) {
        let db = CacheDb::open_in_memory().await.unwrap();
        let geocoder = Arc::new(FakeGeocoder::default());
        let settings = PagerSettings {
            snapshot_ttl: ttl,
            fetch_timeout: Duration::from_secs(2),
            default_viewport: Viewport { width: 936, height: 925 },
        };
        (SyncPager::new(db, geocoder.clone(), listings, settings), geocoder)
    }

    fn request() -> SnapshotRequest {
        SnapshotRequest { search_term: "Mexico City".into(), ..Default::default() }
    }

    #[tokio::test]
    async fn test_create_snapshot_geocodes_and_stores_first_page() {
        let source = Arc::new(FakeListings::default());
        let (pager, geocoder) = pager_with(source.clone(), Duration::from_secs(3600)).await;

        let snapshot = pager.create_snapshot(request()).await.unwrap();
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(snapshot.cursors, vec!["c0", "c1", "c2"]);
        assert_eq!(snapshot.bounding_box, cdmx_box());
        assert!((snapshot.midpoint.latitude - 19.42).abs() < 1e-3);
        assert!((14..=17).contains(&snapshot.zoom), "zoom {}", snapshot.zoom);
        assert_eq!(pager.state(&snapshot.id).await.unwrap(), SnapshotState::Created);

        let page = pager.get_page(&snapshot.id, None).await.unwrap();
        assert_eq!(page.cursor, "c0");
        assert_eq!(page.listings.len(), 2);
        assert_eq!(page.next_cursor.as_deref(), Some("c1"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_place_is_not_found() {
        let (pager, _) = pager_with(Arc::new(FakeListings::default()), Duration::from_secs(3600)).await;
        let request = SnapshotRequest { search_term: "Atlantis".into(), ..Default::default() };
        assert!(matches!(pager.create_snapshot(request).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_box_rejected() {
        let (pager, geocoder) = pager_with(Arc::new(FakeListings::default()), Duration::from_secs(3600)).await;
        let inverted = BoundingBox { ne_lat: 19.0, ne_lng: -99.0, sw_lat: 20.0, sw_lng: -100.0 };
        let request = SnapshotRequest { bounding_box: Some(inverted), ..request() };
        assert!(matches!(pager.create_snapshot(request).await, Err(Error::InvalidArgument(_))));
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0);

        let empty = SnapshotRequest::default();
        assert!(matches!(pager.create_snapshot(empty).await, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_live_snapshot_is_reused() {
        let source = Arc::new(FakeListings::default());
        let (pager, _) = pager_with(source.clone(), Duration::from_secs(3600)).await;

        let a = pager.create_snapshot(request()).await.unwrap();
        let b = pager.create_snapshot(request()).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_creation_coalesces() {
        let source = Arc::new(FakeListings { delay: Duration::from_millis(50), ..Default::default() });
        let (pager, _) = pager_with(source.clone(), Duration::from_secs(3600)).await;

        let (a, b) = tokio::join!(pager.create_snapshot(request()), pager.create_snapshot(request()));
        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_cursor_list_uses_single_page() {
        let source = Arc::new(FakeListings { cursors: vec![], ..Default::default() });
        let (pager, _) = pager_with(source, Duration::from_secs(3600)).await;

        let snapshot = pager.create_snapshot(request()).await.unwrap();
        assert_eq!(snapshot.cursors, vec![FIRST_PAGE_CURSOR]);
        let page = pager.get_page(&snapshot.id, Some(FIRST_PAGE_CURSOR)).await.unwrap();
        assert_eq!(page.listings.len(), 2);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_page_fetched_once_then_cached() {
        let source = Arc::new(FakeListings::default());
        let (pager, _) = pager_with(source.clone(), Duration::from_secs(3600)).await;
        let snapshot = pager.create_snapshot(request()).await.unwrap();

        let first = pager.get_page(&snapshot.id, Some("c1")).await.unwrap();
        let second = pager.get_page(&snapshot.id, Some("c1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.listings[0].external_id, "l2");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(pager.state(&snapshot.id).await.unwrap(), SnapshotState::PagesPartiallyLoaded);
    }

    #[tokio::test]
    async fn test_concurrent_page_requests_single_fetch() {
        let source = Arc::new(FakeListings::default());
        let (pager, _) = pager_with(source.clone(), Duration::from_secs(3600)).await;
        let snapshot = pager.create_snapshot(request()).await.unwrap();

        let slow = Arc::new(FakeListings { delay: Duration::from_millis(50), ..Default::default() });
        let slow_pager = SyncPager::new(
            pager.inner.db.clone(),
            Arc::new(FakeGeocoder::default()),
            slow.clone(),
            pager.inner.settings.clone(),
        );

        let (a, b, c) = tokio::join!(
            slow_pager.get_page(&snapshot.id, Some("c2")),
            slow_pager.get_page(&snapshot.id, Some("c2")),
            slow_pager.get_page(&snapshot.id, Some("c2")),
        );
        let a = a.unwrap();
        assert_eq!(a, b.unwrap());
        assert_eq!(a, c.unwrap());
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_snapshot_and_cursor() {
        let (pager, _) = pager_with(Arc::new(FakeListings::default()), Duration::from_secs(3600)).await;
        assert!(matches!(pager.get_page("nope", None).await, Err(Error::NotFound(_))));
        assert!(matches!(pager.state("nope").await, Err(Error::NotFound(_))));

        let snapshot = pager.create_snapshot(request()).await.unwrap();
        assert!(matches!(pager.get_page(&snapshot.id, Some("c9")).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_expired_snapshot() {
        let source = Arc::new(FakeListings::default());
        let (pager, _) = pager_with(source.clone(), Duration::from_millis(1)).await;
        let snapshot = pager.create_snapshot(request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(pager.get_page(&snapshot.id, Some("c1")).await, Err(Error::Expired(_))));
        assert_eq!(pager.state(&snapshot.id).await.unwrap(), SnapshotState::Expired);

        let fresh = pager.create_snapshot(request()).await.unwrap();
        assert_ne!(fresh.id, snapshot.id);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pager.purge_expired().await.unwrap(), 2);
        assert!(matches!(pager.get_page(&snapshot.id, None).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_upstream_unavailable() {
        let source = Arc::new(FakeListings { delay: Duration::from_millis(200), ..Default::default() });
        let db = CacheDb::open_in_memory().await.unwrap();
        let settings = PagerSettings {
            snapshot_ttl: Duration::from_secs(3600),
            fetch_timeout: Duration::from_millis(20),
            default_viewport: Viewport { width: 936, height: 925 },
        };
        let pager = SyncPager::new(db, Arc::new(FakeGeocoder::default()), source, settings);
        assert!(matches!(pager.create_snapshot(request()).await, Err(Error::UpstreamUnavailable(_))));
    }

    #[test]
    fn test_needs_resync() {
        let snapshot_box = cdmx_box();
        let snapshot = SyncSnapshot {
            id: "s".into(),
            key: "k".into(),
            search_term: "cdmx".into(),
            filters: SearchFilters::default(),
            bounding_box: snapshot_box,
            viewport: Viewport { width: 936, height: 925 },
            midpoint: snapshot_box.center(),
            zoom: 15,
            cursors: vec!["0".into()],
            created_at: String::new(),
            expires_at: String::new(),
        };
        let nudged = BoundingBox { ne_lat: 19.4312, ..snapshot_box };
        assert!(!SyncPager::needs_resync(&snapshot, &nudged));

        let panned = BoundingBox { ne_lng: -99.10, sw_lng: -99.12, ..snapshot_box };
        assert!(SyncPager::needs_resync(&snapshot, &panned));
    }
}
