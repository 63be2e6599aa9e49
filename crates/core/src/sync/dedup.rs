//! Spatial dedup cache for POI fetches.
//!
//! A POI category is fetched at most once per neighborhood per coverage TTL.
//! Coverage records live in the store; concurrent requests for the same
//! grid cell share one fetch through [`SingleFlight`], and a fetch within the
//! radius of one already running waits for it and then re-checks the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;

use super::flight::SingleFlight;
use crate::cache::CacheDb;
use crate::config::AppConfig;
use crate::geo::{Coordinate, distance_meters, grid_cell};
use crate::model::UpsertStats;
use crate::sources::PoiSource;
use crate::Error;

/// What `ensure_covered` did for one (category, point).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CoverageOutcome {
    /// A fresh coverage record already existed within the radius.
    AlreadyCovered,
    /// The source was called and its POIs upserted.
    Fetched { stats: UpsertStats },
    /// The fetch failed; nothing was recorded.
    Failed { reason: String },
}

/// Totals for one batch call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BatchCoverage {
    /// Cluster representatives after greedy dedup.
    pub representatives: usize,
    pub already_covered: usize,
    pub fetched: usize,
    pub failed: usize,
}

impl BatchCoverage {
    fn record(&mut self, outcome: &CoverageOutcome) {
        match outcome {
            CoverageOutcome::AlreadyCovered => self.already_covered += 1,
            CoverageOutcome::Fetched { .. } => self.fetched += 1,
            CoverageOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Tunables, normally taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct CoverageSettings {
    pub radius_m: f64,
    pub batch_radius_m: f64,
    pub ttl: Duration,
    pub fetch_timeout: Duration,
    pub max_concurrency: usize,
}

impl CoverageSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            radius_m: config.coverage_radius_m,
            batch_radius_m: config.batch_dedup_radius_m,
            ttl: config.coverage_ttl(),
            fetch_timeout: config.timeout(),
            max_concurrency: config.max_concurrency,
        }
    }
}

type CellKey = (String, i64, i64);

struct Claim {
    id: u64,
    center: Coordinate,
    done: watch::Receiver<bool>,
}

/// Neighborhoods with a fetch in progress, per category.
#[derive(Default)]
struct Claims {
    active: Mutex<HashMap<String, Vec<Claim>>>,
    next_id: AtomicU64,
}

enum ClaimAttempt {
    Claimed(ClaimGuard),
    /// A fetch within the radius is running; resolves when it finishes.
    Busy(watch::Receiver<bool>),
}

impl Claims {
    fn try_claim(self: &Arc<Self>, category: &str, point: Coordinate, radius_m: f64) -> ClaimAttempt {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let claims = active.entry(category.to_string()).or_default();
        if let Some(running) = claims.iter().find(|c| distance_meters(c.center, point) <= radius_m) {
            return ClaimAttempt::Busy(running.done.clone());
        }

        let (done_tx, done_rx) = watch::channel(false);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        claims.push(Claim { id, center: point, done: done_rx });
        ClaimAttempt::Claimed(ClaimGuard {
            claims: Arc::clone(self),
            category: category.to_string(),
            id,
            done: done_tx,
        })
    }
}

/// Releases its neighborhood and wakes waiters when dropped.
struct ClaimGuard {
    claims: Arc<Claims>,
    category: String,
    id: u64,
    done: watch::Sender<bool>,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        {
            let mut active = self.claims.active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(claims) = active.get_mut(&self.category) {
                claims.retain(|c| c.id != self.id);
                if claims.is_empty() {
                    active.remove(&self.category);
                }
            }
        }
        self.done.send_replace(true);
    }
}

struct Inner {
    db: CacheDb,
    source: Arc<dyn PoiSource>,
    settings: CoverageSettings,
    flights: SingleFlight<CellKey, CoverageOutcome>,
    claims: Arc<Claims>,
}

/// POI coverage guard. Cheap to clone.
#[derive(Clone)]
pub struct PoiCoverage {
    inner: Arc<Inner>,
}

/// Oldest `queried_at` still considered fresh.
pub(crate) fn freshness_cutoff(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_sub_signed(ttl))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Greedy clustering in input order: a point joins the first representative
/// within `radius_m`, otherwise it becomes a new representative.
pub fn cluster(points: &[Coordinate], radius_m: f64) -> Vec<Coordinate> {
    let mut representatives: Vec<Coordinate> = Vec::new();
    for point in points {
        if !representatives.iter().any(|r| distance_meters(*r, *point) <= radius_m) {
            representatives.push(*point);
        }
    }
    representatives
}

impl PoiCoverage {
    pub fn new(db: CacheDb, source: Arc<dyn PoiSource>, settings: CoverageSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                source,
                settings,
                flights: SingleFlight::new(),
                claims: Arc::default(),
            }),
        }
    }

    pub fn settings(&self) -> &CoverageSettings {
        &self.inner.settings
    }

    /// Make sure POIs of `category` around `point` are in the store.
    ///
    /// Never fails: upstream and store errors are logged and reported as
    /// [`CoverageOutcome::Failed`], with no coverage recorded.
    pub async fn ensure_covered(&self, category: &str, point: Coordinate) -> CoverageOutcome {
        // Cells of side R/sqrt(2) keep every pair of points in a cell within R.
        let cell_m = self.inner.settings.radius_m / std::f64::consts::SQRT_2;
        let (row, col) = grid_cell(point, cell_m);
        let key = (category.to_string(), row, col);

        let this = self.clone();
        let owned_category = category.to_string();
        let result = self
            .inner
            .flights
            .run(key, move || async move { this.cover(&owned_category, point).await })
            .await;

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(category, lat = point.latitude, lng = point.longitude, error = %e, "POI coverage failed");
                CoverageOutcome::Failed { reason: e.to_string() }
            }
        }
    }

    async fn cover(&self, category: &str, point: Coordinate) -> Result<CoverageOutcome, Error> {
        let settings = &self.inner.settings;
        let db = &self.inner.db;

        // Neighboring cells can hold points within the radius of each other.
        let _claim = loop {
            match self.inner.claims.try_claim(category, point, settings.radius_m) {
                ClaimAttempt::Claimed(guard) => break guard,
                ClaimAttempt::Busy(mut done) => {
                    tracing::debug!(category, "waiting for nearby POI fetch");
                    // An error means the guard is gone, which also ends the wait.
                    let _ = done.wait_for(|finished| *finished).await;
                }
            }
        };
        let not_before = freshness_cutoff(Utc::now(), settings.ttl);

        if let Some(record) = db.find_coverage(category, point, settings.radius_m, not_before).await? {
            tracing::debug!(
                category,
                queried_at = %record.queried_at,
                "POIs already covered"
            );
            return Ok(CoverageOutcome::AlreadyCovered);
        }

        let started = Instant::now();
        let pois = tokio::time::timeout(settings.fetch_timeout, self.inner.source.fetch_near(category, point))
            .await
            .map_err(|_| {
                Error::UpstreamUnavailable(format!("POI fetch timed out after {}ms", settings.fetch_timeout.as_millis()))
            })??;

        let stats = db.upsert_pois(&pois).await?;
        let poi_count = u32::try_from(pois.len()).unwrap_or(u32::MAX);
        db.record_coverage(category, point, Utc::now(), poi_count).await?;

        tracing::info!(
            category,
            lat = point.latitude,
            lng = point.longitude,
            inserted = stats.inserted,
            updated = stats.updated,
            unchanged = stats.unchanged,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "POIs fetched"
        );
        Ok(CoverageOutcome::Fetched { stats })
    }

    /// Cover many points with as few fetches as possible.
    ///
    /// Points are clustered within the batch radius, then each representative
    /// is covered with at most `max_concurrency` fetches running at once.
    /// A failed representative is counted and the rest carry on.
    pub async fn ensure_covered_batch(&self, category: &str, points: &[Coordinate]) -> BatchCoverage {
        let representatives = cluster(points, self.inner.settings.batch_radius_m);
        let mut totals = BatchCoverage { representatives: representatives.len(), ..Default::default() };
        if representatives.is_empty() {
            return totals;
        }

        let semaphore = Arc::new(Semaphore::new(self.inner.settings.max_concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for point in representatives {
            let semaphore = Arc::clone(&semaphore);
            let this = self.clone();
            let category = category.to_string();
            join_set.spawn(async move {
                // Held for the task's duration to bound concurrency.
                let _permit = semaphore.acquire_owned().await.ok();
                this.ensure_covered(&category, point).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => totals.record(&outcome),
                Err(e) => {
                    tracing::warn!(category, error = %e, "coverage task aborted");
                    totals.failed += 1;
                }
            }
        }

        tracing::debug!(
            category,
            points = points.len(),
            representatives = totals.representatives,
            fetched = totals.fetched,
            failed = totals.failed,
            "batch coverage done"
        );
        totals
    }
}
