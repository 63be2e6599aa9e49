//! POI upserts, bounding-box reads and nearest-neighbor search.
//!
//! There is no R-tree here: a degree window on the (latitude, longitude)
//! index narrows candidates, then haversine decides.

use std::cmp::Ordering;

use super::connection::CacheDb;
use crate::Error;
use crate::geo::{BoundingBox, Coordinate, degree_window, distance_meters};
use crate::model::{NearestPoi, Poi, UpsertStats, timestamp};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, Connection, Row};

const POI_COLUMNS: &str = "external_id, category, name, latitude, longitude, rating, review_count, link";

/// First search radius for nearest-neighbor lookups.
const NEAREST_START_RADIUS_M: f64 = 1_000.0;

/// Past this radius the window search gives up and scans every POI.
const NEAREST_MAX_WINDOW_M: f64 = 2_000_000.0;

fn poi_from_row(row: &Row<'_>) -> rusqlite::Result<Poi> {
    Ok(Poi {
        external_id: row.get(0)?,
        category: row.get(1)?,
        name: row.get(2)?,
        coordinate: Coordinate::new(row.get(3)?, row.get(4)?),
        rating: row.get(5)?,
        review_count: row.get(6)?,
        link: row.get(7)?,
    })
}

/// (external_id, coordinate) of every POI inside the window around `center`.
fn window_candidates(conn: &Connection, center: Coordinate, radius_m: f64) -> Result<Vec<(String, Coordinate)>, Error> {
    let window = degree_window(center, radius_m);
    let map = |row: &Row<'_>| -> rusqlite::Result<(String, Coordinate)> {
        Ok((row.get(0)?, Coordinate::new(row.get(1)?, row.get(2)?)))
    };

    let rows = match window.lng {
        Some((lo, hi)) => {
            let mut stmt = conn.prepare_cached(
                "SELECT external_id, latitude, longitude FROM pois
                 WHERE latitude BETWEEN ?1 AND ?2 AND longitude BETWEEN ?3 AND ?4",
            )?;
            stmt.query_map(params![window.min_lat, window.max_lat, lo, hi], map)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let mut stmt = conn.prepare_cached(
                "SELECT external_id, latitude, longitude FROM pois WHERE latitude BETWEEN ?1 AND ?2",
            )?;
            stmt.query_map(params![window.min_lat, window.max_lat], map)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    Ok(rows)
}

fn all_candidates(conn: &Connection) -> Result<Vec<(String, Coordinate)>, Error> {
    let mut stmt = conn.prepare_cached("SELECT external_id, latitude, longitude FROM pois")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, Coordinate::new(row.get(1)?, row.get(2)?))))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Closest candidate; exact distance ties go to the smaller external id.
fn closest(center: Coordinate, candidates: Vec<(String, Coordinate)>) -> Option<NearestPoi> {
    candidates
        .into_iter()
        .map(|(external_id, coordinate)| NearestPoi { distance_meters: distance_meters(center, coordinate), external_id })
        .min_by(|a, b| {
            a.distance_meters
                .partial_cmp(&b.distance_meters)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.external_id.cmp(&b.external_id))
        })
}

/// Nearest POI to `center` across every persisted POI.
///
/// Windows grow until the best hit lies inside the searched radius, which
/// proves nothing outside the window can be closer.
pub(crate) fn nearest_poi_on(conn: &Connection, center: Coordinate) -> Result<Option<NearestPoi>, Error> {
    let mut radius_m = NEAREST_START_RADIUS_M;
    while radius_m <= NEAREST_MAX_WINDOW_M {
        let best = closest(center, window_candidates(conn, center, radius_m)?);
        if let Some(best) = best
            && best.distance_meters <= radius_m
        {
            return Ok(Some(best));
        }
        radius_m *= 4.0;
    }
    Ok(closest(center, all_candidates(conn)?))
}

impl CacheDb {
    /// Insert or update POIs by external id.
    ///
    /// New ids are inserted, identical rows are left alone, and differing
    /// rows are updated in place.
    pub async fn upsert_pois(&self, pois: &[Poi]) -> Result<UpsertStats, Error> {
        let pois = pois.to_vec();
        let now = timestamp(chrono::Utc::now());
        self.conn
            .call(move |conn| -> Result<UpsertStats, Error> {
                let tx = conn.transaction()?;
                let mut stats = UpsertStats::default();
                {
                    let mut exists_stmt =
                        tx.prepare_cached("SELECT EXISTS(SELECT 1 FROM pois WHERE external_id = ?1)")?;
                    let mut upsert_stmt = tx.prepare_cached(
                        "INSERT INTO pois (
                            external_id, category, name, latitude, longitude,
                            rating, review_count, link, first_seen_at, updated_at
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                        ON CONFLICT(external_id) DO UPDATE SET
                            category = excluded.category,
                            name = excluded.name,
                            latitude = excluded.latitude,
                            longitude = excluded.longitude,
                            rating = excluded.rating,
                            review_count = excluded.review_count,
                            link = excluded.link,
                            updated_at = excluded.updated_at
                        WHERE pois.category IS NOT excluded.category
                            OR pois.name IS NOT excluded.name
                            OR pois.latitude IS NOT excluded.latitude
                            OR pois.longitude IS NOT excluded.longitude
                            OR pois.rating IS NOT excluded.rating
                            OR pois.review_count IS NOT excluded.review_count
                            OR pois.link IS NOT excluded.link",
                    )?;

                    for poi in &pois {
                        let existed: bool = exists_stmt.query_row(params![&poi.external_id], |row| row.get(0))?;
                        let changed = upsert_stmt.execute(params![
                            &poi.external_id,
                            &poi.category,
                            &poi.name,
                            poi.coordinate.latitude,
                            poi.coordinate.longitude,
                            &poi.rating,
                            &poi.review_count,
                            &poi.link,
                            &now,
                        ])?;
                        match (existed, changed) {
                            (false, _) => stats.inserted += 1,
                            (true, 0) => stats.unchanged += 1,
                            (true, _) => stats.updated += 1,
                        }
                    }
                }
                tx.commit()?;
                Ok(stats)
            })
            .await
            .map_err(Error::from)
    }

    /// Get a POI by external id.
    pub async fn get_poi(&self, external_id: &str) -> Result<Option<Poi>, Error> {
        let external_id = external_id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Poi>, Error> {
                let sql = format!("SELECT {POI_COLUMNS} FROM pois WHERE external_id = ?1");
                match conn.query_row(&sql, params![external_id], poi_from_row) {
                    Ok(poi) => Ok(Some(poi)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// POIs inside `bbox`, optionally restricted to some categories.
    ///
    /// Ordered by category then external id.
    pub async fn pois_in_bounds(&self, bbox: &BoundingBox, categories: &[String]) -> Result<Vec<Poi>, Error> {
        let bbox = *bbox;
        let categories = categories.to_vec();
        self.conn
            .call(move |conn| -> Result<Vec<Poi>, Error> {
                let sql = format!(
                    "SELECT {POI_COLUMNS} FROM pois WHERE latitude BETWEEN ?1 AND ?2 ORDER BY category, external_id"
                );
                let mut stmt = conn.prepare(&sql)?;
                let pois = stmt
                    .query_map(params![bbox.sw_lat, bbox.ne_lat], poi_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok(pois
                    .into_iter()
                    .filter(|p| bbox.contains(p.coordinate))
                    .filter(|p| categories.is_empty() || categories.contains(&p.category))
                    .collect())
            })
            .await
            .map_err(Error::from)
    }

    /// Nearest persisted POI for each coordinate, in input order.
    pub async fn nearest_pois(&self, coordinates: &[Coordinate]) -> Result<Vec<Option<NearestPoi>>, Error> {
        let coordinates = coordinates.to_vec();
        self.conn
            .call(move |conn| -> Result<Vec<Option<NearestPoi>>, Error> {
                coordinates.iter().map(|c| nearest_poi_on(conn, *c)).collect()
            })
            .await
            .map_err(Error::from)
    }

    /// Number of stored POIs.
    pub async fn count_pois(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM pois", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
