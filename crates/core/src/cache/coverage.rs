//! Coverage records: "category C was fetched around point P at time T".
//!
//! A fresh record within the coverage radius of a query point means the
//! POI source does not need to be called again for that category.

use serde::{Deserialize, Serialize};

use super::connection::CacheDb;
use crate::Error;
use crate::geo::{Coordinate, degree_window, distance_meters};
use crate::model::timestamp;
use chrono::{DateTime, Utc};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, Row};

/// A fetched (category, center) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageRecord {
    pub category: String,
    pub center: Coordinate,
    pub queried_at: String,
    pub poi_count: u32,
}

fn coverage_from_row(row: &Row<'_>) -> rusqlite::Result<CoverageRecord> {
    Ok(CoverageRecord {
        category: row.get(0)?,
        center: Coordinate::new(row.get(1)?, row.get(2)?),
        queried_at: row.get(3)?,
        poi_count: row.get(4)?,
    })
}

impl CacheDb {
    /// Closest coverage record for `category` within `radius_m` of `point`
    /// that was queried at or after `not_before`.
    pub async fn find_coverage(
        &self, category: &str, point: Coordinate, radius_m: f64, not_before: DateTime<Utc>,
    ) -> Result<Option<CoverageRecord>, Error> {
        let category = category.to_string();
        let not_before = timestamp(not_before);
        let window = degree_window(point, radius_m);

        self.conn
            .call(move |conn| -> Result<Option<CoverageRecord>, Error> {
                let mut stmt = conn.prepare_cached(
                    "SELECT category, latitude, longitude, queried_at, poi_count FROM poi_coverage
                     WHERE category = ?1 AND latitude BETWEEN ?2 AND ?3 AND queried_at >= ?4",
                )?;
                let rows = stmt
                    .query_map(params![category, window.min_lat, window.max_lat, not_before], coverage_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let best = rows
                    .into_iter()
                    .filter(|r| match window.lng {
                        Some((lo, hi)) => (lo..=hi).contains(&r.center.longitude),
                        None => true,
                    })
                    .map(|r| (distance_meters(point, r.center), r))
                    .filter(|(d, _)| *d <= radius_m)
                    .min_by(|(a, _), (b, _)| a.total_cmp(b))
                    .map(|(_, r)| r);
                Ok(best)
            })
            .await
            .map_err(Error::from)
    }

    /// Record that `category` was fetched around `center`.
    ///
    /// Re-recording the same point refreshes its timestamp and count.
    pub async fn record_coverage(
        &self, category: &str, center: Coordinate, at: DateTime<Utc>, poi_count: u32,
    ) -> Result<(), Error> {
        let category = category.to_string();
        let at = timestamp(at);
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO poi_coverage (category, latitude, longitude, queried_at, poi_count)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(category, latitude, longitude) DO UPDATE SET
                        queried_at = excluded.queried_at,
                        poi_count = excluded.poi_count",
                    params![category, center.latitude, center.longitude, at, poi_count],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete coverage records queried before `before`.
    pub async fn purge_stale_coverage(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let before = timestamp(before);
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let deleted = conn.execute("DELETE FROM poi_coverage WHERE queried_at < ?1", params![before])?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn count_coverage(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM poi_coverage", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
