//! Listing upserts and lookups.
//!
//! Listings are keyed by their external id; a refetch updates price, rating
//! and images in place and never duplicates a row.

use std::collections::HashMap;

use super::connection::CacheDb;
use crate::Error;
use crate::geo::Coordinate;
use crate::model::{Listing, UpsertStats, timestamp};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, Connection, Row, params_from_iter};

const LISTING_COLUMNS: &str = "external_id, name, price, rating_label, latitude, longitude, images_json, link";

/// Upsert listings on an open connection or transaction.
pub(crate) fn upsert_listings_on(conn: &Connection, listings: &[Listing], now: &str) -> Result<UpsertStats, Error> {
    let mut stats = UpsertStats::default();
    let mut exists_stmt = conn.prepare_cached("SELECT EXISTS(SELECT 1 FROM listings WHERE external_id = ?1)")?;
    let mut upsert_stmt = conn.prepare_cached(
        "INSERT INTO listings (
            external_id, name, price, rating_label, latitude, longitude,
            images_json, link, first_seen_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
        ON CONFLICT(external_id) DO UPDATE SET
            name = excluded.name,
            price = excluded.price,
            rating_label = excluded.rating_label,
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            images_json = excluded.images_json,
            link = excluded.link,
            updated_at = excluded.updated_at
        WHERE listings.name IS NOT excluded.name
            OR listings.price IS NOT excluded.price
            OR listings.rating_label IS NOT excluded.rating_label
            OR listings.latitude IS NOT excluded.latitude
            OR listings.longitude IS NOT excluded.longitude
            OR listings.images_json IS NOT excluded.images_json
            OR listings.link IS NOT excluded.link",
    )?;

    for listing in listings {
        let existed: bool = exists_stmt.query_row(params![&listing.external_id], |row| row.get(0))?;
        let images_json = serde_json::to_string(&listing.images)?;
        let changed = upsert_stmt.execute(params![
            &listing.external_id,
            &listing.name,
            &listing.price,
            &listing.rating_label,
            listing.coordinate.latitude,
            listing.coordinate.longitude,
            images_json,
            &listing.link,
            now,
        ])?;

        match (existed, changed) {
            (false, _) => stats.inserted += 1,
            (true, 0) => stats.unchanged += 1,
            (true, _) => stats.updated += 1,
        }
    }

    Ok(stats)
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<(Listing, String)> {
    let images_json: String = row.get(6)?;
    Ok((
        Listing {
            external_id: row.get(0)?,
            name: row.get(1)?,
            price: row.get(2)?,
            rating_label: row.get(3)?,
            coordinate: Coordinate::new(row.get(4)?, row.get(5)?),
            images: Vec::new(),
            link: row.get(7)?,
        },
        images_json,
    ))
}

/// Load listings by id, in the order of `ids`. Unknown ids are skipped.
pub(crate) fn get_listings_on(conn: &Connection, ids: &[String]) -> Result<Vec<Listing>, Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE external_id IN ({placeholders})");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(ids.iter()), listing_from_row)?;

    let mut by_id = HashMap::with_capacity(ids.len());
    for row in rows {
        let (mut listing, images_json) = row?;
        listing.images = serde_json::from_str(&images_json)?;
        by_id.insert(listing.external_id.clone(), listing);
    }

    Ok(ids.iter().filter_map(|id| by_id.get(id).cloned()).collect())
}

impl CacheDb {
    /// Insert or update listings by external id.
    ///
    /// Identical data is a no-op; differing data updates the stored row.
    pub async fn upsert_listings(&self, listings: &[Listing]) -> Result<UpsertStats, Error> {
        let listings = listings.to_vec();
        let now = timestamp(chrono::Utc::now());
        self.conn
            .call(move |conn| -> Result<UpsertStats, Error> {
                let tx = conn.transaction()?;
                let stats = upsert_listings_on(&tx, &listings, &now)?;
                tx.commit()?;
                Ok(stats)
            })
            .await
            .map_err(Error::from)
    }

    /// Get listings by external id, preserving the order of `ids`.
    pub async fn get_listings(&self, ids: &[String]) -> Result<Vec<Listing>, Error> {
        let ids = ids.to_vec();
        self.conn
            .call(move |conn| -> Result<Vec<Listing>, Error> { get_listings_on(conn, &ids) })
            .await
            .map_err(Error::from)
    }

    /// Number of stored listings.
    pub async fn count_listings(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM listings", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(id: &str, price: f64) -> Listing {
        Listing {
            external_id: id.to_string(),
            name: format!("Listing {id}"),
            price: Some(price),
            rating_label: Some("4.9 (120)".into()),
            coordinate: Coordinate::new(19.42, -99.16),
            images: vec![format!("https://img.example.com/{id}.jpg")],
            link: format!("https://example.com/rooms/{id}"),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get_in_order() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let stats = db
            .upsert_listings(&[listing("a", 10.0), listing("b", 20.0), listing("c", 30.0)])
            .await
            .unwrap();
        assert_eq!(stats.inserted, 3);

        let ids = vec!["c".to_string(), "missing".to_string(), "a".to_string()];
        let got = db.get_listings(&ids).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].external_id, "c");
        assert_eq!(got[1].external_id, "a");
        assert_eq!(got[1].images, vec!["https://img.example.com/a.jpg".to_string()]);
    }

    #[tokio::test]
    async fn test_refetch_updates_mutable_fields() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.upsert_listings(&[listing("a", 10.0)]).await.unwrap();

        let same = db.upsert_listings(&[listing("a", 10.0)]).await.unwrap();
        assert_eq!(same, UpsertStats { inserted: 0, updated: 0, unchanged: 1 });

        let repriced = db.upsert_listings(&[listing("a", 12.5)]).await.unwrap();
        assert_eq!(repriced.updated, 1);

        assert_eq!(db.count_listings().await.unwrap(), 1);
        let got = db.get_listings(&["a".to_string()]).await.unwrap();
        assert_eq!(got[0].price, Some(12.5));
    }

    #[tokio::test]
    async fn test_get_listings_empty_ids() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.get_listings(&[]).await.unwrap().is_empty());
    }
}
