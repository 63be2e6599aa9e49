//! Sync snapshot and page cache operations.
//!
//! A snapshot row is written once and never updated. Pages are keyed by
//! (snapshot_id, cursor) and reference listings by external id.

use super::connection::CacheDb;
use super::listings::{get_listings_on, upsert_listings_on};
use crate::Error;
use crate::geo::{BoundingBox, Coordinate, Viewport};
use crate::model::{Listing, SyncSnapshot, UpsertStats, timestamp};
use chrono::{DateTime, Utc};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, Row};

const SNAPSHOT_COLUMNS: &str = "id, key_hash, search_term, filters_json,
    ne_lat, ne_lng, sw_lat, sw_lng, viewport_width, viewport_height,
    mid_lat, mid_lng, zoom, cursors_json, created_at, expires_at";

struct SnapshotRow {
    snapshot: SyncSnapshot,
    filters_json: String,
    cursors_json: String,
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<SnapshotRow> {
    Ok(SnapshotRow {
        snapshot: SyncSnapshot {
            id: row.get(0)?,
            key: row.get(1)?,
            search_term: row.get(2)?,
            filters: Default::default(),
            bounding_box: BoundingBox {
                ne_lat: row.get(4)?,
                ne_lng: row.get(5)?,
                sw_lat: row.get(6)?,
                sw_lng: row.get(7)?,
            },
            viewport: Viewport { width: row.get(8)?, height: row.get(9)? },
            midpoint: Coordinate::new(row.get(10)?, row.get(11)?),
            zoom: row.get(12)?,
            cursors: Vec::new(),
            created_at: row.get(14)?,
            expires_at: row.get(15)?,
        },
        filters_json: row.get(3)?,
        cursors_json: row.get(13)?,
    })
}

impl SnapshotRow {
    fn decode(self) -> Result<SyncSnapshot, Error> {
        let mut snapshot = self.snapshot;
        snapshot.filters = serde_json::from_str(&self.filters_json)?;
        snapshot.cursors = serde_json::from_str(&self.cursors_json)?;
        Ok(snapshot)
    }
}

impl CacheDb {
    /// Store a new snapshot together with its first page.
    ///
    /// Runs in one transaction so a snapshot is never visible without page 0.
    pub async fn insert_sync_snapshot(
        &self, snapshot: &SyncSnapshot, first_page: &[Listing],
    ) -> Result<UpsertStats, Error> {
        let snapshot = snapshot.clone();
        let first_page = first_page.to_vec();
        let filters_json = serde_json::to_string(&snapshot.filters)?;
        let cursors_json = serde_json::to_string(&snapshot.cursors)?;
        let now = timestamp(Utc::now());

        self.conn
            .call(move |conn| -> Result<UpsertStats, Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO sync_snapshots (
                        id, key_hash, search_term, filters_json,
                        ne_lat, ne_lng, sw_lat, sw_lng, viewport_width, viewport_height,
                        mid_lat, mid_lng, zoom, cursors_json, created_at, expires_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                    params![
                        &snapshot.id,
                        &snapshot.key,
                        &snapshot.search_term,
                        filters_json,
                        snapshot.bounding_box.ne_lat,
                        snapshot.bounding_box.ne_lng,
                        snapshot.bounding_box.sw_lat,
                        snapshot.bounding_box.sw_lng,
                        snapshot.viewport.width,
                        snapshot.viewport.height,
                        snapshot.midpoint.latitude,
                        snapshot.midpoint.longitude,
                        snapshot.zoom,
                        cursors_json,
                        &snapshot.created_at,
                        &snapshot.expires_at,
                    ],
                )?;
                let stats = upsert_listings_on(&tx, &first_page, &now)?;
                store_page_on(&tx, &snapshot.id, snapshot.first_cursor(), &first_page, &now)?;
                tx.commit()?;
                Ok(stats)
            })
            .await
            .map_err(Error::from)
    }

    /// Get a snapshot by id, expired or not.
    pub async fn get_sync_snapshot(&self, id: &str) -> Result<Option<SyncSnapshot>, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<SyncSnapshot>, Error> {
                let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM sync_snapshots WHERE id = ?1");
                let row = conn.query_row(&sql, params![id], snapshot_from_row).optional()?;
                row.map(SnapshotRow::decode).transpose()
            })
            .await
            .map_err(Error::from)
    }

    /// Newest snapshot for `key` that is still live at `now`.
    pub async fn find_live_snapshot(&self, key: &str, now: DateTime<Utc>) -> Result<Option<SyncSnapshot>, Error> {
        let key = key.to_string();
        let now = timestamp(now);
        self.conn
            .call(move |conn| -> Result<Option<SyncSnapshot>, Error> {
                let sql = format!(
                    "SELECT {SNAPSHOT_COLUMNS} FROM sync_snapshots
                     WHERE key_hash = ?1 AND expires_at > ?2
                     ORDER BY created_at DESC LIMIT 1"
                );
                let row = conn.query_row(&sql, params![key, now], snapshot_from_row).optional()?;
                row.map(SnapshotRow::decode).transpose()
            })
            .await
            .map_err(Error::from)
    }

    /// Cached listings of one page, in source order. `None` if not fetched yet.
    pub async fn get_page_listings(&self, snapshot_id: &str, cursor: &str) -> Result<Option<Vec<Listing>>, Error> {
        let snapshot_id = snapshot_id.to_string();
        let cursor = cursor.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Vec<Listing>>, Error> {
                let ids_json: Option<String> = conn
                    .query_row(
                        "SELECT listing_ids_json FROM sync_pages WHERE snapshot_id = ?1 AND cursor = ?2",
                        params![snapshot_id, cursor],
                        |row| row.get(0),
                    )
                    .optional()?;

                match ids_json {
                    Some(json) => {
                        let ids: Vec<String> = serde_json::from_str(&json)?;
                        Ok(Some(get_listings_on(conn, &ids)?))
                    }
                    None => Ok(None),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Upsert a page's listings and record the page.
    ///
    /// A second write for the same (snapshot_id, cursor) replaces the first.
    pub async fn put_page(&self, snapshot_id: &str, cursor: &str, listings: &[Listing]) -> Result<UpsertStats, Error> {
        let snapshot_id = snapshot_id.to_string();
        let cursor = cursor.to_string();
        let listings = listings.to_vec();
        let now = timestamp(Utc::now());
        self.conn
            .call(move |conn| -> Result<UpsertStats, Error> {
                let tx = conn.transaction()?;
                let stats = upsert_listings_on(&tx, &listings, &now)?;
                store_page_on(&tx, &snapshot_id, &cursor, &listings, &now)?;
                tx.commit()?;
                Ok(stats)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of materialized pages for a snapshot.
    pub async fn count_pages(&self, snapshot_id: &str) -> Result<u64, Error> {
        let snapshot_id = snapshot_id.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sync_pages WHERE snapshot_id = ?1",
                    params![snapshot_id],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete snapshots expired at `now`; their pages go with them.
    ///
    /// Returns the number of deleted snapshots.
    pub async fn purge_expired_snapshots(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let now = timestamp(now);
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM sync_snapshots WHERE expires_at <= ?1", params![now])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

fn store_page_on(
    conn: &rusqlite::Connection, snapshot_id: &str, cursor: &str, listings: &[Listing], now: &str,
) -> Result<(), Error> {
    let ids: Vec<&str> = listings.iter().map(|l| l.external_id.as_str()).collect();
    let ids_json = serde_json::to_string(&ids)?;
    conn.execute(
        "INSERT INTO sync_pages (snapshot_id, cursor, listing_ids_json, fetched_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(snapshot_id, cursor) DO UPDATE SET
            listing_ids_json = excluded.listing_ids_json,
            fetched_at = excluded.fetched_at",
        params![snapshot_id, cursor, ids_json, now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hash::{snapshot_id, snapshot_key};
    use crate::model::SearchFilters;
    use chrono::Duration;

    fn bbox() -> BoundingBox {
        BoundingBox { ne_lat: 19.43, ne_lng: -99.15, sw_lat: 19.41, sw_lng: -99.17 }
    }

    fn make_snapshot(ttl: Duration, cursors: &[&str]) -> SyncSnapshot {
        let created = Utc::now();
        let key = snapshot_key("cdmx", &SearchFilters::default(), &bbox());
        let created_at = timestamp(created);
        SyncSnapshot {
            id: snapshot_id(&key, &created_at),
            key,
            search_term: "cdmx".into(),
            filters: SearchFilters { adults: Some(2), ..Default::default() },
            bounding_box: bbox(),
            viewport: Viewport { width: 936, height: 925 },
            midpoint: bbox().center(),
            zoom: 14,
            cursors: cursors.iter().map(|c| c.to_string()).collect(),
            created_at,
            expires_at: timestamp(created + ttl),
        }
    }

    fn listing(id: &str) -> Listing {
        Listing {
            external_id: id.into(),
            name: id.into(),
            price: None,
            rating_label: None,
            coordinate: Coordinate::new(19.42, -99.16),
            images: vec![],
            link: format!("https://example.com/rooms/{id}"),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_snapshot() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let snapshot = make_snapshot(Duration::hours(1), &["c0", "c1"]);
        db.insert_sync_snapshot(&snapshot, &[listing("a"), listing("b")])
            .await
            .unwrap();

        let got = db.get_sync_snapshot(&snapshot.id).await.unwrap().unwrap();
        assert_eq!(got, snapshot);

        let page = db.get_page_listings(&snapshot.id, "c0").await.unwrap().unwrap();
        assert_eq!(page.iter().map(|l| l.external_id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(db.get_page_listings(&snapshot.id, "c1").await.unwrap().is_none());
        assert_eq!(db.count_pages(&snapshot.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_live_snapshot_skips_expired() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let expired = make_snapshot(Duration::seconds(-1), &["c0"]);
        db.insert_sync_snapshot(&expired, &[]).await.unwrap();

        assert!(db.find_live_snapshot(&expired.key, Utc::now()).await.unwrap().is_none());

        let live = make_snapshot(Duration::hours(1), &["c0"]);
        db.insert_sync_snapshot(&live, &[]).await.unwrap();
        let found = db.find_live_snapshot(&live.key, Utc::now()).await.unwrap().unwrap();
        assert_eq!(found.id, live.id);
    }

    #[tokio::test]
    async fn test_purge_cascades_pages() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let expired = make_snapshot(Duration::seconds(-1), &["c0", "c1"]);
        db.insert_sync_snapshot(&expired, &[listing("a")]).await.unwrap();
        db.put_page(&expired.id, "c1", &[listing("b")]).await.unwrap();

        let deleted = db.purge_expired_snapshots(Utc::now()).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.count_pages(&expired.id).await.unwrap(), 0);
        assert!(db.get_sync_snapshot(&expired.id).await.unwrap().is_none());
        assert_eq!(db.count_listings().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_get_missing_snapshot() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.get_sync_snapshot("nonexistent").await.unwrap().is_none());
    }
}
