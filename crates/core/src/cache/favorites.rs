//! Favorite listings per user.

use std::collections::HashSet;

use async_trait::async_trait;

use super::connection::CacheDb;
use crate::Error;
use crate::model::timestamp;
use crate::sources::FavoritesStore;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

impl CacheDb {
    /// Mark a listing as favorited. Returns false if it already was.
    pub async fn add_favorite(&self, user_id: &str, listing_id: &str) -> Result<bool, Error> {
        let user_id = user_id.to_string();
        let listing_id = listing_id.to_string();
        let now = timestamp(chrono::Utc::now());
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let inserted = conn.execute(
                    "INSERT INTO favorites (user_id, listing_id, created_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(user_id, listing_id) DO NOTHING",
                    params![user_id, listing_id, now],
                )?;
                Ok(inserted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Remove a favorite. Returns false if there was nothing to remove.
    pub async fn remove_favorite(&self, user_id: &str, listing_id: &str) -> Result<bool, Error> {
        let user_id = user_id.to_string();
        let listing_id = listing_id.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute(
                    "DELETE FROM favorites WHERE user_id = ?1 AND listing_id = ?2",
                    params![user_id, listing_id],
                )?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl FavoritesStore for CacheDb {
    async fn list_favorite_ids(&self, user_id: &str) -> Result<HashSet<String>, Error> {
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| -> Result<HashSet<String>, Error> {
                let mut stmt = conn.prepare_cached("SELECT listing_id FROM favorites WHERE user_id = ?1")?;
                let ids = stmt
                    .query_map(params![user_id], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<HashSet<_>>>()?;
                Ok(ids)
            })
            .await
            .map_err(Error::from)
    }
}
