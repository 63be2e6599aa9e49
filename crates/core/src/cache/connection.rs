//! The SQLite store handle.

use std::path::Path;
use std::sync::Arc;

use tokio_rusqlite::Connection;

use super::migrations;
use crate::Error;

/// WAL lets page reads proceed while a fetch writes; foreign keys make
/// snapshot deletion cascade to its pages.
const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA busy_timeout = 5000;
     PRAGMA foreign_keys = ON;";

/// Store for snapshots, listings, POIs, coverage and favorites.
///
/// All statements run on the tokio-rusqlite worker thread; clones share it.
#[derive(Clone, Debug)]
pub struct CacheDb {
    pub(crate) conn: Connection,
}

impl CacheDb {
    /// Open (or create) the store at `path` and bring its schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let conn = Connection::open(path).await.map_err(|e| Error::Database(Arc::new(e.into())))?;
        tracing::debug!(path = %path.display(), "store opened");
        Self::prepare(conn).await
    }

    /// Private in-memory store, used by tests and throwaway runs.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(Arc::new(e.into())))?;
        Self::prepare(conn).await
    }

    async fn prepare(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| -> Result<(), Error> { Ok(conn.execute_batch(PRAGMAS)?) })
            .await
            .map_err(Error::from)?;
        migrations::run(&conn).await?;
        Ok(Self { conn })
    }
}
