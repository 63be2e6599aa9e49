//! Schema migrations.
//!
//! Applied versions are recorded in `schema_migrations`. Everything pending
//! runs inside one transaction, so a failed step leaves the schema untouched.

use chrono::Utc;
use tokio_rusqlite::{Connection, params};

use super::Error;
use crate::model::timestamp;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version. Never edit an applied entry; append a new one.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "sync_snapshots",
        sql: include_str!("../../migrations/001_sync_snapshots.sql"),
    },
    Migration { version: 2, name: "pois", sql: include_str!("../../migrations/002_pois.sql") },
    Migration { version: 3, name: "favorites", sql: include_str!("../../migrations/003_favorites.sql") },
];

/// Apply every migration newer than the recorded schema version.
///
/// # Errors
///
/// `MigrationFailed` names the version whose SQL was rejected.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
        )?;
        let current: i64 =
            conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))?;

        let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
        if pending.is_empty() {
            return Ok(());
        }

        let tx = conn.transaction()?;
        for migration in pending {
            tracing::info!(version = migration.version, name = migration.name, "applying migration");
            tx.execute_batch(migration.sql)
                .map_err(|e| Error::MigrationFailed(format!("{} ({}): {e}", migration.version, migration.name)))?;
            tx.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![migration.version, migration.name, timestamp(Utc::now())],
            )?;
        }
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn table_exists(conn: &Connection, name: &'static str) -> bool {
        conn.call(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
                params![name],
                |row| row.get(0),
            )
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_rerun_is_a_no_op() {
        let conn = Connection::open_in_memory().await.unwrap();
        run(&conn).await.unwrap();
        run(&conn).await.unwrap();

        for table in ["sync_snapshots", "sync_pages", "listings", "pois", "poi_coverage", "favorites"] {
            assert!(table_exists(&conn, table).await, "missing table {table}");
        }
    }

    #[tokio::test]
    async fn test_versions_recorded_in_order() {
        let conn = Connection::open_in_memory().await.unwrap();
        run(&conn).await.unwrap();

        let rows: Vec<(i64, String)> = conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT version, name FROM schema_migrations ORDER BY version")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok::<_, tokio_rusqlite::rusqlite::Error>(rows)
            })
            .await
            .unwrap();

        assert_eq!(rows.len(), MIGRATIONS.len());
        assert_eq!(rows[0], (1, "sync_snapshots".to_string()));
        assert_eq!(rows[2].1, "favorites");
    }

    #[test]
    fn test_versions_strictly_increase() {
        assert!(MIGRATIONS.windows(2).all(|w| w[0].version < w[1].version));
    }
}
