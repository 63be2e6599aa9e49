//! SQLite-backed store for sync snapshots, pages, listings, POIs and coverage.
//!
//! This module provides a persistent store using SQLite with async access via
//! tokio-rusqlite. It supports:
//!
//! - Upserts keyed by uniqueness constraints (the only concurrency mechanism)
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - Bounding-box prefiltered radius and nearest-neighbor queries
//! - TTL purges for snapshots and coverage

pub mod connection;
pub mod coverage;
pub mod favorites;
pub mod hash;
pub mod listings;
pub mod migrations;
pub mod pois;
pub mod snapshots;

pub use crate::Error;

pub use connection::CacheDb;
pub use coverage::CoverageRecord;
