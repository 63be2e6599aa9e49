//! geosync server entry point.
//!
//! Loads configuration, opens the SQLite store, wires the HTTP sources into
//! the sync engine and serves MCP on stdio.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use geosync_client::{GeocoderClient, ListingsClient, PlacesClient, SourceConfig};
use geosync_core::{AppConfig, CacheDb, GeoSync, Sources};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    let db = CacheDb::open(&config.db_path)
        .await
        .with_context(|| format!("opening store at {}", config.db_path.display()))?;

    let sources = Sources {
        geocoder: Arc::new(GeocoderClient::new(SourceConfig::geocoder(&config))?),
        listings: Arc::new(ListingsClient::new(SourceConfig::listings(&config))?),
        pois: Arc::new(PlacesClient::new(SourceConfig::places(&config))?),
    };
    let engine = GeoSync::new(db, sources, &config);

    match engine.purge().await {
        Ok((snapshots, coverage)) => tracing::info!(snapshots, coverage, "startup purge done"),
        Err(e) => tracing::warn!(error = %e, "startup purge failed"),
    }

    tracing::info!(db_path = %config.db_path.display(), "Starting geosync server on stdio transport");

    let handler = handler::GeoSyncServer::new(engine);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}
