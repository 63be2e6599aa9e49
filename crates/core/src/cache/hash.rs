//! Content-addressed key generation.

use sha2::{Digest, Sha256};

use crate::geo::BoundingBox;
use crate::model::SearchFilters;

/// Key shared by every snapshot of the same search.
///
/// The search term is trimmed and lowercased, and the box enters at
/// two-decimal precision so sub-kilometer pans map to the same key.
pub fn snapshot_key(search_term: &str, filters: &SearchFilters, bbox: &BoundingBox) -> String {
    let filters_json = serde_json::to_string(filters).unwrap_or_default();
    let [ne_lat, ne_lng, sw_lat, sw_lng] = bbox.rounded_key();

    let mut hasher = Sha256::new();
    hasher.update(search_term.trim().to_lowercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(filters_json.as_bytes());
    hasher.update(b"\n");
    hasher.update(format!("{ne_lat},{ne_lng},{sw_lat},{sw_lng}").as_bytes());
    hex::encode(hasher.finalize())
}

/// Identifier of one snapshot creation.
pub fn snapshot_id(key: &str, created_at: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(b"\n");
    hasher.update(created_at.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}
