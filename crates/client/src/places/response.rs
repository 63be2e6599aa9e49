//! Places response parsing.
//!
//! Each place is a positional array:
//! `[place_id, name, [lat, lng], rating?, review_count?, link?]`.
//! Anything short of an id, a name and a valid coordinate is skipped.

use geosync_core::{Coordinate, Poi};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Stable external id for a source place id.
pub fn poi_external_id(place_id: &str) -> String {
    hex::encode(Sha256::digest(place_id.as_bytes()))
}

fn coordinate(value: &Value) -> Option<Coordinate> {
    let pair = value.as_array()?;
    let latitude = pair.first()?.as_f64()?;
    let longitude = pair.get(1)?.as_f64()?;
    let valid = (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude);
    valid.then(|| Coordinate::new(latitude, longitude))
}

/// Parse one positional place record for `category`.
pub fn parse_place(record: &Value, category: &str) -> Option<Poi> {
    let fields = record.as_array()?;
    let place_id = fields.first()?.as_str().filter(|s| !s.is_empty())?;
    let name = fields.get(1)?.as_str()?.trim().to_string();
    let coordinate = coordinate(fields.get(2)?)?;

    let rating = fields.get(3).and_then(Value::as_f64).filter(|r| (0.0..=5.0).contains(r));
    let review_count = fields
        .get(4)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok());
    let link = fields.get(5).and_then(Value::as_str).map(str::to_string);

    Some(Poi {
        external_id: poi_external_id(place_id),
        category: category.to_string(),
        name,
        coordinate,
        rating,
        review_count,
        link,
    })
}

/// Parse a `{"places": [...]}` body. Malformed records are skipped.
pub fn parse_places_response(body: &Value, category: &str) -> Vec<Poi> {
    let Some(records) = body.get("places").and_then(Value::as_array) else {
        return Vec::new();
    };

    let pois: Vec<Poi> = records.iter().filter_map(|r| parse_place(r, category)).collect();
    if pois.len() < records.len() {
        tracing::warn!(category, total = records.len(), kept = pois.len(), "skipped malformed places");
    }
    pois
}
