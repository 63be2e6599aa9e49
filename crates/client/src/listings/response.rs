//! Listing search response parsing.
//!
//! The payload is deeply nested and fields come and go between releases, so
//! every lookup is a JSON pointer that may miss. A result without an id,
//! name or coordinate is dropped; everything else is optional.

use std::sync::LazyLock;

use geosync_core::{Coordinate, Listing, ListingPage};
use regex::Regex;
use serde_json::Value;

/// First number in a display price such as "$1,234.50 MXN".
static PRICE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").ok());

/// Numeric amount from a formatted price, ignoring currency symbols and
/// thousands separators.
pub fn parse_price(text: &str) -> Option<f64> {
    let re = PRICE_RE.as_ref()?;
    let digits = re.find(text)?.as_str().replace(',', "");
    digits.parse().ok()
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer)?.as_str()
}

/// Ids arrive as strings or numbers depending on the endpoint version.
fn id_at(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coordinate_at(value: &Value, pointer: &str) -> Option<Coordinate> {
    let node = value.pointer(pointer)?;
    let latitude = node.get("latitude")?.as_f64()?;
    let longitude = node.get("longitude")?.as_f64()?;
    let valid = (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude);
    valid.then(|| Coordinate::new(latitude, longitude))
}

/// Parse one element of `data.results`. `None` if it is unusable.
pub fn parse_listing(result: &Value, base_url: &str) -> Option<Listing> {
    let external_id = id_at(result, "/listing/id")?;
    let name = str_at(result, "/listing/name")?.trim().to_string();
    let coordinate = coordinate_at(result, "/listing/coordinate")?;

    let price = str_at(result, "/pricing/price/amount_formatted").and_then(parse_price);
    let rating_label = str_at(result, "/rating/label")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let images = result
        .pointer("/listing/pictures")
        .and_then(Value::as_array)
        .map(|pictures| {
            pictures
                .iter()
                .filter_map(|p| p.get("url").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let link = str_at(result, "/listing/url")
        .map(str::to_string)
        .unwrap_or_else(|| format!("{base_url}/rooms/{external_id}"));

    Some(Listing { external_id, name, price, rating_label, coordinate, images, link })
}

/// Parse a whole search response. Malformed results are skipped.
pub fn parse_search_response(body: &Value, base_url: &str) -> ListingPage {
    let results = body.pointer("/data/results").and_then(Value::as_array);
    let total = results.map_or(0, Vec::len);

    let listings: Vec<Listing> = results
        .map(|results| results.iter().filter_map(|r| parse_listing(r, base_url)).collect())
        .unwrap_or_default();

    if listings.len() < total {
        tracing::warn!(total, kept = listings.len(), "skipped malformed listing results");
    }

    let cursors = body
        .pointer("/data/pagination/page_cursors")
        .and_then(Value::as_array)
        .map(|cursors| cursors.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    ListingPage { listings, cursors }
}
