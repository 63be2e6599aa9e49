//! Geocoder client for a Nominatim-compatible `/search` endpoint.
//!
//! The first hit wins. Nominatim sends coordinates as strings and the
//! bounding box as `[south, north, west, east]`.

use async_trait::async_trait;
use geosync_core::{BoundingBox, Coordinate, Error, GeocodeResult, Geocoder};
use serde::Serialize;
use serde_json::Value;

use crate::error::SourceError;
use crate::http::{HttpSource, SourceConfig};

#[derive(Debug, Serialize)]
struct GeocodeQuery<'a> {
    q: &'a str,
    format: &'static str,
    limit: u8,
}

/// Numbers arrive as strings from Nominatim, as numbers from some mirrors.
fn number(value: &Value) -> Option<f64> {
    let parsed: Option<f64> = match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Parse one Nominatim hit.
pub fn parse_place(hit: &Value) -> Option<GeocodeResult> {
    let coordinate = Coordinate::new(number(hit.get("lat")?)?, number(hit.get("lon")?)?);

    let bbox = hit.get("boundingbox")?.as_array()?;
    let [south, north, west, east] = [bbox.first()?, bbox.get(1)?, bbox.get(2)?, bbox.get(3)?];
    let bounding_box = BoundingBox { ne_lat: number(north)?, ne_lng: number(east)?, sw_lat: number(south)?, sw_lng: number(west)? };
    bounding_box.validate().ok()?;

    Some(GeocodeResult { coordinate, bounding_box })
}

/// HTTP geocoder client.
#[derive(Debug, Clone)]
pub struct GeocoderClient {
    http: HttpSource,
}

impl GeocoderClient {
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        Ok(Self { http: HttpSource::new("geocoder", config)? })
    }

    /// Resolve a place name. An empty or unusable result is `NotFound`.
    pub async fn lookup(&self, search_term: &str) -> Result<GeocodeResult, SourceError> {
        let term = search_term.trim();
        if term.is_empty() {
            return Err(SourceError::InvalidRequest("search term cannot be empty".into()));
        }

        let query = GeocodeQuery { q: term, format: "json", limit: 1 };
        let body = self.http.get_json("search", &query).await?;

        let hit = body
            .as_array()
            .and_then(|hits| hits.iter().find_map(parse_place))
            .ok_or_else(|| SourceError::NotFound(format!("no place matches {term:?}")))?;

        tracing::debug!(term, lat = hit.coordinate.latitude, lng = hit.coordinate.longitude, "geocoded");
        Ok(hit)
    }
}

#[async_trait]
impl Geocoder for GeocoderClient {
    async fn resolve(&self, search_term: &str) -> Result<GeocodeResult, Error> {
        Ok(self.lookup(search_term).await?)
    }
}
