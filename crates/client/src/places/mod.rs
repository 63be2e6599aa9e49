//! Places (POI) search client.
//!
//! `GET {base}/places?q={category}&lat={lat}&lng={lng}` returns
//! `{"places": [[place_id, name, [lat, lng], rating, reviews, link], ...]}`.

pub mod response;

pub use response::{parse_places_response, poi_external_id};

use async_trait::async_trait;
use geosync_core::{Coordinate, Error, Poi, PoiSource};
use serde::Serialize;

use crate::error::SourceError;
use crate::http::{HttpSource, SourceConfig};

#[derive(Debug, Serialize)]
struct PlacesQuery<'a> {
    q: &'a str,
    lat: f64,
    lng: f64,
}

/// HTTP client for the places service.
#[derive(Debug, Clone)]
pub struct PlacesClient {
    http: HttpSource,
}

impl PlacesClient {
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        Ok(Self { http: HttpSource::new("places", config)? })
    }

    /// POIs of `category` around `center`.
    pub async fn search(&self, category: &str, center: Coordinate) -> Result<Vec<Poi>, SourceError> {
        let category = category.trim();
        if category.is_empty() {
            return Err(SourceError::InvalidRequest("category cannot be empty".into()));
        }

        let query = PlacesQuery { q: category, lat: center.latitude, lng: center.longitude };
        let body = self.http.get_json("places", &query).await?;
        Ok(parse_places_response(&body, category))
    }
}

#[async_trait]
impl PoiSource for PlacesClient {
    async fn fetch_near(&self, category: &str, coordinate: Coordinate) -> Result<Vec<Poi>, Error> {
        Ok(self.search(category, coordinate).await?)
    }
}
