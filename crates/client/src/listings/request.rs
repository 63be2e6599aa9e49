//! Listing search request parameters and validation.

use chrono::NaiveDate;
use geosync_core::{BoundingBox, SearchFilters};
use serde::Serialize;

use crate::error::SourceError;

/// Query string for `GET {base}/search`.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct ListingSearchRequest {
    /// Free-text place the map is showing.
    pub q: String,

    pub ne_lat: f64,
    pub ne_lng: f64,
    pub sw_lat: f64,
    pub sw_lng: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkin: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub adults: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_min: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_max: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    /// Opaque page cursor; omitted for the first page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl ListingSearchRequest {
    pub fn new(search_term: &str, filters: &SearchFilters, bbox: &BoundingBox, cursor: Option<&str>) -> Self {
        Self {
            q: search_term.to_string(),
            ne_lat: bbox.ne_lat,
            ne_lng: bbox.ne_lng,
            sw_lat: bbox.sw_lat,
            sw_lng: bbox.sw_lng,
            checkin: filters.checkin.clone(),
            checkout: filters.checkout.clone(),
            adults: filters.adults,
            price_min: filters.min_price,
            price_max: filters.max_price,
            currency: filters.currency.clone(),
            cursor: cursor.map(str::to_string),
        }
    }

    /// Reject parameters the listing service would refuse.
    pub fn validate(&self) -> Result<(), SourceError> {
        if self.adults == Some(0) {
            return Err(SourceError::InvalidRequest("adults must be at least 1".into()));
        }

        if let (Some(min), Some(max)) = (self.price_min, self.price_max)
            && min > max
        {
            return Err(SourceError::InvalidRequest(format!("price_min {min} exceeds price_max {max}")));
        }

        let checkin = self.checkin.as_deref().map(|d| parse_date("checkin", d)).transpose()?;
        let checkout = self.checkout.as_deref().map(|d| parse_date("checkout", d)).transpose()?;
        if let (Some(checkin), Some(checkout)) = (checkin, checkout)
            && checkout <= checkin
        {
            return Err(SourceError::InvalidRequest("checkout must be after checkin".into()));
        }

        if let Some(currency) = &self.currency
            && !(currency.len() == 3 && currency.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(SourceError::InvalidRequest(format!("currency {currency} is not an ISO 4217 code")));
        }

        Ok(())
    }
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, SourceError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| SourceError::InvalidRequest(format!("{field} {value} is not a YYYY-MM-DD date")))
}
