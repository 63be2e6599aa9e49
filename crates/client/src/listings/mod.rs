//! Listing search client.
//!
//! ### Endpoint
//!
//! - `GET {base}/search` with the visible bounding box, search filters and an
//!   optional page cursor as query parameters.
//! - Optional `X-Api-Key` header.
//! - Response: `data.results[]` of nested listing objects and
//!   `data.pagination.page_cursors[]` with every page cursor of the search.

pub mod request;
pub mod response;

pub use request::ListingSearchRequest;
pub use response::{parse_price, parse_search_response};

use async_trait::async_trait;
use geosync_core::{BoundingBox, Error, ListingPage, ListingSource, SearchFilters};

use crate::error::SourceError;
use crate::http::{HttpSource, SourceConfig};

/// HTTP client for the listing search service.
#[derive(Debug, Clone)]
pub struct ListingsClient {
    http: HttpSource,
}

impl ListingsClient {
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        Ok(Self { http: HttpSource::new("listings", config)? })
    }

    /// Fetch one page of listings.
    pub async fn search(&self, req: &ListingSearchRequest) -> Result<ListingPage, SourceError> {
        req.validate()?;
        tracing::debug!(q = %req.q, cursor = ?req.cursor, "searching listings");

        let body = self.http.get_json("search", req).await?;
        let page = parse_search_response(&body, self.http.base_url());

        tracing::debug!(listings = page.listings.len(), cursors = page.cursors.len(), "listing search done");
        Ok(page)
    }
}

#[async_trait]
impl ListingSource for ListingsClient {
    async fn fetch_page(
        &self, search_term: &str, filters: &SearchFilters, bbox: &BoundingBox, cursor: Option<&str>,
    ) -> Result<ListingPage, Error> {
        let req = ListingSearchRequest::new(search_term, filters, bbox, cursor);
        Ok(self.search(&req).await?)
    }
}
