use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::{debug, info, error};
use crate::domain::{error::IngestionError, models::ReportReference, ports::ListingSource};

/// Report links from 2023 onwards, each followed by its `?r=` cache buster.
pub const REPORT_LINK_PATTERN: &str =
    r#"href="(/upload/reports/oil_xls/oil_xls_20(?:2[3-9]|[3-9]\d)\d{10}\.xls\?r=\d+)"#;

pub struct HttpListingSource {
    client: Client,
    listing_url: String,
    ajax_id: String,
    pattern: Regex,
}

impl HttpListingSource {
    pub fn new(client: Client, listing_url: String, ajax_id: String) -> Result<Self, IngestionError> {
        debug!("Initializing listing source for {}", listing_url);
        let pattern = Regex::new(REPORT_LINK_PATTERN)
            .map_err(|e| IngestionError::Config(e.to_string()))?;
        Ok(Self { client, listing_url, ajax_id, pattern })
    }

    fn page_url(&self, page: u32) -> String {
        format!("{}?page=page-{}&bxajaxid={}", self.listing_url, page, self.ajax_id)
    }
}

/// Pulls every report reference out of a listing page, in page order.
pub fn extract_references(pattern: &Regex, html: &str) -> Vec<ReportReference> {
    pattern
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| ReportReference::new(m.as_str()))
        .collect()
}

#[async_trait]
impl ListingSource for HttpListingSource {
    async fn fetch_page(&self, page: u32) -> Result<Vec<ReportReference>, IngestionError> {
        let url = self.page_url(page);
        debug!("Requesting listing page {}: {}", page, url);

        let response = self.client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!("Listing request failed for {}: {}", url, e);
                IngestionError::Discovery(e.to_string())
            })?;

        let html = response.text().await
            .map_err(|e| IngestionError::Discovery(e.to_string()))?;

        let references = extract_references(&self.pattern, &html);
        info!("Listing page {} yielded {} report links", page, references.len());
        Ok(references)
    }
}
