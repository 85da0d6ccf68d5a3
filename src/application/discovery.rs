use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, debug, error, warn};
use crate::domain::{models::ReportReference, ports::ListingSource};

/// Result of crawling the listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub pages: u32,
    pub links: usize,
    pub error: Option<String>,
}

/// Walks listing pages from page 1 and forwards every reference into a
/// channel. Stops at the first empty page, the first failed page, or
/// `max_pages`. Failed pages are not retried.
pub struct LinkCrawler {
    source: Arc<dyn ListingSource>,
    max_pages: Option<u32>,
}

impl LinkCrawler {
    pub fn new(source: Arc<dyn ListingSource>, max_pages: Option<u32>) -> Self {
        Self { source, max_pages }
    }

    pub async fn crawl(&self, tx: mpsc::Sender<ReportReference>) -> DiscoverySummary {
        let mut summary = DiscoverySummary::default();
        let mut page = 1u32;

        loop {
            if self.max_pages.is_some_and(|max| page > max) {
                info!("Reached page limit of {}, stopping discovery", page - 1);
                break;
            }

            let references = match self.source.fetch_page(page).await {
                Ok(references) => references,
                Err(e) => {
                    error!("Discovery stopped at page {}: {}", page, e);
                    summary.error = Some(e.to_string());
                    break;
                }
            };
            summary.pages = page;

            if references.is_empty() {
                debug!("Page {} is empty, listing exhausted", page);
                break;
            }

            for reference in references {
                if tx.send(reference).await.is_err() {
                    warn!("Pipeline stopped accepting links, ending discovery at page {}", page);
                    return summary;
                }
                summary.links += 1;
            }
            page += 1;
        }

        info!("Discovery finished: {} links over {} pages", summary.links, summary.pages);
        summary
    }
}
