use async_trait::async_trait;
use crate::domain::{
    error::IngestionError,
    models::{LocalFile, ReportReference, TradeRecord},
};

/// One page of the paginated report listing.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Returns the references found on `page` (1-based). An empty vector means
    /// the listing is exhausted.
    async fn fetch_page(&self, page: u32) -> Result<Vec<ReportReference>, IngestionError>;
}

#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn fetch(&self, reference: &ReportReference) -> Result<LocalFile, IngestionError>;
}

/// CPU-bound sheet parsing. Called from a blocking worker thread, never from
/// the async scheduler.
pub trait TableExtractor: Send + Sync {
    fn extract(&self, file: &LocalFile) -> Result<Vec<TradeRecord>, IngestionError>;
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    /// Inserts the whole batch in one transaction and returns the row count.
    async fn insert_records(&self, records: &[TradeRecord]) -> Result<u64, IngestionError>;
}
