pub mod file_fetcher;
pub mod listing_source;

use std::time::Duration;

use reqwest::Client;

use crate::domain::error::IngestionError;

/// Shared client for listing and file requests; reqwest pools connections
/// internally so one instance serves every unit of work.
pub fn build_client(timeout: Duration) -> Result<Client, IngestionError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| IngestionError::Config(e.to_string()))
}
