use std::future::Future;
use std::sync::Arc;
use tracing::{info, debug, error};
use crate::{
    application::pipeline::{PipelineOptions, PipelineOrchestrator},
    config::AppConfig,
    domain::{error::IngestionError, models::RunReport},
    infrastructure::{
        http::{build_client, file_fetcher::HttpFileFetcher, listing_source::HttpListingSource},
        parsers::xls_parser::CalamineExtractor,
        postgres::trade_repo::{ensure_database, PgTradeRepository},
        scratch::ScratchDir,
    },
};

/// Production wiring: HTTP listing and downloads, calamine parsing and a
/// Postgres store. Construction fails before any unit of work is scheduled
/// when the database cannot be reached or prepared.
pub struct IngestionApp {
    pipeline: PipelineOrchestrator,
}

impl IngestionApp {
    pub async fn new(config: &AppConfig) -> Result<Self, IngestionError> {
        debug!("Initializing ingestion app");

        ensure_database(&config.database).await.map_err(|e| {
            error!("Failed to prepare database {}: {}", config.database.name, e);
            e
        })?;
        let repository = PgTradeRepository::connect(&config.database).await?;
        repository.ensure_schema().await?;
        debug!("Postgres repository initialized");

        let client = build_client(config.http_timeout())?;
        let scratch = ScratchDir::new(&config.scratch_dir);
        info!("Using scratch directory {}", scratch.root().display());

        let listing = Arc::new(HttpListingSource::new(
            client.clone(),
            config.listing_url.clone(),
            config.ajax_id.clone(),
        )?);
        let fetcher = Arc::new(HttpFileFetcher::new(
            client,
            config.files_base_url.clone(),
            scratch.clone(),
        ));
        let extractor = Arc::new(CalamineExtractor::new(config.layout.clone()));
        debug!("HTTP adapters and parser initialized");

        let pipeline = PipelineOrchestrator::new(
            listing,
            fetcher,
            extractor,
            Arc::new(repository),
            scratch,
            PipelineOptions::from(config),
        );

        Ok(Self { pipeline })
    }

    pub async fn run_until<F>(&self, shutdown: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        self.pipeline.run_until(shutdown).await
    }
}
