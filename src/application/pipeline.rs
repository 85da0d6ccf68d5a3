use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, debug, error, warn, Instrument};
use uuid::Uuid;

use crate::{
    application::discovery::{DiscoverySummary, LinkCrawler},
    config::AppConfig,
    domain::{
        error::{IngestionError, Stage},
        models::{LocalFile, ReportReference, RunReport, TradeRecord, UnitOutcome},
        ports::{FileFetcher, ListingSource, TableExtractor, TradeRepository},
    },
    infrastructure::scratch::ScratchDir,
};

const LINK_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub max_concurrent_units: usize,
    pub parse_workers: usize,
    pub max_pages: Option<u32>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_concurrent_units: 16,
            parse_workers: 4,
            max_pages: None,
        }
    }
}

impl From<&AppConfig> for PipelineOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_concurrent_units: config.max_concurrent_units,
            parse_workers: config.parse_workers,
            max_pages: config.max_pages,
        }
    }
}

/// Runs download, parse and persist for every discovered report.
///
/// Units of work run concurrently up to `max_concurrent_units`; parsing runs
/// on the blocking thread pool, at most `parse_workers` at a time. A failing
/// unit is recorded in the [`RunReport`] and never affects its siblings.
/// Scratch files of the run are purged once every unit has finished.
pub struct PipelineOrchestrator {
    listing: Arc<dyn ListingSource>,
    units: Arc<UnitRunner>,
    scratch: ScratchDir,
    options: PipelineOptions,
}

struct UnitRunner {
    fetcher: Arc<dyn FileFetcher>,
    extractor: Arc<dyn TableExtractor>,
    repository: Arc<dyn TradeRepository>,
    parse_slots: Semaphore,
}

struct RunState {
    report: RunReport,
    dates: Vec<NaiveDate>,
    units: JoinSet<UnitOutcome>,
    in_flight: InFlight,
}

/// Last stage entered by every unit without an outcome, keyed by discovery
/// order. Whatever is left after the join set drains was aborted or panicked.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<BTreeMap<usize, (ReportReference, Stage)>>>);

impl InFlight {
    fn entries(&self) -> MutexGuard<'_, BTreeMap<usize, (ReportReference, Stage)>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, id: usize, reference: &ReportReference) {
        self.entries().insert(id, (reference.clone(), Stage::Discovered));
    }

    fn advance(&self, id: usize, stage: Stage) {
        if let Some(entry) = self.entries().get_mut(&id) {
            entry.1 = stage;
        }
    }

    fn finish(&self, id: usize) {
        self.entries().remove(&id);
    }

    fn take_all(&self) -> Vec<(ReportReference, Stage)> {
        std::mem::take(&mut *self.entries()).into_values().collect()
    }
}

impl PipelineOrchestrator {
    pub fn new(
        listing: Arc<dyn ListingSource>,
        fetcher: Arc<dyn FileFetcher>,
        extractor: Arc<dyn TableExtractor>,
        repository: Arc<dyn TradeRepository>,
        scratch: ScratchDir,
        options: PipelineOptions,
    ) -> Self {
        let units = Arc::new(UnitRunner {
            fetcher,
            extractor,
            repository,
            parse_slots: Semaphore::new(options.parse_workers.max(1)),
        });
        Self {
            listing,
            units,
            scratch,
            options,
        }
    }

    pub async fn run(&self) -> RunReport {
        self.run_until(std::future::pending()).await
    }

    /// Like [`run`](Self::run), but abandons in-flight units once `shutdown`
    /// resolves. Scratch files are purged either way.
    pub async fn run_until<F>(&self, shutdown: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("run", run_id = %run_id);
        self.run_inner(run_id, shutdown).instrument(span).await
    }

    async fn run_inner<F>(&self, run_id: String, shutdown: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        info!("Starting ingestion run {}", run_id);
        let (tx, rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let crawler = LinkCrawler::new(self.listing.clone(), self.options.max_pages);
        let mut discovery = tokio::spawn(async move { crawler.crawl(tx).await }.in_current_span());

        let mut state = RunState {
            report: RunReport::new(run_id),
            dates: Vec::new(),
            units: JoinSet::new(),
            in_flight: InFlight::default(),
        };

        tokio::pin!(shutdown);
        let finished = tokio::select! {
            _ = self.drive(rx, &mut discovery, &mut state) => true,
            _ = &mut shutdown => false,
        };

        if !finished {
            warn!("Shutdown requested, abandoning {} in-flight units", state.units.len());
            state.report.cancelled = true;
            discovery.abort();
            state.units.abort_all();
            while let Some(joined) = state.units.join_next().await {
                Self::collect(&mut state.report, joined);
            }
        }

        let cause = if finished { "unit task panicked" } else { "cancelled by shutdown" };
        for (reference, stage) in state.in_flight.take_all() {
            warn!("Unit {} ended without an outcome while {}: {}", reference, stage, cause);
            state.report.record(UnitOutcome::Failed {
                reference,
                stage,
                cause: cause.to_string(),
            });
        }

        state.report.scratch_files_removed = self.scratch.purge(state.dates.iter().copied()).await;
        info!(
            "Run finished: {} succeeded, {} failed, {} records persisted",
            state.report.succeeded_count(),
            state.report.failed_count(),
            state.report.records_persisted
        );
        state.report
    }

    async fn drive(
        &self,
        mut rx: mpsc::Receiver<ReportReference>,
        discovery: &mut JoinHandle<DiscoverySummary>,
        state: &mut RunState,
    ) {
        let unit_slots = Arc::new(Semaphore::new(self.options.max_concurrent_units.max(1)));

        while let Some(reference) = rx.recv().await {
            let id = state.report.discovered;
            state.report.discovered += 1;
            state.dates.push(reference.report_date());
            state.in_flight.insert(id, &reference);
            debug!("[{}] {}", Stage::Discovered, reference);

            // Waiting here also holds back the crawler through the bounded channel.
            let permit = match unit_slots.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Unit limiter closed: {}", e);
                    break;
                }
            };
            let runner = self.units.clone();
            let in_flight = state.in_flight.clone();
            state.units.spawn(
                async move {
                    let _permit = permit;
                    runner.process(id, reference, in_flight).await
                }
                .in_current_span(),
            );

            while let Some(joined) = state.units.try_join_next() {
                Self::collect(&mut state.report, joined);
            }
        }

        match discovery.await {
            Ok(summary) => state.report.discovery_error = summary.error,
            Err(e) => {
                error!("Discovery task failed: {}", e);
                state.report.discovery_error = Some(e.to_string());
            }
        }

        while let Some(joined) = state.units.join_next().await {
            Self::collect(&mut state.report, joined);
        }
    }

    fn collect(report: &mut RunReport, joined: Result<UnitOutcome, tokio::task::JoinError>) {
        match joined {
            Ok(outcome) => report.record(outcome),
            Err(e) if e.is_cancelled() => debug!("Unit task aborted: {}", e),
            Err(e) => error!("Unit task ended abnormally: {}", e),
        }
    }
}

impl UnitRunner {
    async fn process(&self, id: usize, reference: ReportReference, in_flight: InFlight) -> UnitOutcome {
        let result = self.stages(&reference, |stage| in_flight.advance(id, stage)).await;
        in_flight.finish(id);

        match result {
            Ok(Some(records)) => {
                info!("✅ Completed {} ({} records)", reference, records);
                UnitOutcome::Completed { reference, records, stored: true }
            }
            Ok(None) => {
                info!("✅ Completed {} (nothing to store)", reference);
                UnitOutcome::Completed { reference, records: 0, stored: false }
            }
            Err((stage, e)) => {
                error!("Unit {} failed while {}: {}", reference, stage, e);
                UnitOutcome::Failed {
                    reference,
                    stage,
                    cause: e.to_string(),
                }
            }
        }
    }

    /// Runs the unit to completion. `Ok(None)` means there was nothing to store.
    async fn stages<P>(&self, reference: &ReportReference, enter: P) -> Result<Option<usize>, (Stage, IngestionError)>
    where
        P: Fn(Stage),
    {
        enter(Stage::Downloading);
        debug!("[{}] {}", Stage::Downloading, reference);
        let file = self.fetcher.fetch(reference).await
            .map_err(|e| (Stage::Downloading, e))?;

        enter(Stage::Parsing);
        debug!("[{}] {}", Stage::Parsing, file.path.display());
        let records = self.parse(file).await
            .map_err(|e| (Stage::Parsing, e))?;

        if records.is_empty() {
            info!("No records to persist for {}", reference);
            return Ok(None);
        }

        enter(Stage::Persisting);
        debug!("[{}] {} records from {}", Stage::Persisting, records.len(), reference);
        let inserted = self.repository.insert_records(&records).await
            .map_err(|e| (Stage::Persisting, e))?;
        Ok(Some(inserted as usize))
    }

    async fn parse(&self, file: LocalFile) -> Result<Vec<TradeRecord>, IngestionError> {
        let _slot = self.parse_slots.acquire().await
            .map_err(|e| IngestionError::Parse(e.to_string()))?;
        let extractor = self.extractor.clone();
        tokio::task::spawn_blocking(move || extractor.extract(&file))
            .await
            .map_err(|e| IngestionError::Parse(format!("parser worker failed: {}", e)))?
    }
}
