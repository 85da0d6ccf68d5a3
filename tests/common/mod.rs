#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use calamine::{DataType, Range};
use chrono::NaiveDate;

use spimex_ingestion::config::SheetLayout;
use spimex_ingestion::domain::error::IngestionError;
use spimex_ingestion::domain::models::{LocalFile, ReportReference, TradeRecord};
use spimex_ingestion::domain::ports::{FileFetcher, ListingSource, TableExtractor, TradeRepository};
use spimex_ingestion::infrastructure::parsers::xls_parser::extract_records;
use spimex_ingestion::infrastructure::scratch::ScratchDir;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn link(yyyymmdd: &str) -> String {
    format!("/upload/reports/oil_xls/oil_xls_{}000000.xls?r=1", yyyymmdd)
}

/// Listing with fixed pages; anything past the last page is empty.
pub struct StaticListing {
    pages: Vec<Vec<String>>,
}

impl StaticListing {
    pub fn new(pages: Vec<Vec<String>>) -> Arc<Self> {
        Arc::new(Self { pages })
    }
}

#[async_trait]
impl ListingSource for StaticListing {
    async fn fetch_page(&self, page: u32) -> Result<Vec<ReportReference>, IngestionError> {
        Ok(self
            .pages
            .get(page as usize - 1)
            .map(|paths| paths.iter().filter_map(|p| ReportReference::new(p.as_str())).collect())
            .unwrap_or_default())
    }
}

/// Writes a placeholder file into scratch storage for every reference, except
/// for dates configured to fail or hang.
pub struct FakeFetcher {
    scratch: ScratchDir,
    failing: HashSet<NaiveDate>,
    hanging: HashSet<NaiveDate>,
    panicking: HashSet<NaiveDate>,
    delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeFetcher {
    pub fn new(scratch: ScratchDir) -> Self {
        Self {
            scratch,
            failing: HashSet::new(),
            hanging: HashSet::new(),
            panicking: HashSet::new(),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(mut self, date: NaiveDate) -> Self {
        self.failing.insert(date);
        self
    }

    pub fn hanging_on(mut self, date: NaiveDate) -> Self {
        self.hanging.insert(date);
        self
    }

    pub fn panicking_on(mut self, date: NaiveDate) -> Self {
        self.panicking.insert(date);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn write_placeholder(&self, reference: &ReportReference) -> Result<LocalFile, IngestionError> {
        let date = reference.report_date();
        if self.failing.contains(&date) {
            return Err(IngestionError::Download("HTTP 503 Service Unavailable".into()));
        }
        if self.panicking.contains(&date) {
            panic!("fetcher bug on {}", date);
        }

        self.scratch.ensure().await?;
        let path = self.scratch.path_for(date);
        tokio::fs::write(&path, b"placeholder").await?;

        if self.hanging.contains(&date) {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(LocalFile { path, report_date: date })
    }
}

#[async_trait]
impl FileFetcher for FakeFetcher {
    async fn fetch(&self, reference: &ReportReference) -> Result<LocalFile, IngestionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.write_placeholder(reference).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Parses prepared in-memory sheets keyed by report date with the real row
/// extraction logic.
pub struct SheetExtractor {
    sheets: HashMap<NaiveDate, Range<DataType>>,
    layout: SheetLayout,
}

impl SheetExtractor {
    pub fn new(sheets: Vec<(NaiveDate, Range<DataType>)>) -> Arc<Self> {
        Arc::new(Self {
            sheets: sheets.into_iter().collect(),
            layout: SheetLayout::default(),
        })
    }
}

impl TableExtractor for SheetExtractor {
    fn extract(&self, file: &LocalFile) -> Result<Vec<TradeRecord>, IngestionError> {
        let range = self
            .sheets
            .get(&file.report_date)
            .ok_or_else(|| IngestionError::Parse(format!("no sheet for {}", file.report_date)))?;
        extract_records(range, &self.layout, file.report_date)
    }
}

/// Keeps every committed batch; batches containing a failing date are
/// rejected whole.
#[derive(Default)]
pub struct RecordingRepository {
    pub batches: Mutex<Vec<Vec<TradeRecord>>>,
    failing: HashSet<NaiveDate>,
}

impl RecordingRepository {
    pub fn failing_on(date: NaiveDate) -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            failing: [date].into_iter().collect(),
        }
    }

    pub fn batches(&self) -> Vec<Vec<TradeRecord>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl TradeRepository for RecordingRepository {
    async fn insert_records(&self, records: &[TradeRecord]) -> Result<u64, IngestionError> {
        if records.iter().any(|r| self.failing.contains(&r.date())) {
            return Err(IngestionError::Storage("connection reset by peer".into()));
        }
        self.batches.lock().unwrap().push(records.to_vec());
        Ok(records.len() as u64)
    }
}

/// Builds a bulletin sheet laid out like the exchange publishes it.
pub struct SheetBuilder {
    range: Range<DataType>,
    next_row: u32,
}

impl SheetBuilder {
    pub fn metric(day: NaiveDate) -> Self {
        Self::with_unit(day, "Единица измерения: Метрическая тонна")
    }

    pub fn with_unit(day: NaiveDate, unit: &str) -> Self {
        let mut range = Range::new((0, 0), (7, 14));
        range.set_value(
            (3, 1),
            DataType::String(format!("Дата торгов: {}", day.format("%d.%m.%Y"))),
        );
        range.set_value((4, 1), DataType::String(unit.to_string()));
        Self { range, next_row: 8 }
    }

    pub fn row(mut self, id: &str, volume: f64, total: f64, count: &str) -> Self {
        let r = self.next_row;
        self.range.set_value((r, 1), DataType::String(id.to_string()));
        self.range.set_value((r, 2), DataType::String(format!("Продукт {}", id)));
        self.range.set_value((r, 3), DataType::String("ст. Ярославль".to_string()));
        self.range.set_value((r, 4), DataType::Float(volume));
        self.range.set_value((r, 5), DataType::Float(total));
        let count = match count.parse::<f64>() {
            Ok(v) => DataType::Float(v),
            Err(_) => DataType::String(count.to_string()),
        };
        self.range.set_value((r, 14), count);
        self.next_row += 1;
        self
    }

    pub fn total(mut self) -> Self {
        self.range.set_value((self.next_row, 1), DataType::String("Итого:".to_string()));
        self.next_row += 1;
        self
    }

    pub fn build(self) -> Range<DataType> {
        self.range
    }
}

/// Sheet with one valid product row.
pub fn single_row_sheet(day: NaiveDate) -> Range<DataType> {
    SheetBuilder::metric(day).row("A100ANK060F", 60.0, 600_000.0, "1").total().build()
}
