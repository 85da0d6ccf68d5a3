use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use crate::domain::error::Stage;

/// Length of a valid exchange product id, e.g. `A100ANK060F`.
pub const PRODUCT_ID_LEN: usize = 11;

fn date_token() -> Option<&'static Regex> {
    static DATE_TOKEN: OnceLock<Option<Regex>> = OnceLock::new();
    DATE_TOKEN.get_or_init(|| Regex::new(r"(\d{8})").ok()).as_ref()
}

/// One remote report as found on a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ReportReference {
    path: String,
    report_date: NaiveDate,
}

impl ReportReference {
    /// Builds a reference from a listing path. Returns `None` when the path
    /// carries no `YYYYMMDD` token, so every constructed reference has a date.
    pub fn new(path: impl Into<String>) -> Option<Self> {
        let path = path.into();
        let token = date_token()?.captures(&path)?.get(1)?.as_str();
        let report_date = NaiveDate::parse_from_str(token, "%Y%m%d").ok()?;
        Some(Self { path, report_date })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn report_date(&self) -> NaiveDate {
        self.report_date
    }
}

impl fmt::Display for ReportReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// A downloaded report sitting in scratch storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub report_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeRecord {
    exchange_product_id: String,
    exchange_product_name: String,
    oil_id: String,
    delivery_basis_id: String,
    delivery_basis_name: String,
    delivery_type_id: String,
    volume: i64,
    total: i64,
    count: i64,
    date: NaiveDate,
}

impl TradeRecord {
    /// Builds a record, deriving the oil, basis and delivery type ids from the
    /// product id. Returns `None` unless the product id is exactly 11 chars.
    pub fn new(
        exchange_product_id: &str,
        exchange_product_name: &str,
        delivery_basis_name: &str,
        volume: i64,
        total: i64,
        count: i64,
        date: NaiveDate,
    ) -> Option<Self> {
        let chars: Vec<char> = exchange_product_id.chars().collect();
        if chars.len() != PRODUCT_ID_LEN {
            return None;
        }

        Some(Self {
            exchange_product_id: exchange_product_id.to_string(),
            exchange_product_name: exchange_product_name.to_string(),
            oil_id: chars[..4].iter().collect(),
            delivery_basis_id: chars[4..7].iter().collect(),
            delivery_basis_name: delivery_basis_name.to_string(),
            delivery_type_id: chars[PRODUCT_ID_LEN - 1].to_string(),
            volume,
            total,
            count,
            date,
        })
    }

    pub fn exchange_product_id(&self) -> &str {
        &self.exchange_product_id
    }

    pub fn exchange_product_name(&self) -> &str {
        &self.exchange_product_name
    }

    pub fn oil_id(&self) -> &str {
        &self.oil_id
    }

    pub fn delivery_basis_id(&self) -> &str {
        &self.delivery_basis_id
    }

    pub fn delivery_basis_name(&self) -> &str {
        &self.delivery_basis_name
    }

    pub fn delivery_type_id(&self) -> &str {
        &self.delivery_type_id
    }

    pub fn volume(&self) -> i64 {
        self.volume
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }
}

/// Terminal state of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// `stored` is false when the report yielded no records and the store was
    /// never called.
    Completed {
        reference: ReportReference,
        records: usize,
        stored: bool,
    },
    Failed {
        reference: ReportReference,
        stage: Stage,
        cause: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitSuccess {
    pub reference: String,
    pub report_date: NaiveDate,
    pub records: usize,
    pub stored: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub reference: String,
    pub report_date: NaiveDate,
    pub stage: Stage,
    pub cause: String,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub discovered: usize,
    pub downloaded: usize,
    pub parsed: usize,
    pub persisted: usize,
    pub records_persisted: usize,
    pub succeeded: Vec<UnitSuccess>,
    pub failed: Vec<UnitFailure>,
    pub discovery_error: Option<String>,
    pub cancelled: bool,
    pub scratch_files_removed: usize,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Self::default()
        }
    }

    /// Folds a terminal unit state into the counters. The failing stage tells
    /// how far the unit got before it stopped.
    pub fn record(&mut self, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Completed { reference, records, stored } => {
                self.downloaded += 1;
                self.parsed += 1;
                if stored {
                    self.persisted += 1;
                }
                self.records_persisted += records;
                self.succeeded.push(UnitSuccess {
                    reference: reference.path().to_string(),
                    report_date: reference.report_date(),
                    records,
                    stored,
                });
            }
            UnitOutcome::Failed { reference, stage, cause } => {
                match stage {
                    Stage::Parsing => self.downloaded += 1,
                    Stage::Persisting => {
                        self.downloaded += 1;
                        self.parsed += 1;
                    }
                    Stage::Discovered | Stage::Downloading => {}
                }
                self.failed.push(UnitFailure {
                    reference: reference.path().to_string(),
                    report_date: reference.report_date(),
                    stage,
                    cause,
                });
            }
        }
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}", self.run_id)?;
        writeln!(
            f,
            "  files: discovered={} downloaded={} parsed={} persisted={} failed={}",
            self.discovered,
            self.downloaded,
            self.parsed,
            self.persisted,
            self.failed_count()
        )?;
        writeln!(f, "  records persisted: {}", self.records_persisted)?;
        writeln!(f, "  scratch files removed: {}", self.scratch_files_removed)?;
        if let Some(err) = &self.discovery_error {
            writeln!(f, "  discovery stopped early: {}", err)?;
        }
        if self.cancelled {
            writeln!(f, "  run was cancelled before all units finished")?;
        }
        for failure in &self.failed {
            writeln!(
                f,
                "  FAILED [{}] {} ({}): {}",
                failure.stage, failure.reference, failure.report_date, failure.cause
            )?;
        }
        Ok(())
    }
}
