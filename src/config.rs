use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use tracing::{debug, info};

use crate::domain::error::IngestionError;

const DEFAULT_LISTING_URL: &str = "https://spimex.com/markets/oil_products/trades/results/";
const DEFAULT_FILES_BASE_URL: &str = "https://spimex.com";
const DEFAULT_AJAX_ID: &str = "d609bce6ada86eff0b6f7e49e6bae904";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub listing_url: String,
    pub files_base_url: String,
    pub ajax_id: String,
    pub scratch_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub max_pages: Option<u32>,
    pub max_concurrent_units: usize,
    pub parse_workers: usize,
    pub database: DatabaseConfig,
    pub layout: SheetLayout,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listing_url: DEFAULT_LISTING_URL.to_string(),
            files_base_url: DEFAULT_FILES_BASE_URL.to_string(),
            ajax_id: DEFAULT_AJAX_ID.to_string(),
            scratch_dir: PathBuf::from("excel_files"),
            http_timeout_secs: 60,
            max_pages: None,
            max_concurrent_units: 16,
            parse_workers: 4,
            database: DatabaseConfig::default(),
            layout: SheetLayout::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            name: "my_database".to_string(),
            max_connections: 10,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        self.connect_options_for(&self.name)
    }

    /// Options for another database on the same server, used to reach the
    /// `postgres` maintenance database. Credentials are passed as-is, never
    /// through a URL.
    pub fn connect_options_for(&self, database: &str) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(database);
        if self.password.is_empty() {
            options
        } else {
            options.password(&self.password)
        }
    }
}

/// Zero-based cell coordinates of the bulletin sheet.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SheetLayout {
    pub date_cell: (u32, u32),
    pub unit_cell: (u32, u32),
    pub unit_marker: String,
    pub start_row: u32,
    pub first_column: u32,
    pub contract_column: u32,
    pub sentinel: String,
    pub skip_marker: String,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            date_cell: (3, 1),
            unit_cell: (4, 1),
            unit_marker: "Единица измерения: Метрическая тонна".to_string(),
            start_row: 8,
            first_column: 1,
            contract_column: 14,
            sentinel: "Итого:".to_string(),
            skip_marker: "-".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads the YAML file named by `INGEST_CONFIG` when set, then applies
    /// environment overrides.
    pub fn load() -> Result<Self, IngestionError> {
        let mut config = match std::env::var("INGEST_CONFIG") {
            Ok(path) => Self::from_yaml_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, IngestionError> {
        let path = path.as_ref();
        info!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)
            .map_err(|e| IngestionError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, IngestionError> {
        serde_yaml::from_str(text).map_err(|e| IngestionError::Config(e.to_string()))
    }

    /// Overrides fields from variables returned by `lookup`. Taking the lookup
    /// as a closure keeps this testable without touching the process env.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), IngestionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LISTING_URL") {
            self.listing_url = v;
        }
        if let Some(v) = lookup("FILES_BASE_URL") {
            self.files_base_url = v;
        }
        if let Some(v) = lookup("SCRATCH_DIR") {
            self.scratch_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = parse_var("HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("MAX_PAGES") {
            self.max_pages = Some(parse_var("MAX_PAGES", &v)?);
        }
        if let Some(v) = lookup("MAX_CONCURRENT_UNITS") {
            self.max_concurrent_units = parse_var("MAX_CONCURRENT_UNITS", &v)?;
        }
        if let Some(v) = lookup("PARSE_WORKERS") {
            self.parse_workers = parse_var("PARSE_WORKERS", &v)?;
        }

        let db = &mut self.database;
        if let Some(v) = lookup("DB_HOST") {
            db.host = v;
        }
        if let Some(v) = lookup("DB_PORT") {
            db.port = parse_var("DB_PORT", &v)?;
        }
        if let Some(v) = lookup("DB_USER") {
            db.user = v;
        }
        if let Some(v) = lookup("DB_PASS") {
            db.password = v;
        }
        if let Some(v) = lookup("DB_NAME") {
            db.name = v;
        }
        debug!("Configuration after env overrides: listing={}, scratch={}", self.listing_url, self.scratch_dir.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), IngestionError> {
        if self.max_concurrent_units == 0 {
            return Err(IngestionError::Config("max_concurrent_units must be at least 1".into()));
        }
        if self.parse_workers == 0 {
            return Err(IngestionError::Config("parse_workers must be at least 1".into()));
        }
        if self.http_timeout_secs == 0 {
            return Err(IngestionError::Config("http_timeout_secs must be positive".into()));
        }
        if self.layout.contract_column < self.layout.first_column + 4 {
            return Err(IngestionError::Config(
                "contract_column must follow the five leading data columns".into(),
            ));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, IngestionError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| IngestionError::Config(format!("{}={:?}: {}", key, value, e)))
}
