use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Sentinel row {sentinel:?} not found before row {last_row}")]
    MissingSentinel { sentinel: String, last_row: u32 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestionError {
    /// Parse failures include the bounded sentinel scan.
    pub fn is_parse(&self) -> bool {
        matches!(self, IngestionError::Parse(_) | IngestionError::MissingSentinel { .. })
    }
}

impl From<sqlx::Error> for IngestionError {
    fn from(e: sqlx::Error) -> Self {
        IngestionError::Storage(e.to_string())
    }
}

/// Stage of a unit of work, used both for progress logging and to tag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovered,
    Downloading,
    Parsing,
    Persisting,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Discovered => "discovered",
            Stage::Downloading => "downloading",
            Stage::Parsing => "parsing",
            Stage::Persisting => "persisting",
        };
        f.write_str(name)
    }
}
