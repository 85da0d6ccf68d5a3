use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::domain::error::IngestionError;

/// Transient download directory. Files are keyed by report date, so each
/// unit of work writes its own file.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.root.join(format!("{}.xls", date.format("%Y-%m-%d")))
    }

    pub async fn ensure(&self) -> Result<(), IngestionError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Deletes the scratch files for `dates`. Missing files are skipped and
    /// other failures are logged; returns how many files were removed.
    pub async fn purge<I>(&self, dates: I) -> usize
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        let paths: BTreeSet<PathBuf> = dates.into_iter().map(|d| self.path_for(d)).collect();
        let mut removed = 0;

        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("Removed scratch file {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove scratch file {}: {}", path.display(), e),
            }
        }
        removed
    }
}
