use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::StoreError;
use crate::models::Summaries;

/// Wholesale persistence for the summary store.
pub trait SummaryStore {
    fn load(&self) -> Result<Summaries, StoreError>;
    fn save(&self, summaries: &Summaries) -> Result<(), StoreError>;
}

/// Pretty-printed JSON object keyed by item code.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SummaryStore for JsonFileStore {
    fn load(&self) -> Result<Summaries, StoreError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        let summaries: Summaries =
            serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })?;
        for (item, summary) in &summaries {
            if let Some(month) = summary
                .seasonality
                .keys()
                .copied()
                .find(|month| !(1..=12).contains(month))
            {
                return Err(StoreError::InvalidSeasonality {
                    path: self.path.clone(),
                    item: item.clone(),
                    month,
                });
            }
        }
        info!(path = %self.path.display(), items = summaries.len(), "loaded summary store");
        Ok(summaries)
    }

    fn save(&self, summaries: &Summaries) -> Result<(), StoreError> {
        let encoded = serde_json::to_string_pretty(summaries)?;
        let staging = self.path.with_extension("json.tmp");
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        std::fs::write(&staging, encoded).map_err(write_err)?;
        std::fs::rename(&staging, &self.path).map_err(write_err)?;
        info!(path = %self.path.display(), items = summaries.len(), "saved summary store");
        Ok(())
    }
}
