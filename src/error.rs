use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

/// Why a single row or item was left out of a run. Never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipReason {
    #[error("insufficient history: need at least {required} observations, got {actual}")]
    InsufficientHistory { required: usize, actual: usize },

    #[error("item has no summary in the store")]
    UnknownItem,

    #[error("malformed observation: {0}")]
    MalformedObservation(String),

    #[error("observation for {period} is not after last update {last_updated}")]
    StaleObservation {
        period: NaiveDate,
        last_updated: NaiveDate,
    },

    #[error("window of {len} values is too short for a trend fit, previous trend kept")]
    DegenerateTrend { len: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read summary store {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("summary store {} is not valid JSON", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "summary store {} has seasonality month {month} for {item} outside 1-12",
        path.display()
    )]
    InvalidSeasonality {
        path: PathBuf,
        item: String,
        month: u32,
    },

    #[error("failed to encode summaries")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write summary store {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to flush {}", path.display())]
    Flush {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
