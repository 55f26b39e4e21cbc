use std::collections::{BTreeMap, VecDeque};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::SkipReason;

/// Summary store contents, keyed by item code.
pub type Summaries = BTreeMap<String, ItemSummary>;

/// One month of demand for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub item_code: String,
    /// Always the first day of the month.
    pub period: NaiveDate,
    pub quantity: Option<u64>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    pub item_code: String,
    pub ship_date: NaiveDate,
    pub quantity: Option<u64>,
    pub description: String,
}

/// Rolling forecasting state for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub mean_qty: f64,
    pub std_dev_qty: f64,
    pub slope: f64,
    pub intercept: f64,
    /// Oldest first. The field name is kept for compatibility with existing stores.
    #[serde(rename = "last_6_months")]
    pub recent_window: VecDeque<f64>,
    pub seasonality: BTreeMap<u32, f64>,
    pub last_updated: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub item_code: String,
    pub predicted_qty: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub item_code: Option<String>,
    /// 1-based CSV line, when the row came from a file.
    pub line: Option<u64>,
    pub reason: SkipReason,
}

/// Outcome of folding one batch of observations into the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: Vec<Skipped>,
    pub trend_retained: Vec<String>,
}

impl BatchReport {
    pub fn skip(&mut self, item_code: Option<&str>, line: Option<u64>, reason: SkipReason) {
        self.skipped.push(Skipped {
            item_code: item_code.map(str::to_string),
            line,
            reason,
        });
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemAccuracy {
    pub item_code: String,
    pub mae: f64,
    pub percentage_error: Option<f64>,
    pub evaluated: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub item_code: String,
    pub item_name: String,
    pub last_restock_qty: u64,
    pub last_restock_date: Option<NaiveDate>,
}
