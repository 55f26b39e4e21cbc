use std::cmp::Ordering;

use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::models::{ItemSummary, Prediction, Summaries};
use crate::period::parse_target_month;
use crate::stats;
use crate::store::SummaryStore;

/// A next-period demand model that reads only an item's summary.
pub trait DemandModel: Sync {
    fn name(&self) -> &'static str;

    /// Unrounded prediction for `target_month` (1-12), or `None` when the
    /// summary carries too little data.
    fn predict(&self, summary: &ItemSummary, target_month: u32) -> Option<f64>;
}

/// Trend extrapolation plus recent average plus seasonal deviation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrendSeasonalModel;

/// Recent average plus seasonal deviation, without the trend term.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecentAverageModel;

fn seasonal_boost(summary: &ItemSummary, target_month: u32) -> f64 {
    let factor = summary
        .seasonality
        .get(&target_month)
        .copied()
        .unwrap_or(summary.mean_qty);
    factor - summary.mean_qty
}

fn recent_average(summary: &ItemSummary) -> Option<f64> {
    if summary.recent_window.len() < 2 {
        return None;
    }
    let window: Vec<f64> = summary.recent_window.iter().copied().collect();
    Some(stats::mean(&window))
}

impl DemandModel for TrendSeasonalModel {
    fn name(&self) -> &'static str {
        "trend-seasonal"
    }

    fn predict(&self, summary: &ItemSummary, target_month: u32) -> Option<f64> {
        let recent_avg = recent_average(summary)?;
        // Continues the window-relative index one step past the newest value.
        let trend_estimate =
            summary.slope * summary.recent_window.len() as f64 + summary.intercept;
        Some(trend_estimate + recent_avg + seasonal_boost(summary, target_month))
    }
}

impl DemandModel for RecentAverageModel {
    fn name(&self) -> &'static str {
        "recent-average"
    }

    fn predict(&self, summary: &ItemSummary, target_month: u32) -> Option<f64> {
        Some(recent_average(summary)? + seasonal_boost(summary, target_month))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ModelKind {
    #[default]
    TrendSeasonal,
    RecentAverage,
}

impl ModelKind {
    pub fn model(self) -> Box<dyn DemandModel> {
        match self {
            ModelKind::TrendSeasonal => Box::new(TrendSeasonalModel),
            ModelKind::RecentAverage => Box::new(RecentAverageModel),
        }
    }
}

/// Rounds half to even and floors at zero.
pub fn to_quantity(raw: f64) -> u64 {
    let rounded = raw.round_ties_even();
    if rounded.is_nan() || rounded <= 0.0 {
        0
    } else {
        rounded as u64
    }
}

/// Orders predictions by quantity descending, then item code ascending.
pub fn rank(predictions: &mut [Prediction]) {
    predictions.sort_by(|a, b| match b.predicted_qty.cmp(&a.predicted_qty) {
        Ordering::Equal => a.item_code.cmp(&b.item_code),
        other => other,
    });
}

/// Predicts every item in the store for `target` and returns them ranked.
pub fn rank_predictions(
    model: &dyn DemandModel,
    summaries: &Summaries,
    target: NaiveDate,
) -> Vec<Prediction> {
    let month = target.month();
    let mut predictions: Vec<Prediction> = summaries
        .par_iter()
        .filter_map(|(item, summary)| {
            let raw = model.predict(summary, month)?;
            Some(Prediction {
                item_code: item.clone(),
                predicted_qty: to_quantity(raw),
            })
        })
        .collect();

    rank(&mut predictions);
    debug!(
        model = model.name(),
        target = %target,
        items = summaries.len(),
        predicted = predictions.len(),
        "ranked predictions"
    );
    predictions
}

/// Loads the store and ranks every item for `month` (`YYYY-MM`).
pub fn forecast_from_store(
    store: &dyn SummaryStore,
    month: &str,
    model: ModelKind,
) -> anyhow::Result<(Summaries, Vec<Prediction>)> {
    let target = parse_target_month(month).map_err(anyhow::Error::msg)?;
    let summaries = store.load()?;
    let predictions = rank_predictions(model.model().as_ref(), &summaries, target);
    Ok((summaries, predictions))
}

/// Runs a forecast for the trigger. Failures land in the payload, never in a panic
/// or an early exit.
pub fn trigger_payload(
    store: &dyn SummaryStore,
    month: &str,
    model: ModelKind,
    limit: usize,
) -> ForecastPayload {
    let result = forecast_from_store(store, month, model)
        .with_context(|| format!("forecast for {month} failed"))
        .map(|(_, mut predictions)| {
            predictions.truncate(limit);
            predictions
        });
    ForecastPayload::from_result(result)
}

/// The forecast trigger payload: exactly one of a ranked list or an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ForecastPayload {
    Predictions(Vec<Prediction>),
    Error { error: String },
}

impl ForecastPayload {
    pub fn from_result(result: anyhow::Result<Vec<Prediction>>) -> Self {
        match result {
            Ok(predictions) => ForecastPayload::Predictions(predictions),
            Err(err) => ForecastPayload::Error {
                error: format!("{err:#}"),
            },
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            serde_json::json!({ "error": err.to_string() }).to_string()
        })
    }
}
