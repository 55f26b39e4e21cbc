use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;
use tracing::info;

use crate::forecast::{to_quantity, DemandModel};
use crate::models::{ItemAccuracy, Observation};
use crate::settings::EngineConfig;
use crate::summary::{apply_observation, build_summary};

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Rolling one-step backtest for one item: seed from all but the last
/// `holdout` months, then predict each held-out month before folding it in.
///
/// Items need at least `min_backtest_history` known months, and never fewer
/// than `min_history + holdout`.
pub fn backtest_item(
    item_code: &str,
    history: &[&Observation],
    model: &dyn DemandModel,
    config: &EngineConfig,
) -> Option<ItemAccuracy> {
    let mut known: Vec<(NaiveDate, u64)> = history
        .iter()
        .filter_map(|obs| obs.quantity.map(|qty| (obs.period, qty)))
        .collect();
    known.sort_by_key(|(period, _)| *period);
    let required = config
        .min_backtest_history
        .max(config.min_history + config.holdout);
    if known.len() < required {
        return None;
    }

    let split = known.len() - config.holdout;
    let train: Vec<Observation> = known[..split]
        .iter()
        .map(|(period, qty)| Observation {
            item_code: item_code.to_string(),
            period: *period,
            quantity: Some(*qty),
            description: String::new(),
        })
        .collect();
    let train_refs: Vec<&Observation> = train.iter().collect();
    let mut summary = build_summary(&train_refs, config).ok()?;

    let mut total_error = 0.0;
    let mut total_actual = 0.0;
    let mut evaluated = 0usize;
    for (period, actual) in &known[split..] {
        if let Some(raw) = model.predict(&summary, period.month()) {
            total_error += (to_quantity(raw) as f64 - *actual as f64).abs();
            total_actual += *actual as f64;
            evaluated += 1;
        }
        apply_observation(&mut summary, *period, *actual, config).ok()?;
    }
    if evaluated == 0 {
        return None;
    }

    let mae = total_error / evaluated as f64;
    let percentage_error = (total_actual > 0.0).then(|| round2(mae / total_actual * 100.0));
    Some(ItemAccuracy {
        item_code: item_code.to_string(),
        mae: round2(mae),
        percentage_error,
        evaluated,
    })
}

/// Backtests every item with enough history, best percentage error first.
pub fn backtest(
    observations: &[Observation],
    model: &dyn DemandModel,
    config: &EngineConfig,
) -> Vec<ItemAccuracy> {
    let mut by_item: BTreeMap<&str, Vec<&Observation>> = BTreeMap::new();
    for observation in observations {
        by_item
            .entry(observation.item_code.as_str())
            .or_default()
            .push(observation);
    }

    let mut results: Vec<ItemAccuracy> = by_item
        .par_iter()
        .filter_map(|(item, history)| backtest_item(item, history, model, config))
        .collect();

    results.sort_by(|a, b| {
        let by_error = match (a.percentage_error, b.percentage_error) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_error.then_with(|| a.item_code.cmp(&b.item_code))
    });

    info!(
        model = model.name(),
        items = by_item.len(),
        evaluated = results.len(),
        "backtest complete"
    );
    results
}
