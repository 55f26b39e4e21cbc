use std::collections::{BTreeMap, VecDeque};

use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::SkipReason;
use crate::models::{BatchReport, ItemSummary, Observation, Skipped, Summaries};
use crate::settings::{EngineConfig, StatsBasis};
use crate::stats;

/// Whether an update refit the trend or kept the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendUpdate {
    Refit,
    Retained,
}

/// Builds one item's summary from its full history.
///
/// `history` may be in any order and may contain missing quantities; both are
/// normalized here so the result only depends on the set of observations.
pub fn build_summary(
    history: &[&Observation],
    config: &EngineConfig,
) -> Result<ItemSummary, SkipReason> {
    let mut known: Vec<(NaiveDate, f64)> = history
        .iter()
        .filter_map(|obs| obs.quantity.map(|qty| (obs.period, qty as f64)))
        .collect();
    known.sort_by_key(|(period, _)| *period);

    if known.is_empty() || known.len() < config.min_history {
        return Err(SkipReason::InsufficientHistory {
            required: config.min_history,
            actual: known.len(),
        });
    }

    let values: Vec<f64> = known.iter().map(|(_, qty)| *qty).collect();
    let window_start = values.len().saturating_sub(config.window);
    let recent_window: VecDeque<f64> = values[window_start..].iter().copied().collect();

    let basis = match config.seed_basis {
        StatsBasis::FullHistory => &values[..],
        StatsBasis::Window => &values[window_start..],
    };
    let trend = stats::linear_trend(basis).unwrap_or(stats::Trend {
        slope: 0.0,
        intercept: stats::mean(basis),
    });

    let mut buckets: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    for (period, qty) in &known {
        let bucket = buckets.entry(period.month()).or_insert((0.0, 0));
        bucket.0 += qty;
        bucket.1 += 1;
    }
    let seasonality = buckets
        .into_iter()
        .map(|(month, (total, count))| (month, total / count as f64))
        .collect();

    let last_updated = known[known.len() - 1].0;

    Ok(ItemSummary {
        mean_qty: stats::mean(basis),
        std_dev_qty: stats::population_std(basis),
        slope: trend.slope,
        intercept: trend.intercept,
        recent_window,
        seasonality,
        last_updated,
    })
}

/// Builds summaries for every item in a history. Items are independent, so
/// they are built in parallel and merged into one ordered map.
pub fn build_summaries(
    observations: &[Observation],
    config: &EngineConfig,
) -> (Summaries, Vec<Skipped>) {
    let mut by_item: BTreeMap<&str, Vec<&Observation>> = BTreeMap::new();
    for observation in observations {
        by_item
            .entry(observation.item_code.as_str())
            .or_default()
            .push(observation);
    }

    let built: Vec<(&str, Result<ItemSummary, SkipReason>)> = by_item
        .par_iter()
        .map(|(item, history)| (*item, build_summary(history, config)))
        .collect();

    let mut summaries = Summaries::new();
    let mut skipped = Vec::new();
    for (item, result) in built {
        match result {
            Ok(summary) => {
                summaries.insert(item.to_string(), summary);
            }
            Err(reason) => {
                debug!(item, %reason, "item left out of summary store");
                skipped.push(Skipped {
                    item_code: Some(item.to_string()),
                    line: None,
                    reason,
                });
            }
        }
    }

    info!(
        items = by_item.len(),
        summarized = summaries.len(),
        skipped = skipped.len(),
        "built item summaries"
    );
    (summaries, skipped)
}

/// Folds one new month into an existing summary.
///
/// Mean, spread and trend are recomputed over the trailing window only, with
/// indices relative to the window.
pub fn apply_observation(
    summary: &mut ItemSummary,
    period: NaiveDate,
    quantity: u64,
    config: &EngineConfig,
) -> Result<TrendUpdate, SkipReason> {
    if period <= summary.last_updated {
        return Err(SkipReason::StaleObservation {
            period,
            last_updated: summary.last_updated,
        });
    }

    let qty = quantity as f64;
    summary.recent_window.push_back(qty);
    while summary.recent_window.len() > config.window {
        summary.recent_window.pop_front();
    }

    let window: Vec<f64> = summary.recent_window.iter().copied().collect();
    summary.mean_qty = stats::mean(&window);
    summary.std_dev_qty = stats::population_std(&window);

    let update = match stats::linear_trend(&window) {
        Some(trend) => {
            summary.slope = trend.slope;
            summary.intercept = trend.intercept;
            TrendUpdate::Refit
        }
        None => TrendUpdate::Retained,
    };

    let previous = summary
        .seasonality
        .get(&period.month())
        .copied()
        .unwrap_or(qty);
    let weight = config.seasonal_weight;
    summary
        .seasonality
        .insert(period.month(), previous * (1.0 - weight) + qty * weight);

    summary.last_updated = period;
    Ok(update)
}

/// Applies a batch of observations to the store. Rows are folded in
/// chronological order; any row that cannot be applied is reported and the
/// rest of the batch continues.
///
/// `lines` carries the source CSV line of each observation when known.
pub fn apply_batch(
    summaries: &mut Summaries,
    batch: &[Observation],
    lines: Option<&[u64]>,
    config: &EngineConfig,
) -> BatchReport {
    let mut report = BatchReport::default();

    let mut order: Vec<usize> = (0..batch.len()).collect();
    order.sort_by_key(|&index| batch[index].period);

    for index in order {
        let observation = &batch[index];
        let line = lines.and_then(|lines| lines.get(index).copied());
        let item = observation.item_code.as_str();

        let Some(summary) = summaries.get_mut(item) else {
            warn!(item, "skipping observation for unknown item");
            report.skip(Some(item), line, SkipReason::UnknownItem);
            continue;
        };

        let Some(quantity) = observation.quantity else {
            warn!(item, period = %observation.period, "skipping observation without quantity");
            report.skip(
                Some(item),
                line,
                SkipReason::MalformedObservation("missing quantity".to_string()),
            );
            continue;
        };

        match apply_observation(summary, observation.period, quantity, config) {
            Ok(update) => {
                report.processed += 1;
                if update == TrendUpdate::Retained {
                    let reason = SkipReason::DegenerateTrend {
                        len: summary.recent_window.len(),
                    };
                    debug!(item, %reason, "trend not refit");
                    report.trend_retained.push(item.to_string());
                }
            }
            Err(reason) => {
                warn!(item, %reason, "skipping observation");
                report.skip(Some(item), line, reason);
            }
        }
    }

    info!(
        processed = report.processed,
        skipped = report.skipped.len(),
        "applied observation batch"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(year: i32, month: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, 1).unwrap()
    }

    fn obs(item: &str, year: i32, month: u32, quantity: Option<u64>) -> Observation {
        Observation {
            item_code: item.to_string(),
            period: ymd(year, month),
            quantity,
            description: String::new(),
        }
    }

    fn a1_summary() -> ItemSummary {
        ItemSummary {
            mean_qty: 15.0,
            std_dev_qty: 3.415650255319866,
            slope: 2.0,
            intercept: 10.0,
            recent_window: vec![10.0, 12.0, 14.0, 16.0, 18.0, 20.0].into(),
            seasonality: BTreeMap::from([(4, 15.0)]),
            last_updated: ymd(2025, 4),
        }
    }

    #[test]
    fn builder_uses_full_history_for_statistics() {
        let history: Vec<Observation> = (1..=8)
            .map(|month| obs("A1", 2024, month, Some(month as u64 * 2)))
            .collect();
        let refs: Vec<&Observation> = history.iter().collect();

        let summary = build_summary(&refs, &EngineConfig::default()).unwrap();

        assert_eq!(summary.mean_qty, 9.0);
        assert!((summary.std_dev_qty - 4.58257569495584).abs() < 1e-9);
        assert!((summary.slope - 2.0).abs() < 1e-12);
        assert!((summary.intercept - 2.0).abs() < 1e-12);
        assert_eq!(
            summary.recent_window,
            VecDeque::from(vec![6.0, 8.0, 10.0, 12.0, 14.0, 16.0])
        );
        assert_eq!(summary.seasonality.len(), 8);
        assert_eq!(summary.seasonality[&3], 6.0);
        assert_eq!(summary.last_updated, ymd(2024, 8));
    }

    #[test]
    fn builder_sorts_history_and_drops_missing() {
        let mut history = vec![
            obs("A1", 2024, 3, Some(3)),
            obs("A1", 2024, 1, Some(1)),
            obs("A1", 2024, 2, None),
        ];
        history.extend((4..=9).map(|month| obs("A1", 2024, month, Some(month as u64))));
        let refs: Vec<&Observation> = history.iter().rev().collect();

        let summary = build_summary(&refs, &EngineConfig::default()).unwrap();

        assert_eq!(
            summary.recent_window,
            VecDeque::from(vec![4.0, 5.0, 6.0, 7.0, 8.0, 9.0])
        );
        assert!(!summary.seasonality.contains_key(&2));
        assert_eq!(summary.last_updated, ymd(2024, 9));
    }

    #[test]
    fn seasonality_averages_same_month_across_years() {
        let mut history: Vec<Observation> = (1..=12)
            .map(|month| obs("S", 2023, month, Some(10)))
            .collect();
        history.push(obs("S", 2024, 1, Some(30)));
        let refs: Vec<&Observation> = history.iter().collect();

        let summary = build_summary(&refs, &EngineConfig::default()).unwrap();
        assert_eq!(summary.seasonality[&1], 20.0);
        assert_eq!(summary.seasonality[&2], 10.0);
    }

    #[test]
    fn window_basis_matches_incremental_statistics() {
        let config = EngineConfig {
            seed_basis: StatsBasis::Window,
            ..EngineConfig::default()
        };
        let history: Vec<Observation> = (1..=8)
            .map(|month| obs("A1", 2024, month, Some(month as u64 * 2)))
            .collect();
        let refs: Vec<&Observation> = history.iter().collect();

        let summary = build_summary(&refs, &config).unwrap();
        assert_eq!(summary.mean_qty, 11.0);
        assert!((summary.slope - 2.0).abs() < 1e-12);
        assert!((summary.intercept - 6.0).abs() < 1e-12);
    }

    #[test]
    fn short_histories_are_rejected() {
        let history: Vec<Observation> = (1..=5)
            .map(|month| obs("NEW", 2024, month, Some(1)))
            .collect();
        let refs: Vec<&Observation> = history.iter().collect();

        let err = build_summary(&refs, &EngineConfig::default()).unwrap_err();
        assert_eq!(
            err,
            SkipReason::InsufficientHistory {
                required: 6,
                actual: 5
            }
        );
    }

    #[test]
    fn build_summaries_reports_cold_items() {
        let mut history: Vec<Observation> = (1..=6)
            .map(|month| obs("A1", 2024, month, Some(5)))
            .collect();
        history.push(obs("B2", 2024, 1, Some(9)));

        let (summaries, skipped) = build_summaries(&history, &EngineConfig::default());
        assert_eq!(summaries.keys().collect::<Vec<_>>(), vec!["A1"]);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].item_code.as_deref(), Some("B2"));
    }

    #[test]
    fn update_slides_window_and_recomputes_mean() {
        let mut summary = a1_summary();
        let update =
            apply_observation(&mut summary, ymd(2025, 5), 22, &EngineConfig::default()).unwrap();

        assert_eq!(update, TrendUpdate::Refit);
        assert_eq!(
            summary.recent_window,
            VecDeque::from(vec![12.0, 14.0, 16.0, 18.0, 20.0, 22.0])
        );
        assert_eq!(summary.mean_qty, 17.0);
        assert!((summary.slope - 2.0).abs() < 1e-12);
        assert!((summary.intercept - 12.0).abs() < 1e-12);
        assert_eq!(summary.seasonality[&5], 22.0);
        assert_eq!(summary.last_updated, ymd(2025, 5));
    }

    #[test]
    fn seasonality_blends_existing_month() {
        let mut summary = a1_summary();
        summary.last_updated = ymd(2025, 3);
        apply_observation(&mut summary, ymd(2025, 4), 25, &EngineConfig::default()).unwrap();
        assert_eq!(summary.seasonality[&4], 20.0);
    }

    #[test]
    fn cold_window_matches_direct_population_statistics() {
        let mut summary = ItemSummary {
            mean_qty: 0.0,
            std_dev_qty: 0.0,
            slope: 0.0,
            intercept: 0.0,
            recent_window: VecDeque::new(),
            seasonality: BTreeMap::new(),
            last_updated: ymd(2023, 12),
        };
        let values = [3u64, 8, 1, 9, 4, 7];
        for (offset, qty) in values.iter().enumerate() {
            apply_observation(
                &mut summary,
                ymd(2024, offset as u32 + 1),
                *qty,
                &EngineConfig::default(),
            )
            .unwrap();
            assert!(summary.recent_window.len() <= 6);
        }

        let direct: Vec<f64> = values.iter().map(|v| *v as f64).collect();
        assert_eq!(summary.mean_qty, stats::mean(&direct));
        assert_eq!(summary.std_dev_qty, stats::population_std(&direct));
    }

    #[test]
    fn single_value_window_keeps_previous_trend() {
        let mut summary = a1_summary();
        summary.recent_window.clear();
        let update =
            apply_observation(&mut summary, ymd(2025, 5), 7, &EngineConfig::default()).unwrap();
        assert_eq!(update, TrendUpdate::Retained);
        assert_eq!(summary.slope, 2.0);
        assert_eq!(summary.intercept, 10.0);
        assert_eq!(summary.mean_qty, 7.0);
    }

    #[test]
    fn stale_observations_are_rejected_untouched() {
        let mut summary = a1_summary();
        let before = summary.clone();
        let err = apply_observation(&mut summary, ymd(2025, 4), 99, &EngineConfig::default())
            .unwrap_err();
        assert!(matches!(err, SkipReason::StaleObservation { .. }));
        assert_eq!(summary, before);
    }

    #[test]
    fn empty_batch_leaves_store_unchanged() {
        let mut summaries = Summaries::from([("A1".to_string(), a1_summary())]);
        let before = serde_json::to_string(&summaries).unwrap();

        let report = apply_batch(&mut summaries, &[], None, &EngineConfig::default());

        assert_eq!(report, BatchReport::default());
        assert_eq!(serde_json::to_string(&summaries).unwrap(), before);
    }

    #[test]
    fn batch_skips_unknown_and_missing_rows() {
        let mut summaries = Summaries::from([("A1".to_string(), a1_summary())]);
        let batch = vec![
            obs("ZZ", 2025, 5, Some(3)),
            obs("A1", 2025, 6, Some(24)),
            obs("A1", 2025, 5, Some(22)),
            obs("A1", 2025, 7, None),
        ];

        let report = apply_batch(
            &mut summaries,
            &batch,
            Some(&[2, 3, 4, 5]),
            &EngineConfig::default(),
        );

        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[0].reason, SkipReason::UnknownItem);
        assert_eq!(report.skipped[0].line, Some(2));
        assert_eq!(report.skipped[1].line, Some(5));
        let a1 = &summaries["A1"];
        assert_eq!(
            a1.recent_window,
            VecDeque::from(vec![14.0, 16.0, 18.0, 20.0, 22.0, 24.0])
        );
        assert_eq!(a1.last_updated, ymd(2025, 6));
    }
}
