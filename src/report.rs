use std::cmp::Ordering;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{Prediction, Summaries};

#[derive(Debug, Clone, PartialEq)]
pub struct TrendMover {
    pub item_code: String,
    pub slope: f64,
    pub mean_qty: f64,
}

/// Items sorted by slope, steepest rise first.
pub fn trend_movers(summaries: &Summaries) -> Vec<TrendMover> {
    let mut movers: Vec<TrendMover> = summaries
        .iter()
        .map(|(item, summary)| TrendMover {
            item_code: item.clone(),
            slope: summary.slope,
            mean_qty: summary.mean_qty,
        })
        .collect();

    movers.sort_by(|a, b| {
        b.slope
            .partial_cmp(&a.slope)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item_code.cmp(&b.item_code))
    });
    movers
}

pub fn build_report(
    target: NaiveDate,
    model_name: &str,
    summaries: &Summaries,
    predictions: &[Prediction],
    limit: usize,
) -> String {
    let movers = trend_movers(summaries);

    let mut output = String::new();

    let _ = writeln!(output, "# Demand Forecast Report");
    let _ = writeln!(
        output,
        "Forecast for {} using the {} model",
        target.format("%Y-%m"),
        model_name
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Store Overview");

    if summaries.is_empty() {
        let _ = writeln!(output, "No item summaries in the store.");
    } else {
        let latest = summaries.values().map(|s| s.last_updated).max();
        let total: f64 = predictions.iter().map(|p| p.predicted_qty as f64).sum();
        let _ = writeln!(output, "- {} items summarized", summaries.len());
        let _ = writeln!(output, "- {} items forecast", predictions.len());
        if let Some(latest) = latest {
            let _ = writeln!(output, "- latest month folded in: {}", latest.format("%Y-%m"));
        }
        let _ = writeln!(output, "- total predicted quantity: {total:.0}");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Predicted Demand");

    if predictions.is_empty() {
        let _ = writeln!(output, "No items have enough recent history to forecast.");
    } else {
        for prediction in predictions.iter().take(limit) {
            let _ = writeln!(
                output,
                "- {}: {} units",
                prediction.item_code, prediction.predicted_qty
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Fastest Rising Trends");
    let rising: Vec<&TrendMover> = movers.iter().filter(|m| m.slope > 0.0).take(5).collect();
    if rising.is_empty() {
        let _ = writeln!(output, "No items trending up.");
    } else {
        for mover in rising {
            let _ = writeln!(
                output,
                "- {}: {:+.2} units/month (avg {:.1})",
                mover.item_code, mover.slope, mover.mean_qty
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Fastest Falling Trends");
    let falling: Vec<&TrendMover> = movers
        .iter()
        .rev()
        .filter(|m| m.slope < 0.0)
        .take(5)
        .collect();
    if falling.is_empty() {
        let _ = writeln!(output, "No items trending down.");
    } else {
        for mover in falling {
            let _ = writeln!(
                output,
                "- {}: {:+.2} units/month (avg {:.1})",
                mover.item_code, mover.slope, mover.mean_qty
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemSummary;
    use std::collections::{BTreeMap, VecDeque};

    fn item(slope: f64) -> ItemSummary {
        ItemSummary {
            mean_qty: 10.0,
            std_dev_qty: 1.0,
            slope,
            intercept: 10.0,
            recent_window: VecDeque::from(vec![9.0, 10.0, 11.0]),
            seasonality: BTreeMap::new(),
            last_updated: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        }
    }

    #[test]
    fn movers_sort_by_slope_then_item() {
        let summaries = Summaries::from([
            ("B".to_string(), item(1.0)),
            ("A".to_string(), item(1.0)),
            ("C".to_string(), item(-2.0)),
            ("D".to_string(), item(3.5)),
        ]);

        let order: Vec<String> = trend_movers(&summaries)
            .into_iter()
            .map(|m| m.item_code)
            .collect();
        assert_eq!(order, vec!["D", "A", "B", "C"]);
    }

    #[test]
    fn report_lists_predictions_and_trends() {
        let summaries = Summaries::from([
            ("UP".to_string(), item(2.0)),
            ("DOWN".to_string(), item(-1.5)),
        ]);
        let predictions = vec![
            Prediction {
                item_code: "UP".to_string(),
                predicted_qty: 33,
            },
            Prediction {
                item_code: "DOWN".to_string(),
                predicted_qty: 4,
            },
        ];
        let target = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();

        let report = build_report(target, "trend-seasonal", &summaries, &predictions, 10);

        assert!(report.starts_with("# Demand Forecast Report\n"));
        assert!(report.contains("Forecast for 2025-04 using the trend-seasonal model"));
        assert!(report.contains("- UP: 33 units"));
        assert!(report.contains("- total predicted quantity: 37"));
        assert!(report.contains("- UP: +2.00 units/month (avg 10.0)"));
        assert!(report.contains("- DOWN: -1.50 units/month (avg 10.0)"));
    }

    #[test]
    fn empty_store_report_says_so() {
        let target = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        let report = build_report(target, "trend-seasonal", &Summaries::new(), &[], 10);
        assert!(report.contains("No item summaries in the store."));
        assert!(report.contains("No items have enough recent history to forecast."));
    }
}
