use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use clap::ValueEnum;
use tracing::info;

use crate::models::{Observation, OrderLine};
use crate::period::{month_start, months_between};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FillMode {
    /// Missing months get quantity 0.
    Zero,
    /// Missing months keep an empty quantity.
    Missing,
    /// Missing months get quantity 0 when some other item has data that
    /// month, and stay empty only when no item has any.
    GlobalGaps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl MonthRange {
    pub fn spanning(observations: &[Observation]) -> Option<Self> {
        let start = observations.iter().map(|obs| obs.period).min()?;
        let end = observations.iter().map(|obs| obs.period).max()?;
        Some(Self { start, end })
    }
}

fn description_as_of<'a>(
    known: &BTreeMap<NaiveDate, &'a str>,
    period: NaiveDate,
) -> Option<&'a str> {
    known
        .range(..=period)
        .next_back()
        .or_else(|| known.iter().next())
        .map(|(_, description)| *description)
}

/// Sums raw order lines into one observation per item and month.
pub fn aggregate_orders(lines: &[OrderLine]) -> Vec<Observation> {
    let mut totals: BTreeMap<(NaiveDate, &str), (u64, String)> = BTreeMap::new();
    for line in lines {
        let entry = totals
            .entry((month_start(line.ship_date), line.item_code.as_str()))
            .or_insert((0, String::new()));
        entry.0 += line.quantity.unwrap_or(0);
        if entry.1.is_empty() && !line.description.trim().is_empty() {
            entry.1 = line.description.trim().to_string();
        }
    }

    totals
        .into_iter()
        .map(|((period, item), (quantity, description))| Observation {
            item_code: item.to_string(),
            period,
            quantity: Some(quantity),
            description,
        })
        .collect()
}

/// Expands observations into a complete item x month grid over `range`,
/// sorted by period then item.
///
/// Each row carries the item's most recent non-empty description as of
/// that month. Months before an item's first description take the first one.
pub fn fill_gaps(observations: &[Observation], range: MonthRange, mode: FillMode) -> Vec<Observation> {
    let items: BTreeSet<&str> = observations
        .iter()
        .map(|obs| obs.item_code.as_str())
        .collect();

    let mut descriptions: HashMap<&str, BTreeMap<NaiveDate, &str>> = HashMap::new();
    let mut quantities: HashMap<(&str, NaiveDate), Option<u64>> = HashMap::new();
    let mut active_months: HashSet<NaiveDate> = HashSet::new();
    for obs in observations {
        let period = month_start(obs.period);
        quantities.insert((obs.item_code.as_str(), period), obs.quantity);
        if obs.quantity.is_some() {
            active_months.insert(period);
        }

        let description = obs.description.trim();
        if !description.is_empty() {
            descriptions
                .entry(obs.item_code.as_str())
                .or_default()
                .insert(period, description);
        }
    }

    let months = months_between(range.start, range.end);
    let mut grid = Vec::with_capacity(months.len() * items.len());
    for period in &months {
        for item in &items {
            let quantity = match quantities.get(&(*item, *period)) {
                Some(Some(qty)) => Some(*qty),
                _ => match mode {
                    FillMode::Zero => Some(0),
                    FillMode::Missing => None,
                    FillMode::GlobalGaps => active_months.contains(period).then_some(0),
                },
            };
            grid.push(Observation {
                item_code: item.to_string(),
                period: *period,
                quantity,
                description: descriptions
                    .get(item)
                    .and_then(|known| description_as_of(known, *period))
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }

    info!(
        items = items.len(),
        months = months.len(),
        rows = grid.len(),
        mode = ?mode,
        "filled month grid"
    );
    grid
}
