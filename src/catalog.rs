use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::models::{CatalogEntry, Observation};

#[derive(Default)]
struct ItemState<'a> {
    description: Option<(NaiveDate, &'a str)>,
    last_positive: Option<(NaiveDate, u64)>,
}

/// One catalog entry per item, sorted by code, with the latest month that
/// had a positive order.
pub fn build_catalog(observations: &[Observation]) -> Vec<CatalogEntry> {
    let mut items: BTreeMap<&str, ItemState> = BTreeMap::new();
    for obs in observations {
        let state = items.entry(obs.item_code.as_str()).or_default();

        let description = obs.description.trim();
        if !description.is_empty()
            && state.description.map_or(true, |(seen, _)| obs.period >= seen)
        {
            state.description = Some((obs.period, description));
        }

        if let Some(qty) = obs.quantity.filter(|qty| *qty > 0) {
            if state.last_positive.map_or(true, |(seen, _)| obs.period > seen) {
                state.last_positive = Some((obs.period, qty));
            }
        }
    }

    items
        .into_iter()
        .map(|(item, state)| {
            let item_name = match state.description {
                Some((_, description)) => format!("{item} - {description}"),
                None => item.to_string(),
            };
            CatalogEntry {
                item_code: item.to_string(),
                item_name,
                last_restock_qty: state.last_positive.map_or(0, |(_, qty)| qty),
                last_restock_date: state.last_positive.map(|(date, _)| date),
            }
        })
        .collect()
}
