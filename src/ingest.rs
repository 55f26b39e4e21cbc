use std::path::Path;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{IngestError, SkipReason};
use crate::models::{CatalogEntry, ItemAccuracy, Observation, OrderLine, Skipped};
use crate::period::{parse_period, parse_ship_date};

/// Rows read from a CSV along with the source line of each and any rows that were dropped.
#[derive(Debug, Default)]
pub struct Loaded<T> {
    pub rows: Vec<T>,
    pub lines: Vec<u64>,
    pub skipped: Vec<Skipped>,
}

#[derive(Deserialize)]
struct HistoryRow {
    #[serde(rename = "Item_Code")]
    item_code: String,
    #[serde(rename = "YearMonth")]
    year_month: String,
    #[serde(rename = "Order_Qty", default)]
    order_qty: String,
    #[serde(rename = "Description", default)]
    description: String,
}

#[derive(Deserialize)]
struct OrderRow {
    #[serde(rename = "Item_Code")]
    item_code: String,
    #[serde(rename = "Ship_Date")]
    ship_date: String,
    #[serde(rename = "Order_Qty", default)]
    order_qty: String,
    #[serde(rename = "Description", default)]
    description: String,
}

#[derive(Serialize)]
struct GridRecord<'a> {
    #[serde(rename = "Year")]
    year: i32,
    #[serde(rename = "Month")]
    month: u32,
    #[serde(rename = "YearMonth")]
    year_month: NaiveDate,
    #[serde(rename = "Item_Code")]
    item_code: &'a str,
    #[serde(rename = "Description")]
    description: &'a str,
    #[serde(rename = "Order_Qty")]
    order_qty: Option<u64>,
}

#[derive(Serialize)]
struct AccuracyRecord<'a> {
    #[serde(rename = "Item_Code")]
    item_code: &'a str,
    #[serde(rename = "MAE")]
    mae: f64,
    #[serde(rename = "Percentage_Error")]
    percentage_error: Option<f64>,
    #[serde(rename = "Evaluated")]
    evaluated: usize,
}

#[derive(Serialize)]
struct CatalogRecord<'a> {
    item_no: &'a str,
    item_name: &'a str,
    unit: &'a str,
    last_restock_qty: u64,
    last_restock_date: String,
    category: &'a str,
}

/// Parses a quantity cell. Empty means missing; `12` and `12.0` are both
/// accepted since exports with gaps carry float columns.
pub fn parse_quantity(value: &str) -> Result<Option<u64>, String> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    if let Ok(qty) = value.parse::<u64>() {
        return Ok(Some(qty));
    }
    match value.parse::<f64>() {
        Ok(qty) if qty.is_finite() && qty >= 0.0 && qty.fract() == 0.0 => Ok(Some(qty as u64)),
        _ => Err(format!("invalid quantity '{value}'")),
    }
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, IngestError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| IngestError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Reads rows of type `R`, converting each with `convert`. Conversion and
/// decode failures skip the row; IO failures end the read.
fn read_rows<R, T>(
    path: &Path,
    convert: impl Fn(R) -> Result<T, Skipped>,
) -> Result<Loaded<T>, IngestError>
where
    R: for<'de> Deserialize<'de>,
{
    let mut reader = open(path)?;
    let read_err = |source| IngestError::Read {
        path: path.to_path_buf(),
        source,
    };
    let headers = reader.headers().map_err(read_err)?.clone();
    let mut loaded = Loaded {
        rows: Vec::new(),
        lines: Vec::new(),
        skipped: Vec::new(),
    };

    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(source) if source.is_io_error() => return Err(read_err(source)),
            Err(err) => {
                let line = err.position().map(|pos| pos.line());
                warn!(path = %path.display(), ?line, error = %err, "skipping unreadable row");
                loaded.skipped.push(Skipped {
                    item_code: None,
                    line,
                    reason: SkipReason::MalformedObservation(err.to_string()),
                });
                continue;
            }
        };
        let line = record.position().map(|pos| pos.line()).unwrap_or_default();

        let converted = record
            .deserialize::<R>(Some(&headers))
            .map_err(|err| Skipped {
                item_code: None,
                line: None,
                reason: SkipReason::MalformedObservation(err.to_string()),
            })
            .and_then(&convert);

        match converted {
            Ok(value) => {
                loaded.rows.push(value);
                loaded.lines.push(line);
            }
            Err(mut skipped) => {
                skipped.line = Some(line);
                warn!(
                    path = %path.display(),
                    line,
                    item = skipped.item_code.as_deref().unwrap_or(""),
                    reason = %skipped.reason,
                    "skipping row"
                );
                loaded.skipped.push(skipped);
            }
        }
    }

    info!(
        path = %path.display(),
        rows = loaded.rows.len(),
        skipped = loaded.skipped.len(),
        "loaded csv"
    );
    Ok(loaded)
}

fn malformed(item_code: &str, message: String) -> Skipped {
    Skipped {
        item_code: Some(item_code.to_string()),
        line: None,
        reason: SkipReason::MalformedObservation(message),
    }
}

/// Loads monthly observations (a filled history or a new-period batch).
pub fn load_observations(path: &Path) -> Result<Loaded<Observation>, IngestError> {
    let mut loaded = read_rows(path, |row: HistoryRow| {
        let period = parse_period(&row.year_month).map_err(|msg| malformed(&row.item_code, msg))?;
        let quantity =
            parse_quantity(&row.order_qty).map_err(|msg| malformed(&row.item_code, msg))?;
        Ok(Observation {
            item_code: row.item_code,
            period,
            quantity,
            description: row.description,
        })
    })?;
    drop_duplicates(&mut loaded);
    Ok(loaded)
}

/// Keeps the first observation for each (item, period).
fn drop_duplicates(loaded: &mut Loaded<Observation>) {
    let mut seen = std::collections::HashSet::new();
    let mut rows = Vec::with_capacity(loaded.rows.len());
    let mut lines = Vec::with_capacity(loaded.lines.len());
    for (row, line) in loaded.rows.drain(..).zip(loaded.lines.drain(..)) {
        if seen.insert((row.item_code.clone(), row.period)) {
            rows.push(row);
            lines.push(line);
        } else {
            warn!(item = %row.item_code, period = %row.period, line, "skipping duplicate observation");
            loaded.skipped.push(Skipped {
                item_code: Some(row.item_code),
                line: Some(line),
                reason: SkipReason::MalformedObservation(format!(
                    "duplicate observation for {}",
                    row.period
                )),
            });
        }
    }
    loaded.rows = rows;
    loaded.lines = lines;
}

/// Loads raw order export lines. Rows without a recognizable ship date are dropped.
pub fn load_orders(path: &Path) -> Result<Loaded<OrderLine>, IngestError> {
    read_rows(path, |row: OrderRow| {
        let ship_date =
            parse_ship_date(&row.ship_date).map_err(|msg| malformed(&row.item_code, msg))?;
        let quantity =
            parse_quantity(&row.order_qty).map_err(|msg| malformed(&row.item_code, msg))?;
        Ok(OrderLine {
            item_code: row.item_code,
            ship_date,
            quantity,
            description: row.description,
        })
    })
}

fn write_records<S: Serialize>(
    path: &Path,
    records: impl IntoIterator<Item = S>,
) -> Result<(), IngestError> {
    let write_err = |source| IngestError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(write_err)?;
    for record in records {
        writer.serialize(record).map_err(write_err)?;
    }
    writer.flush().map_err(|source| IngestError::Flush {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_grid(path: &Path, grid: &[Observation]) -> Result<(), IngestError> {
    write_records(
        path,
        grid.iter().map(|row| GridRecord {
            year: row.period.year(),
            month: row.period.month(),
            year_month: row.period,
            item_code: &row.item_code,
            description: &row.description,
            order_qty: row.quantity,
        }),
    )
}

pub fn write_accuracy(path: &Path, results: &[ItemAccuracy]) -> Result<(), IngestError> {
    write_records(
        path,
        results.iter().map(|result| AccuracyRecord {
            item_code: &result.item_code,
            mae: result.mae,
            percentage_error: result.percentage_error,
            evaluated: result.evaluated,
        }),
    )
}

pub fn write_catalog(path: &Path, entries: &[CatalogEntry]) -> Result<(), IngestError> {
    write_records(
        path,
        entries.iter().map(|entry| CatalogRecord {
            item_no: &entry.item_code,
            item_name: &entry.item_name,
            unit: "pcs",
            last_restock_qty: entry.last_restock_qty,
            last_restock_date: entry
                .last_restock_date
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            category: "Uncategorized",
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn quantities_accept_integers_and_integral_floats() {
        assert_eq!(parse_quantity("12").unwrap(), Some(12));
        assert_eq!(parse_quantity("12.0").unwrap(), Some(12));
        assert_eq!(parse_quantity("").unwrap(), None);
        assert_eq!(parse_quantity("NaN").unwrap(), None);
        assert!(parse_quantity("-3").is_err());
        assert!(parse_quantity("2.5").is_err());
        assert!(parse_quantity("lots").is_err());
    }

    #[test]
    fn batch_rows_with_bad_dates_are_skipped_with_line_numbers() {
        let file = csv_file(
            "Item_Code,Order_Qty,YearMonth\n\
             A1,22,2025-03-01\n\
             B2,4,someday\n\
             C3,,2025-03\n",
        );

        let loaded = load_observations(file.path()).unwrap();

        assert_eq!(loaded.rows.len(), 2);
        assert_eq!(loaded.rows[0].item_code, "A1");
        assert_eq!(loaded.rows[0].quantity, Some(22));
        assert_eq!(loaded.rows[1].quantity, None);
        assert_eq!(loaded.lines, vec![2, 4]);
        assert_eq!(loaded.skipped.len(), 1);
        assert_eq!(loaded.skipped[0].item_code.as_deref(), Some("B2"));
        assert_eq!(loaded.skipped[0].line, Some(3));
    }

    #[test]
    fn duplicate_periods_keep_first_row() {
        let file = csv_file(
            "Item_Code,Order_Qty,YearMonth\n\
             A1,1,2025-03-01\n\
             A1,2,2025-03-15\n",
        );

        let loaded = load_observations(file.path()).unwrap();
        assert_eq!(loaded.rows.len(), 1);
        assert_eq!(loaded.rows[0].quantity, Some(1));
        assert_eq!(loaded.skipped.len(), 1);
    }

    #[test]
    fn missing_file_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_observations(&dir.path().join("absent.csv"));
        assert!(matches!(result, Err(IngestError::Read { .. })));
    }

    #[test]
    fn grid_round_trips_through_history_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.csv");
        let period = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let grid = vec![
            Observation {
                item_code: "X".to_string(),
                period,
                quantity: Some(3),
                description: "Widget".to_string(),
            },
            Observation {
                item_code: "Y".to_string(),
                period,
                quantity: None,
                description: String::new(),
            },
        ];

        write_grid(&path, &grid).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Year,Month,YearMonth,Item_Code,Description,Order_Qty\n"));
        assert!(text.contains("2024,2,2024-02-01,X,Widget,3\n"));
        assert!(text.contains("2024,2,2024-02-01,Y,,\n"));

        let loaded = load_observations(&path).unwrap();
        assert_eq!(loaded.rows, grid);
    }

    #[test]
    fn orders_parse_mixed_ship_dates() {
        let file = csv_file(
            "Item_Code,Ship_Date,Order_Qty,Description\n\
             X,2024-01-05,3,Widget\n\
             X,1/20/2024,2,\n\
             X,,1,\n",
        );

        let loaded = load_orders(file.path()).unwrap();
        assert_eq!(loaded.rows.len(), 2);
        assert_eq!(
            loaded.rows[1].ship_date,
            NaiveDate::from_ymd_opt(2024, 1, 20).unwrap()
        );
        assert_eq!(loaded.skipped.len(), 1);
    }
}
