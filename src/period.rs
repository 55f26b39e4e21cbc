use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};

const PERIOD_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];
const PERIOD_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const SHIP_DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%Y/%m/%d", "%d-%b-%Y"];

pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn next_month(period: NaiveDate) -> Option<NaiveDate> {
    month_start(period).checked_add_months(Months::new(1))
}

/// Parses a `YYYY-MM` forecast target into the first day of that month.
pub fn parse_target_month(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(&format!("{}-01", value.trim()), "%Y-%m-%d")
        .map_err(|_| format!("invalid month '{value}', expected YYYY-MM"))
}

/// Parses a `YearMonth` column value. Accepts `YYYY-MM`, full dates and
/// timestamps; the result is normalized to day 1.
pub fn parse_period(value: &str) -> Result<NaiveDate, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty period".to_string());
    }
    if let Ok(date) = parse_target_month(value) {
        return Ok(date);
    }
    for format in PERIOD_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Ok(month_start(date));
        }
    }
    for format in PERIOD_DATETIME_FORMATS {
        if let Ok(stamp) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(month_start(stamp.date()));
        }
    }
    Err(format!("unrecognized period '{value}'"))
}

/// Parses a raw ship date in any of the formats seen in order exports.
pub fn parse_ship_date(value: &str) -> Result<NaiveDate, String> {
    let value = value.trim();
    for format in SHIP_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Ok(date);
        }
    }
    for format in PERIOD_DATETIME_FORMATS {
        if let Ok(stamp) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(stamp.date());
        }
    }
    Err(format!("unrecognized ship date '{value}'"))
}

/// Every month start between `start` and `end`, inclusive.
pub fn months_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut months = Vec::new();
    let mut current = month_start(start);
    let end = month_start(end);
    while current <= end {
        months.push(current);
        match next_month(current) {
            Some(next) => current = next,
            None => break,
        }
    }
    months
}
