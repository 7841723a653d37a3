//! Display formatting for mail contexts (pt-BR).

use chrono::{DateTime, Locale, NaiveDate, NaiveDateTime, NaiveTime};

const LONG_DATE: &str = "%d de %B de %Y";

/// Long-form Brazilian date, e.g. `01 de março de 2024`.
pub fn format_long_date(date: NaiveDate) -> String {
    date.and_time(NaiveTime::MIN)
        .and_utc()
        .format_localized(LONG_DATE, Locale::pt_BR)
        .to_string()
}

/// Parse an ISO-8601 date or timestamp into the calendar date it names.
///
/// Timestamps keep the date as written in their own offset, so
/// `2024-03-01T00:00:00-03:00` is still the first of March.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.date_naive());
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(ts.date());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Price as shown in mail bodies, e.g. `R$270 reais`. Whole amounts print
/// without decimals.
pub fn format_price(amount: f64) -> String {
    if amount.fract() == 0.0 && amount.abs() < 1e15 {
        format!("R${} reais", amount as i64)
    } else {
        format!("R${:.2} reais", amount)
    }
}
