use chrono::{Datelike, Months, NaiveDate, Weekday};

use crate::error::{PayrollError, Result};

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Last day of the month starting at (or containing) `date`.
pub fn month_end(date: NaiveDate) -> NaiveDate {
    let first = month_start(date);
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(first)
}

/// Accepts `YYYY-MM` or `YYYY-MM-DD`; the result is always the first day of
/// the month.
pub fn parse_month(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d"))
        .map_err(|_| PayrollError::Validation(format!("invalid month `{raw}`")))?;
    Ok(month_start(parsed))
}

/// Inclusive day range.
pub fn days_between(from: NaiveDate, to: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    from.iter_days().take_while(move |d| *d <= to)
}

/// Days of the month that are not weekend days.
pub fn working_days(month: NaiveDate, weekend: &[Weekday]) -> u32 {
    days_between(month_start(month), month_end(month))
        .filter(|d| !weekend.contains(&d.weekday()))
        .count() as u32
}

/// Inclusive overlap of `[from, to]` with `[lo, hi]`.
pub fn clip(from: NaiveDate, to: NaiveDate, lo: NaiveDate, hi: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let start = from.max(lo);
    let end = to.min(hi);
    (start <= end).then_some((start, end))
}

/// Parses weekday lists such as `fri,sat` or `4,5` (0 = Monday).
pub fn parse_weekdays(raw: &str) -> Result<Vec<Weekday>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|token| {
            if let Ok(index) = token.parse::<u8>() {
                return weekday_from_index(index)
                    .ok_or_else(|| PayrollError::Validation(format!("invalid weekday `{token}`")));
            }
            token
                .parse::<Weekday>()
                .map_err(|_| PayrollError::Validation(format!("invalid weekday `{token}`")))
        })
        .collect()
}

pub fn weekday_from_index(index: u8) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}
