//! Calendar arithmetic
//!
//! Adding months or years never lands on an invalid day: when the target month is
//! too short for the original day-of-month the result is the 1st of the following
//! month (2021-01-31 + 1 month = 2021-03-01, 2020-02-29 + 1 year = 2021-03-01).
//! Differences are whole units, counted the way ages are.

use chrono::{Datelike, Days, NaiveDate};

/// Number of days in the given month
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    match (
        NaiveDate::from_ymd_opt(year, month, 1),
        NaiveDate::from_ymd_opt(next_year, next_month, 1),
    ) {
        (Some(start), Some(end)) => (end - start).num_days() as u32,
        _ => 31,
    }
}

/// Add (or subtract) whole days; None on calendar overflow
pub fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    if days >= 0 {
        date.checked_add_days(Days::new(days as u64))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    }
}

/// Add months, clamping day-of-month overflow to the 1st of the next month
pub fn add_months(date: NaiveDate, months: i64) -> Option<NaiveDate> {
    let total = i64::from(date.year()) * 12 + i64::from(date.month0()) + months;
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    let month = total.rem_euclid(12) as u32 + 1;
    if date.day() <= days_in_month(year, month) {
        NaiveDate::from_ymd_opt(year, month, date.day())
    } else if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
}

/// Add years with the same overflow rule as `add_months`
pub fn add_years(date: NaiveDate, years: i64) -> Option<NaiveDate> {
    add_months(date, years.checked_mul(12)?)
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn first_of_year(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
}

/// Whole days from `start` to `end` (negative when `end` is earlier)
pub fn days_between(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days()
}

/// Whole months from `start` to `end`; a month is only complete once the
/// day-of-month has been reached
pub fn months_between(start: NaiveDate, end: NaiveDate) -> i64 {
    let mut months = (i64::from(end.year()) - i64::from(start.year())) * 12
        + (i64::from(end.month()) - i64::from(start.month()));
    if end.day() < start.day() {
        months -= 1;
    }
    months
}

/// Whole years from `start` to `end` (age semantics)
pub fn years_between(start: NaiveDate, end: NaiveDate) -> i64 {
    let mut years = i64::from(end.year()) - i64::from(start.year());
    if (end.month(), end.day()) < (start.month(), start.day()) {
        years -= 1;
    }
    years
}
