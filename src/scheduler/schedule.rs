//! Next-fire computation for the three recurrence shapes.
//!
//! All functions work on naive local wall-clock time and return the first
//! fire time strictly after `now`.

use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, Weekday};

use super::TimeOfDay;

/// Every day at `time`.
pub fn next_daily(now: NaiveDateTime, time: TimeOfDay) -> Option<NaiveDateTime> {
    let today = now.date().and_time(time.as_naive_time());
    if today > now {
        return Some(today);
    }
    now.date()
        .checked_add_days(Days::new(1))
        .map(|date| date.and_time(time.as_naive_time()))
}

/// At `time` on each of `days`. `None` when `days` is empty.
pub fn next_weekly(now: NaiveDateTime, time: TimeOfDay, days: &[Weekday]) -> Option<NaiveDateTime> {
    (0..=7u64)
        .filter_map(|offset| now.date().checked_add_days(Days::new(offset)))
        .filter(|date| days.contains(&date.weekday()))
        .map(|date| date.and_time(time.as_naive_time()))
        .find(|candidate| *candidate > now)
}

/// At `time` on day `day` of each month that has it.
///
/// Months shorter than `day` are skipped, so day 31 fires seven times a
/// year. `None` when `day` is outside `1..=31`.
pub fn next_monthly(now: NaiveDateTime, time: TimeOfDay, day: u32) -> Option<NaiveDateTime> {
    if !(1..=31).contains(&day) {
        return None;
    }
    let first_of_month = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)?;
    (0..=12u32)
        .filter_map(|offset| first_of_month.checked_add_months(Months::new(offset)))
        .filter_map(|month| NaiveDate::from_ymd_opt(month.year(), month.month(), day))
        .map(|date| date.and_time(time.as_naive_time()))
        .find(|candidate| *candidate > now)
}
