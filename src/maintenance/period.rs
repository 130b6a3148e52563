//! Maintenance period calculation.
//!
//! Recurring periods are evaluated on local calendar dates of the supplied
//! time zone, so a period keeps its time of day across DST changes.

use crate::cache::{Maintenance, MaintenancePeriod, PeriodType, WeekOfMonth};

use chrono::{Datelike, Duration, NaiveDate, TimeZone, Timelike};
use serde::Serialize;

/// Half-open running window `[since, until)` in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub since: i64,
    pub until: i64,
}

impl Window {
    pub fn contains(&self, ts: i64) -> bool {
        self.since <= ts && ts < self.until
    }

    /// Clip to `[since, until)`; `None` if nothing is left.
    fn clip(self, since: i64, until: i64) -> Option<Window> {
        let clipped = Window {
            since: self.since.max(since),
            until: self.until.min(until),
        };
        (clipped.since < clipped.until).then_some(clipped)
    }
}

/// Compute the window of the latest occurrence of `period` starting on or
/// before the local date `reference`.
///
/// The result always lies within the maintenance's active interval. `None`
/// means no occurrence exists.
pub fn calculate_period<Tz: TimeZone>(
    maintenance: &Maintenance,
    period: &MaintenancePeriod,
    reference: NaiveDate,
    tz: &Tz,
) -> Option<Window> {
    let since = match period.period_type {
        PeriodType::OneTime => period.start_date,
        PeriodType::Daily => {
            let date = daily_occurrence(maintenance, period, reference, tz)?;
            local_timestamp(tz, date, period.start_time)?
        }
        PeriodType::Weekly => {
            let date = weekly_occurrence(maintenance, period, reference, tz)?;
            local_timestamp(tz, date, period.start_time)?
        }
        PeriodType::Monthly => {
            let date = monthly_occurrence(maintenance, period, reference, tz)?;
            local_timestamp(tz, date, period.start_time)?
        }
    };

    Window {
        since,
        until: since.saturating_add(i64::from(period.period)),
    }
    .clip(maintenance.active_since, maintenance.active_until)
}

/// Window of `period` that contains `now`, if any.
///
/// Recurring periods are looked up from today when today's start time has
/// passed, from yesterday otherwise.
pub fn check_period<Tz: TimeZone>(
    maintenance: &Maintenance,
    period: &MaintenancePeriod,
    now: i64,
    tz: &Tz,
) -> Option<Window> {
    let local = tz.timestamp_opt(now, 0).earliest()?;
    let today = local.date_naive();

    let reference = if local.time().num_seconds_from_midnight() >= period.start_time {
        today
    } else {
        today.pred_opt()?
    };

    calculate_period(maintenance, period, reference, tz).filter(|w| w.contains(now))
}

fn local_date<Tz: TimeZone>(tz: &Tz, ts: i64) -> Option<NaiveDate> {
    tz.timestamp_opt(ts, 0).earliest().map(|dt| dt.date_naive())
}

/// Epoch time of `seconds` after local midnight of `date`. A time falling
/// into a DST gap is moved past the gap.
fn local_timestamp<Tz: TimeZone>(tz: &Tz, date: NaiveDate, seconds: u32) -> Option<i64> {
    let local = date.and_hms_opt(0, 0, 0)? + Duration::seconds(i64::from(seconds));

    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .map(|dt| dt.timestamp())
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };

    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(31)
}

fn weekday_bit(date: NaiveDate) -> u32 {
    1 << date.weekday().num_days_from_monday()
}

// --- Occurrence walks ---

/// Every `every` days counted from the local day of `active_since`.
fn daily_occurrence<Tz: TimeZone>(
    maintenance: &Maintenance,
    period: &MaintenancePeriod,
    reference: NaiveDate,
    tz: &Tz,
) -> Option<NaiveDate> {
    let anchor = local_date(tz, maintenance.active_since)?;
    if reference < anchor || period.every == 0 {
        return None;
    }

    let days = (reference - anchor).num_days();
    reference.checked_sub_signed(Duration::days(days % i64::from(period.every)))
}

/// Selected week days of every `every`-th week counted from the week of
/// `active_since`.
fn weekly_occurrence<Tz: TimeZone>(
    maintenance: &Maintenance,
    period: &MaintenancePeriod,
    reference: NaiveDate,
    tz: &Tz,
) -> Option<NaiveDate> {
    let since = local_date(tz, maintenance.active_since)?;
    let anchor = since.checked_sub_signed(Duration::days(i64::from(
        since.weekday().num_days_from_monday(),
    )))?;
    if period.every == 0 {
        return None;
    }

    let mut date = reference;
    while date >= anchor {
        let week = (date - anchor).num_days() / 7;
        if week % i64::from(period.every) == 0 && period.dayofweek & weekday_bit(date) != 0 {
            return Some(date);
        }
        date = date.pred_opt()?;
    }

    None
}

/// Either a fixed day of the selected months or the n-th (or last) selected
/// week day of them.
fn monthly_occurrence<Tz: TimeZone>(
    maintenance: &Maintenance,
    period: &MaintenancePeriod,
    reference: NaiveDate,
    tz: &Tz,
) -> Option<NaiveDate> {
    let since = local_date(tz, maintenance.active_since)?;
    let week_of_month = if period.day == 0 {
        Some(period.week_of_month()?)
    } else {
        None
    };

    let mut date = reference;
    while date >= since {
        if period.month & (1 << date.month0()) != 0 && monthly_day_matches(period, week_of_month, date) {
            return Some(date);
        }
        date = date.pred_opt()?;
    }

    None
}

fn monthly_day_matches(
    period: &MaintenancePeriod,
    week_of_month: Option<WeekOfMonth>,
    date: NaiveDate,
) -> bool {
    let Some(week_of_month) = week_of_month else {
        return date.day() == period.day;
    };

    if period.dayofweek & weekday_bit(date) == 0 {
        return false;
    }

    let mday = date.day();
    let nth = (mday - 1) / 7 + 1;

    match week_of_month.ordinal() {
        Some(ordinal) => nth == ordinal,
        // No later occurrence of this week day fits in the month
        None => nth == 5 || (nth == 4 && mday + 7 > days_in_month(date)),
    }
}
