use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::sync_log::SyncType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Week,
    Month,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }

    /// Last day covered by a period starting at `start`.
    ///
    /// Weeks span seven days. Months end on the last calendar day of the
    /// month `start` falls in.
    pub fn period_end(self, start: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Week => start + Duration::days(6),
            Granularity::Month => last_day_of_month(start.year(), start.month()).unwrap_or(start),
        }
    }

    pub fn sync_type(self) -> SyncType {
        match self {
            Granularity::Week => SyncType::Weekly,
            Granularity::Month => SyncType::Monthly,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated rollup window. Construct through [`Period::week`] or
/// [`Period::month`] so the anchor rules are always checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Period {
    pub granularity: Granularity,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    /// The week beginning on `week_start`, which must be a Monday.
    pub fn week(week_start: NaiveDate) -> Result<Self, CoreError> {
        if week_start.weekday() != Weekday::Mon {
            return Err(CoreError::NotMonday {
                date: week_start,
                weekday: week_start.weekday().to_string(),
            });
        }
        Ok(Self {
            granularity: Granularity::Week,
            start: week_start,
            end: Granularity::Week.period_end(week_start),
        })
    }

    pub fn month(year: i32, month: u32) -> Result<Self, CoreError> {
        if !(1..=12).contains(&month) {
            return Err(CoreError::InvalidMonth(month));
        }
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or(CoreError::InvalidYear(year))?;
        let end = last_day_of_month(year, month).ok_or(CoreError::InvalidYear(year))?;
        Ok(Self {
            granularity: Granularity::Month,
            start,
            end,
        })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year.checked_add(1)?, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).map(|d| d - Duration::days(1))
}

/// Check `start <= end` and, when `max_days` is given, that `end` is at most
/// `max_days` days after `start`. Returns the inclusive day count.
pub fn validate_date_range(
    start: NaiveDate,
    end: NaiveDate,
    max_days: Option<i64>,
) -> Result<i64, CoreError> {
    if start > end {
        return Err(CoreError::InvalidDateRange { start, end });
    }
    let span = (end - start).num_days();
    if let Some(max) = max_days {
        if span > max {
            return Err(CoreError::RangeTooLarge { days: span, max });
        }
    }
    Ok(span + 1)
}

/// Every date in `[start, end]`, ascending.
pub fn days_in_range(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}
