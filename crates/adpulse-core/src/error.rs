use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised by the pure domain layer.
///
/// Input variants are rejected synchronously, before any storage access, so
/// the HTTP layer maps all of them to `400 Bad Request`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("start_date ({start}) must be on or before end_date ({end})")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("date range too large: end is {days} days after start (max {max})")]
    RangeTooLarge { days: i64, max: i64 },

    #[error("month must be between 1 and 12, got {0}")]
    InvalidMonth(u32),

    #[error("year out of supported range: {0}")]
    InvalidYear(i32),

    #[error("week_start must be a Monday, got {date} ({weekday})")]
    NotMonday { date: NaiveDate, weekday: String },

    #[error("unknown data type: {0}")]
    UnknownCategory(String),

    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),

    #[error(
        "entity {entity_id} ({attribution}) has records in more than one currency: {first}, {second}"
    )]
    MixedCurrency {
        entity_id: String,
        attribution: String,
        first: String,
        second: String,
    },
}

impl CoreError {
    /// `true` for errors caused by caller input rather than stored data.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, CoreError::MixedCurrency { .. })
    }
}
