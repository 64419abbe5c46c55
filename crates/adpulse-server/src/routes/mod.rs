pub mod analytics;
pub mod backfill;
pub mod health;
pub mod retention;
pub mod sync;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::error::AppError;

/// Trimmed value of a required query parameter.
pub(crate) fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, AppError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::BadRequest(format!("{name} is required"))),
    }
}

pub(crate) fn parse_date(raw: &str, name: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("invalid {name} (expected YYYY-MM-DD)")))
}

pub(crate) fn required_date(value: Option<&str>, name: &str) -> Result<NaiveDate, AppError> {
    parse_date(required(value, name)?, name)
}

pub(crate) fn parse_min_spend(raw: Option<&str>) -> Result<Option<Decimal>, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let value: Decimal = raw
        .parse()
        .map_err(|_| AppError::BadRequest("invalid min_spend".to_string()))?;
    if value.is_sign_negative() {
        return Err(AppError::BadRequest("min_spend cannot be negative".to_string()));
    }
    Ok(Some(value))
}

/// `days_back` with a default, bounded to a year.
pub(crate) fn days_back(raw: Option<i64>, default: i64) -> Result<i64, AppError> {
    let days = raw.unwrap_or(default);
    if !(1..=365).contains(&days) {
        return Err(AppError::BadRequest(
            "days_back must be between 1 and 365".to_string(),
        ));
    }
    Ok(days)
}

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_required_values_are_rejected() {
        assert!(required(None, "client_id").is_err());
        assert!(required(Some("  "), "client_id").is_err());
        assert_eq!(required(Some(" act_1 "), "client_id").unwrap(), "act_1");
    }

    #[test]
    fn min_spend_must_be_a_non_negative_decimal() {
        assert_eq!(parse_min_spend(None).unwrap(), None);
        assert_eq!(parse_min_spend(Some("12.5")).unwrap(), Some(Decimal::new(125, 1)));
        assert!(parse_min_spend(Some("-1")).is_err());
        assert!(parse_min_spend(Some("lots")).is_err());
    }

    #[test]
    fn days_back_is_bounded() {
        assert_eq!(days_back(None, 30).unwrap(), 30);
        assert!(days_back(Some(0), 30).is_err());
        assert!(days_back(Some(366), 30).is_err());
    }
}
