use rust_decimal::Decimal;
use serde::Serialize;

use crate::anomaly::AnomalyReport;
use crate::metrics::{DerivedRatios, MetricTotals, RawRecord};

/// Allowed absolute difference between a supplied rate (`ctr`) and the recomputed one.
pub const RATE_TOLERANCE: f64 = 0.01;

/// Allowed absolute difference between a supplied ratio (`cpc`, `cpm`, `roas`)
/// and the recomputed one.
pub const RATIO_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Validate a single source record.
///
/// Errors are collected rather than raised so batch callers decide whether
/// to drop or keep flagged data.
pub fn validate_record(record: &RawRecord) -> ValidationOutcome {
    let mut errors = Vec::new();

    if record.impressions.is_none() {
        errors.push("Missing required field: impressions".to_string());
    }
    if record.clicks.is_none() {
        errors.push("Missing required field: clicks".to_string());
    }
    if record.spend.is_none() {
        errors.push("Missing required field: spend".to_string());
    }
    let Some(totals) = record.totals() else {
        return ValidationOutcome::from_errors(errors);
    };

    check_bounds(&totals, &mut errors);

    if totals.clicks > totals.impressions {
        errors.push(format!(
            "Clicks cannot exceed impressions ({} > {})",
            totals.clicks, totals.impressions
        ));
    }
    if totals.conversions > totals.clicks {
        errors.push(format!(
            "Conversions cannot exceed clicks ({} > {})",
            totals.conversions, totals.clicks
        ));
    }

    if !record.frequency.is_finite() || record.frequency < 0.0 {
        errors.push(format!("Frequency must be a non-negative number, got {}", record.frequency));
    }

    let computed = DerivedRatios::from_totals(&totals);
    if let Some(ctr) = record.ctr {
        if !(0.0..=100.0).contains(&ctr) {
            errors.push(format!("CTR must be between 0 and 100, got {ctr}"));
        } else if (ctr - computed.ctr).abs() > RATE_TOLERANCE {
            errors.push(format!(
                "CTR inconsistent: provided {ctr}, calculated {:.4}",
                computed.ctr
            ));
        }
    }
    check_ratio("CPC", record.cpc, computed.cpc, &mut errors);
    check_ratio("CPM", record.cpm, computed.cpm, &mut errors);
    check_ratio("ROAS", record.roas, computed.roas, &mut errors);

    ValidationOutcome::from_errors(errors)
}

fn check_bounds(totals: &MetricTotals, errors: &mut Vec<String>) {
    if totals.impressions < 0 {
        errors.push("Impressions cannot be negative".to_string());
    }
    if totals.clicks < 0 {
        errors.push("Clicks cannot be negative".to_string());
    }
    if totals.conversions < 0 {
        errors.push("Conversions cannot be negative".to_string());
    }
    if totals.spend < Decimal::ZERO {
        errors.push("Spend cannot be negative".to_string());
    }
    if totals.conversion_value < Decimal::ZERO {
        errors.push("Conversion value cannot be negative".to_string());
    }
}

fn check_ratio(label: &str, supplied: Option<f64>, computed: f64, errors: &mut Vec<String>) {
    let Some(value) = supplied else {
        return;
    };
    if value < 0.0 {
        errors.push(format!("{label} cannot be negative"));
    } else if (value - computed).abs() > RATIO_TOLERANCE {
        errors.push(format!(
            "{label} inconsistent: provided {value}, calculated {computed:.4}"
        ));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            90.. => QualityLevel::Excellent,
            75..=89 => QualityLevel::Good,
            60..=74 => QualityLevel::Fair,
            _ => QualityLevel::Poor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SeverityCounts {
    pub high_severity: u32,
    pub medium_severity: u32,
    pub low_severity: u32,
}

impl SeverityCounts {
    pub fn total(&self) -> u32 {
        self.high_severity + self.medium_severity + self.low_severity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityScore {
    pub score: u32,
    pub quality_level: QualityLevel,
    pub total_anomalies: u32,
    pub anomaly_breakdown: SeverityCounts,
    pub recommendations: Vec<String>,
}

impl QualityScore {
    /// `max(0, 100 - (10*high + 5*medium + 1*low))`.
    pub fn from_report(report: &AnomalyReport) -> Self {
        let counts = report.severity_counts();
        let penalty = counts
            .high_severity
            .saturating_mul(10)
            .saturating_add(counts.medium_severity.saturating_mul(5))
            .saturating_add(counts.low_severity);
        let score = 100u32.saturating_sub(penalty);
        Self {
            score,
            quality_level: QualityLevel::from_score(score),
            total_anomalies: counts.total(),
            anomaly_breakdown: counts,
            recommendations: recommendations(report),
        }
    }
}

fn recommendations(report: &AnomalyReport) -> Vec<String> {
    let mut out = Vec::new();
    if !report.missing_data.is_empty() {
        out.push("Set up automated daily data sync to prevent missing data".to_string());
    }
    if !report.inconsistencies.is_empty() {
        out.push("Review data validation rules and ads platform response handling".to_string());
    }
    if !report.outliers.is_empty() {
        out.push("Implement outlier alerts for unusual spending patterns".to_string());
    }
    if !report.suspicious_patterns.is_empty() {
        out.push("Investigate ads with zero ROAS but positive spend".to_string());
    }
    if out.is_empty() {
        out.push("Data quality is excellent - maintain current processes".to_string());
    }
    out
}
