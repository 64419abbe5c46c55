//! Trailing-window anomaly scan over stored daily records.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::metrics::MetricRecord;
use crate::period::days_in_range;
use crate::validation::SeverityCounts;

/// Spend above this multiple of the mean positive spend is an outlier.
pub const SPEND_OUTLIER_FACTOR: f64 = 5.0;
/// ROAS above this multiple of the mean positive ROAS is worth noting.
pub const ROAS_OUTLIER_FACTOR: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyCategory {
    Outliers,
    MissingData,
    Inconsistencies,
    SuspiciousPatterns,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Anomaly {
    HighSpend {
        entity_id: String,
        date: NaiveDate,
        value: f64,
        threshold: f64,
    },
    ExtremelyHighRoas {
        entity_id: String,
        date: NaiveDate,
        value: f64,
        threshold: f64,
    },
    ZeroRoasWithSpend {
        entity_id: String,
        date: NaiveDate,
        spend: f64,
    },
    NoRecentData {
        message: String,
    },
    MissingDailyData {
        date: NaiveDate,
    },
    ClicksExceedImpressions {
        entity_id: String,
        date: NaiveDate,
        clicks: i64,
        impressions: i64,
    },
    ConversionsExceedClicks {
        entity_id: String,
        date: NaiveDate,
        conversions: i64,
        clicks: i64,
    },
}

impl Anomaly {
    pub fn severity(&self) -> Severity {
        match self {
            Anomaly::ExtremelyHighRoas { .. } => Severity::Low,
            Anomaly::HighSpend { .. }
            | Anomaly::ZeroRoasWithSpend { .. }
            | Anomaly::MissingDailyData { .. } => Severity::Medium,
            Anomaly::NoRecentData { .. }
            | Anomaly::ClicksExceedImpressions { .. }
            | Anomaly::ConversionsExceedClicks { .. } => Severity::High,
        }
    }

    pub fn category(&self) -> AnomalyCategory {
        match self {
            Anomaly::HighSpend { .. } | Anomaly::ExtremelyHighRoas { .. } => {
                AnomalyCategory::Outliers
            }
            Anomaly::NoRecentData { .. } | Anomaly::MissingDailyData { .. } => {
                AnomalyCategory::MissingData
            }
            Anomaly::ClicksExceedImpressions { .. } | Anomaly::ConversionsExceedClicks { .. } => {
                AnomalyCategory::Inconsistencies
            }
            Anomaly::ZeroRoasWithSpend { .. } => AnomalyCategory::SuspiciousPatterns,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    #[serde(flatten)]
    pub anomaly: Anomaly,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AnomalyReport {
    pub outliers: Vec<Finding>,
    pub missing_data: Vec<Finding>,
    pub inconsistencies: Vec<Finding>,
    pub suspicious_patterns: Vec<Finding>,
}

impl AnomalyReport {
    pub fn push(&mut self, anomaly: Anomaly) {
        let finding = Finding {
            severity: anomaly.severity(),
            anomaly,
        };
        let bucket = match finding.anomaly.category() {
            AnomalyCategory::Outliers => &mut self.outliers,
            AnomalyCategory::MissingData => &mut self.missing_data,
            AnomalyCategory::Inconsistencies => &mut self.inconsistencies,
            AnomalyCategory::SuspiciousPatterns => &mut self.suspicious_patterns,
        };
        bucket.push(finding);
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.outliers
            .iter()
            .chain(&self.missing_data)
            .chain(&self.inconsistencies)
            .chain(&self.suspicious_patterns)
    }

    pub fn severity_counts(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for finding in self.findings() {
            match finding.severity {
                Severity::High => counts.high_severity += 1,
                Severity::Medium => counts.medium_severity += 1,
                Severity::Low => counts.low_severity += 1,
            }
        }
        counts
    }
}

fn spend_of(record: &MetricRecord) -> f64 {
    record.totals.spend.to_f64().unwrap_or(0.0)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Scan `records` dated within `[today - lookback_days, today]`.
///
/// Thresholds are simple means over the scanned window, so one extreme
/// value raises the bar for everything else in it.
pub fn detect_anomalies(records: &[MetricRecord], today: NaiveDate, lookback_days: i64) -> AnomalyReport {
    let cutoff = today - Duration::days(lookback_days.max(0));
    let window: Vec<&MetricRecord> = records
        .iter()
        .filter(|r| r.key.date >= cutoff && r.key.date <= today)
        .collect();

    let mut report = AnomalyReport::default();
    if window.is_empty() {
        report.push(Anomaly::NoRecentData {
            message: format!("No data found for last {lookback_days} days"),
        });
        return report;
    }

    let spends: Vec<f64> = window
        .iter()
        .filter(|r| r.totals.spend > Decimal::ZERO)
        .map(|r| spend_of(r))
        .collect();
    if let Some(avg) = mean(&spends) {
        let threshold = avg * SPEND_OUTLIER_FACTOR;
        for record in &window {
            let value = spend_of(record);
            if value > threshold {
                report.push(Anomaly::HighSpend {
                    entity_id: record.key.entity_id.clone(),
                    date: record.key.date,
                    value,
                    threshold,
                });
            }
        }
    }

    let roas_values: Vec<f64> = window
        .iter()
        .map(|r| r.ratios().roas)
        .filter(|roas| *roas > 0.0)
        .collect();
    let roas_threshold = mean(&roas_values).map(|avg| avg * ROAS_OUTLIER_FACTOR);
    for record in &window {
        let roas = record.ratios().roas;
        match roas_threshold {
            Some(threshold) if roas > threshold => report.push(Anomaly::ExtremelyHighRoas {
                entity_id: record.key.entity_id.clone(),
                date: record.key.date,
                value: roas,
                threshold,
            }),
            _ if roas == 0.0 && record.totals.spend > Decimal::ZERO => {
                report.push(Anomaly::ZeroRoasWithSpend {
                    entity_id: record.key.entity_id.clone(),
                    date: record.key.date,
                    spend: spend_of(record),
                })
            }
            _ => {}
        }
    }

    let seen: BTreeSet<NaiveDate> = window.iter().map(|r| r.key.date).collect();
    for date in days_in_range(cutoff, today - Duration::days(1)) {
        if !seen.contains(&date) {
            report.push(Anomaly::MissingDailyData { date });
        }
    }

    for record in &window {
        let totals = &record.totals;
        if totals.clicks > totals.impressions {
            report.push(Anomaly::ClicksExceedImpressions {
                entity_id: record.key.entity_id.clone(),
                date: record.key.date,
                clicks: totals.clicks,
                impressions: totals.impressions,
            });
        }
        if totals.conversions > totals.clicks {
            report.push(Anomaly::ConversionsExceedClicks {
                entity_id: record.key.entity_id.clone(),
                date: record.key.date,
                conversions: totals.conversions,
                clicks: totals.clicks,
            });
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{DailyKey, EntityKind, MetricTotals};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn record(entity: &str, day: u32, impressions: i64, clicks: i64, spend: &str, value: &str) -> MetricRecord {
        MetricRecord::new(
            DailyKey {
                entity_id: entity.to_string(),
                entity_kind: EntityKind::Ad,
                client_id: "client_1".to_string(),
                date: date(day),
                attribution: "default".to_string(),
            },
            "USD".to_string(),
            MetricTotals {
                impressions,
                clicks,
                conversions: 0,
                spend: spend.parse().unwrap(),
                conversion_value: value.parse().unwrap(),
            },
            1.0,
        )
    }

    #[test]
    fn empty_window_reports_no_recent_data_only() {
        let report = detect_anomalies(&[], date(10), 7);
        assert_eq!(report.missing_data.len(), 1);
        assert_eq!(report.missing_data[0].severity, Severity::High);
        assert!(matches!(report.missing_data[0].anomaly, Anomaly::NoRecentData { .. }));
        assert!(report.outliers.is_empty());
    }

    #[test]
    fn gaps_in_the_window_are_missing_days() {
        // window is Mar 7..=Mar 9 expected, today excluded
        let records = vec![record("ad_1", 7, 100, 10, "10.00", "20.00"), record("ad_1", 9, 100, 10, "10.00", "20.00")];
        let report = detect_anomalies(&records, date(10), 3);
        let missing: Vec<_> = report
            .missing_data
            .iter()
            .map(|f| match &f.anomaly {
                Anomaly::MissingDailyData { date } => *date,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(missing, vec![date(8)]);
    }

    #[test]
    fn spend_spike_is_a_medium_outlier() {
        let mut records: Vec<_> = (1..=9)
            .map(|d| record("ad_1", d, 1000, 10, "10.00", "20.00"))
            .collect();
        records.push(record("ad_2", 9, 1000, 10, "500.00", "1000.00"));
        let report = detect_anomalies(&records, date(10), 9);
        let spikes: Vec<_> = report
            .outliers
            .iter()
            .filter(|f| matches!(f.anomaly, Anomaly::HighSpend { .. }))
            .collect();
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].severity, Severity::Medium);
    }

    #[test]
    fn zero_roas_with_spend_is_suspicious() {
        let records = vec![
            record("ad_1", 9, 100, 10, "10.00", "30.00"),
            record("ad_2", 9, 100, 10, "15.00", "0"),
        ];
        let report = detect_anomalies(&records, date(10), 1);
        assert_eq!(report.suspicious_patterns.len(), 1);
        assert!(matches!(
            &report.suspicious_patterns[0].anomaly,
            Anomaly::ZeroRoasWithSpend { entity_id, .. } if entity_id == "ad_2"
        ));
    }

    #[test]
    fn stored_ordering_violations_are_high_inconsistencies() {
        let records = vec![record("ad_1", 9, 5, 10, "1.00", "1.00")];
        let report = detect_anomalies(&records, date(10), 1);
        assert_eq!(report.inconsistencies.len(), 1);
        let counts = report.severity_counts();
        assert_eq!(counts.high_severity, 1);
    }

    #[test]
    fn findings_serialize_with_type_tag_and_severity() {
        let mut report = AnomalyReport::default();
        report.push(Anomaly::MissingDailyData { date: date(3) });
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["missing_data"][0]["type"], "missing_daily_data");
        assert_eq!(json["missing_data"][0]["severity"], "medium");
        assert_eq!(json["missing_data"][0]["date"], "2026-03-03");
    }
}
