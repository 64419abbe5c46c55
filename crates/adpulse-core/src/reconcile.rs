use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::metrics::{DerivedRatios, EntityKind, MetricRecord, MetricTotals, RollupRecord};
use crate::period::{Granularity, Period};

/// Absolute difference tolerated between a rollup field and its daily sum.
pub const RECONCILE_TOLERANCE: f64 = 0.01;

/// A rollup as read back from storage, with the ratio columns it was
/// written with.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRollup {
    pub record: RollupRecord,
    pub stored_ratios: DerivedRatios,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    WeeklyWithoutDaily,
    MonthlyWithoutDaily,
    ImpressionsMismatch,
    ClicksMismatch,
    ConversionsMismatch,
    SpendMismatch,
    ConversionValueMismatch,
    RatioMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discrepancy {
    #[serde(rename = "type")]
    pub kind: DiscrepancyKind,
    pub entity_id: String,
    pub entity_kind: EntityKind,
    pub attribution: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollup_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_sum: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub granularity: Granularity,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub is_consistent: bool,
    pub daily_count: usize,
    pub rollup_count: usize,
    pub discrepancies: Vec<Discrepancy>,
}

/// Compare each rollup of `period` against the sum of its daily sources.
///
/// Only rollups are walked: daily data that has not been aggregated yet is
/// not a discrepancy.
pub fn reconcile(period: &Period, daily: &[MetricRecord], rollups: &[StoredRollup]) -> ReconciliationReport {
    let in_period: Vec<&MetricRecord> = daily.iter().filter(|r| period.contains(r.key.date)).collect();

    let mut sums: HashMap<(EntityKind, &str, &str), MetricTotals> = HashMap::new();
    for record in &in_period {
        let key = (
            record.key.entity_kind,
            record.key.entity_id.as_str(),
            record.key.attribution.as_str(),
        );
        *sums.entry(key).or_default() += &record.totals;
    }

    let mut discrepancies = Vec::new();
    for stored in rollups {
        let rollup = &stored.record;
        let discrepancy = |kind, rollup_value, daily_sum| Discrepancy {
            kind,
            entity_id: rollup.key.entity_id.clone(),
            entity_kind: rollup.key.entity_kind,
            attribution: rollup.key.attribution.clone(),
            rollup_value,
            daily_sum,
        };

        let key = (
            rollup.key.entity_kind,
            rollup.key.entity_id.as_str(),
            rollup.key.attribution.as_str(),
        );
        let Some(expected) = sums.get(&key) else {
            let kind = match period.granularity {
                Granularity::Week => DiscrepancyKind::WeeklyWithoutDaily,
                Granularity::Month => DiscrepancyKind::MonthlyWithoutDaily,
            };
            discrepancies.push(discrepancy(kind, None, None));
            continue;
        };

        let actual = &rollup.totals;
        for (kind, got, want) in [
            (DiscrepancyKind::ImpressionsMismatch, actual.impressions, expected.impressions),
            (DiscrepancyKind::ClicksMismatch, actual.clicks, expected.clicks),
            (DiscrepancyKind::ConversionsMismatch, actual.conversions, expected.conversions),
        ] {
            if got != want {
                discrepancies.push(discrepancy(kind, Some(got as f64), Some(want as f64)));
            }
        }
        for (kind, got, want) in [
            (DiscrepancyKind::SpendMismatch, actual.spend, expected.spend),
            (
                DiscrepancyKind::ConversionValueMismatch,
                actual.conversion_value,
                expected.conversion_value,
            ),
        ] {
            if money_differs(got, want) {
                discrepancies.push(discrepancy(kind, got.to_f64(), want.to_f64()));
            }
        }

        let recomputed = DerivedRatios::from_totals(actual);
        let drift = stored.stored_ratios.max_abs_diff(&recomputed);
        if drift > RECONCILE_TOLERANCE {
            discrepancies.push(discrepancy(DiscrepancyKind::RatioMismatch, Some(drift), None));
        }
    }

    ReconciliationReport {
        granularity: period.granularity,
        period_start: period.start,
        period_end: period.end,
        is_consistent: discrepancies.is_empty(),
        daily_count: in_period.len(),
        rollup_count: rollups.len(),
        discrepancies,
    }
}

fn money_differs(a: Decimal, b: Decimal) -> bool {
    let tolerance = Decimal::new(1, 2);
    (a - b).abs() > tolerance
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::metrics::DailyKey;
    use crate::rollup::summarize;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn daily(entity: &str, offset: i64) -> MetricRecord {
        MetricRecord::new(
            DailyKey {
                entity_id: entity.to_string(),
                entity_kind: EntityKind::Ad,
                client_id: "client_1".to_string(),
                date: monday() + Duration::days(offset),
                attribution: "default".to_string(),
            },
            "USD".to_string(),
            MetricTotals {
                impressions: 100,
                clicks: 10,
                conversions: 1,
                spend: "10.00".parse().unwrap(),
                conversion_value: "50.00".parse().unwrap(),
            },
            1.0,
        )
    }

    fn stored(records: Vec<RollupRecord>) -> Vec<StoredRollup> {
        records
            .into_iter()
            .map(|record| StoredRollup {
                stored_ratios: *record.ratios(),
                record,
            })
            .collect()
    }

    #[test]
    fn fresh_rollup_reconciles() {
        let period = Period::week(monday()).unwrap();
        let daily: Vec<_> = (0..7).map(|i| daily("ad_1", i)).collect();
        let rollups = stored(summarize(&period, &daily).unwrap());
        let report = reconcile(&period, &daily, &rollups);
        assert!(report.is_consistent, "{:?}", report.discrepancies);
        assert_eq!(report.daily_count, 7);
        assert_eq!(report.rollup_count, 1);
    }

    #[test]
    fn stale_rollup_reports_each_mismatched_field() {
        let period = Period::week(monday()).unwrap();
        let mut daily_records: Vec<_> = (0..6).map(|i| daily("ad_1", i)).collect();
        let rollups = stored(summarize(&period, &daily_records).unwrap());
        daily_records.push(daily("ad_1", 6));

        let report = reconcile(&period, &daily_records, &rollups);
        assert!(!report.is_consistent);
        let kinds: Vec<_> = report.discrepancies.iter().map(|d| d.kind).collect();
        assert!(kinds.contains(&DiscrepancyKind::ImpressionsMismatch));
        assert!(kinds.contains(&DiscrepancyKind::SpendMismatch));
        assert!(!kinds.contains(&DiscrepancyKind::RatioMismatch));
        let impressions = &report.discrepancies[0];
        assert_eq!(impressions.rollup_value, Some(600.0));
        assert_eq!(impressions.daily_sum, Some(700.0));
    }

    #[test]
    fn rollup_without_daily_sources_is_flagged_by_granularity() {
        let period = Period::week(monday()).unwrap();
        let daily_records: Vec<_> = (0..7).map(|i| daily("ad_1", i)).collect();
        let rollups = stored(summarize(&period, &daily_records).unwrap());
        let report = reconcile(&period, &[], &rollups);
        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].kind, DiscrepancyKind::WeeklyWithoutDaily);
        let json = serde_json::to_value(&report.discrepancies[0]).unwrap();
        assert_eq!(json["type"], "weekly_without_daily");
    }

    #[test]
    fn tampered_ratio_columns_are_a_ratio_mismatch() {
        let period = Period::week(monday()).unwrap();
        let daily_records: Vec<_> = (0..7).map(|i| daily("ad_1", i)).collect();
        let mut rollups = stored(summarize(&period, &daily_records).unwrap());
        rollups[0].stored_ratios.roas = 9.0;
        let report = reconcile(&period, &daily_records, &rollups);
        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].kind, DiscrepancyKind::RatioMismatch);
    }
}
