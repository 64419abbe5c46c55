use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::metrics::{EntityKind, MetricRecord, MetricTotals, RollupKey, RollupRecord};
use crate::period::Period;

#[derive(Debug)]
struct Group {
    client_id: String,
    currency: String,
    totals: MetricTotals,
    frequency_sum: f64,
    days: usize,
}

/// Roll the records of `daily` that fall inside `period` into one rollup per
/// `(entity_kind, entity_id, attribution)`.
///
/// Bases are summed and ratios recomputed from the sums. Frequency is the
/// mean of the daily values. A group that spans two currencies is an error.
pub fn summarize(period: &Period, daily: &[MetricRecord]) -> Result<Vec<RollupRecord>, CoreError> {
    let mut groups: BTreeMap<(EntityKind, String, String), Group> = BTreeMap::new();

    for record in daily.iter().filter(|r| period.contains(r.key.date)) {
        let key = (
            record.key.entity_kind,
            record.key.entity_id.clone(),
            record.key.attribution.clone(),
        );
        let group = groups.entry(key).or_insert_with(|| Group {
            client_id: record.key.client_id.clone(),
            currency: record.currency.clone(),
            totals: MetricTotals::default(),
            frequency_sum: 0.0,
            days: 0,
        });
        if group.currency != record.currency {
            return Err(CoreError::MixedCurrency {
                entity_id: record.key.entity_id.clone(),
                attribution: record.key.attribution.clone(),
                first: group.currency.clone(),
                second: record.currency.clone(),
            });
        }
        group.totals += &record.totals;
        group.frequency_sum += record.frequency;
        group.days += 1;
    }

    Ok(groups
        .into_iter()
        .map(|((entity_kind, entity_id, attribution), group)| {
            let frequency = group.frequency_sum / group.days as f64;
            RollupRecord::new(
                RollupKey {
                    entity_id,
                    entity_kind,
                    client_id: group.client_id,
                    granularity: period.granularity,
                    period_start: period.start,
                    attribution,
                },
                group.currency,
                group.totals,
                frequency,
            )
        })
        .collect())
}
