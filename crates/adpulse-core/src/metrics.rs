use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::period::Granularity;

/// Attribution model used when the source does not name one.
pub const DEFAULT_ATTRIBUTION: &str = "default";

/// Fractional digits kept for monetary values (matches the `DECIMAL(18, 2)` columns).
pub const MONEY_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Ad,
    Campaign,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Ad, EntityKind::Campaign];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Ad => "ad",
            EntityKind::Campaign => "campaign",
        }
    }

    /// Parse an optional query value, defaulting to [`EntityKind::Ad`].
    pub fn parse_or_default(raw: Option<&str>) -> Result<Self, CoreError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(EntityKind::Ad),
            Some(value) => value.parse(),
        }
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ad" | "ads" => Ok(EntityKind::Ad),
            "campaign" | "campaigns" => Ok(EntityKind::Campaign),
            other => Err(CoreError::UnknownEntityKind(other.to_string())),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summable base values shared by daily and rollup records.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MetricTotals {
    pub impressions: i64,
    pub clicks: i64,
    pub conversions: i64,
    pub spend: Decimal,
    pub conversion_value: Decimal,
}

impl MetricTotals {
    /// Round monetary fields to the stored scale so in-memory values equal
    /// what a round trip through storage returns.
    pub fn normalized(mut self) -> Self {
        self.spend = self.spend.round_dp(MONEY_SCALE);
        self.conversion_value = self.conversion_value.round_dp(MONEY_SCALE);
        self
    }
}

impl AddAssign<&MetricTotals> for MetricTotals {
    fn add_assign(&mut self, rhs: &MetricTotals) {
        self.impressions += rhs.impressions;
        self.clicks += rhs.clicks;
        self.conversions += rhs.conversions;
        self.spend += rhs.spend;
        self.conversion_value += rhs.conversion_value;
    }
}

/// Ratios derived from [`MetricTotals`]. Every ratio is 0 when its
/// denominator is 0; `ctr` is a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DerivedRatios {
    pub ctr: f64,
    pub cpc: f64,
    pub cpm: f64,
    pub roas: f64,
}

impl DerivedRatios {
    pub fn from_totals(totals: &MetricTotals) -> Self {
        let ctr = if totals.impressions > 0 {
            (totals.clicks as f64 * 100.0) / totals.impressions as f64
        } else {
            0.0
        };
        let cpc = decimal_ratio(totals.spend, Decimal::from(totals.clicks));
        let cpm = decimal_ratio(
            totals.spend * Decimal::from(1000),
            Decimal::from(totals.impressions),
        );
        let roas = decimal_ratio(totals.conversion_value, totals.spend);
        Self {
            ctr,
            cpc,
            cpm,
            roas,
        }
    }

    /// Largest absolute difference between two ratio sets, field by field.
    pub fn max_abs_diff(&self, other: &DerivedRatios) -> f64 {
        [
            (self.ctr - other.ctr).abs(),
            (self.cpc - other.cpc).abs(),
            (self.cpm - other.cpm).abs(),
            (self.roas - other.roas).abs(),
        ]
        .into_iter()
        .fold(0.0, f64::max)
    }
}

fn decimal_ratio(numerator: Decimal, denominator: Decimal) -> f64 {
    if denominator <= Decimal::ZERO {
        return 0.0;
    }
    numerator
        .checked_div(denominator)
        .and_then(|v| v.to_f64())
        .unwrap_or(0.0)
}

/// Identity of a daily record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DailyKey {
    pub entity_id: String,
    pub entity_kind: EntityKind,
    pub client_id: String,
    pub date: NaiveDate,
    pub attribution: String,
}

/// One day of performance data for one ad or campaign under one attribution model.
///
/// Ratios are computed at construction and cannot be set independently of
/// the base counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    #[serde(flatten)]
    pub key: DailyKey,
    pub currency: String,
    #[serde(flatten)]
    pub totals: MetricTotals,
    pub frequency: f64,
    #[serde(flatten)]
    ratios: DerivedRatios,
}

impl MetricRecord {
    pub fn new(key: DailyKey, currency: String, totals: MetricTotals, frequency: f64) -> Self {
        let totals = totals.normalized();
        Self {
            key,
            currency,
            ratios: DerivedRatios::from_totals(&totals),
            totals,
            frequency,
        }
    }

    pub fn ratios(&self) -> &DerivedRatios {
        &self.ratios
    }
}

/// Identity of a weekly or monthly rollup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RollupKey {
    pub entity_id: String,
    pub entity_kind: EntityKind,
    pub client_id: String,
    pub granularity: Granularity,
    pub period_start: NaiveDate,
    pub attribution: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollupRecord {
    #[serde(flatten)]
    pub key: RollupKey,
    pub period_end: NaiveDate,
    pub currency: String,
    #[serde(flatten)]
    pub totals: MetricTotals,
    pub frequency: f64,
    #[serde(flatten)]
    ratios: DerivedRatios,
}

impl RollupRecord {
    pub fn new(key: RollupKey, currency: String, totals: MetricTotals, frequency: f64) -> Self {
        let totals = totals.normalized();
        Self {
            period_end: key.granularity.period_end(key.period_start),
            key,
            currency,
            ratios: DerivedRatios::from_totals(&totals),
            totals,
            frequency,
        }
    }

    pub fn ratios(&self) -> &DerivedRatios {
        &self.ratios
    }
}

/// Display metadata for an ad or campaign, upserted during ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub entity_kind: EntityKind,
    pub client_id: String,
    pub name: Option<String>,
    pub parent_id: Option<String>,
}

fn default_attribution() -> String {
    DEFAULT_ATTRIBUTION.to_string()
}

/// A record as delivered by the ads platform.
///
/// `impressions`, `clicks` and `spend` are required and stay optional here so
/// validation can report their absence. Missing `conversions`,
/// `conversion_value` and `frequency` mean zero; a missing `attribution` means
/// [`DEFAULT_ATTRIBUTION`]; a missing `currency` is filled by the caller.
/// Supplied ratios are only checked, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub entity_id: String,
    pub entity_kind: EntityKind,
    #[serde(default)]
    pub entity_name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub date: NaiveDate,
    #[serde(default = "default_attribution")]
    pub attribution: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub impressions: Option<i64>,
    #[serde(default)]
    pub clicks: Option<i64>,
    #[serde(default)]
    pub spend: Option<Decimal>,
    #[serde(default)]
    pub conversions: i64,
    #[serde(default)]
    pub conversion_value: Decimal,
    #[serde(default)]
    pub frequency: f64,
    #[serde(default)]
    pub ctr: Option<f64>,
    #[serde(default)]
    pub cpc: Option<f64>,
    #[serde(default)]
    pub cpm: Option<f64>,
    #[serde(default)]
    pub roas: Option<f64>,
}

impl RawRecord {
    /// Base totals, or `None` when a required field is missing.
    pub fn totals(&self) -> Option<MetricTotals> {
        Some(MetricTotals {
            impressions: self.impressions?,
            clicks: self.clicks?,
            conversions: self.conversions,
            spend: self.spend?,
            conversion_value: self.conversion_value,
        })
    }

    /// Convert into a daily record owned by `client_id`.
    pub fn into_metric_record(self, client_id: &str, default_currency: &str) -> Option<MetricRecord> {
        let totals = self.totals()?;
        let currency = self
            .currency
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| default_currency.to_string());
        Some(MetricRecord::new(
            DailyKey {
                entity_id: self.entity_id,
                entity_kind: self.entity_kind,
                client_id: client_id.to_string(),
                date: self.date,
                attribution: self.attribution,
            },
            currency,
            totals,
            self.frequency,
        ))
    }

    pub fn entity(&self, client_id: &str) -> EntityRecord {
        EntityRecord {
            entity_id: self.entity_id.clone(),
            entity_kind: self.entity_kind,
            client_id: client_id.to_string(),
            name: self.entity_name.clone(),
            parent_id: self.parent_id.clone(),
        }
    }
}
