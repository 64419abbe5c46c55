use std::collections::BTreeMap;

use anyhow::Result;
use chrono::NaiveDate;
use duckdb::types::ToSql;
use duckdb::Connection;

use adpulse_core::metrics::{
    DailyKey, DerivedRatios, EntityKind, EntityRecord, MetricRecord, MetricTotals, RollupKey,
    RollupRecord,
};
use adpulse_core::period::Granularity;
use adpulse_core::reconcile::StoredRollup;

use crate::backend::{format_date, parse_date, parse_decimal};
use crate::schema::{daily_table, rollup_table};
use crate::DuckDbBackend;

/// Columns shared by every daily and rollup table, in read order.
const BASE_COLUMNS: &str = "impressions, clicks, conversions, \
     CAST(spend AS VARCHAR), CAST(conversion_value AS VARCHAR), frequency, \
     ctr, cpc, cpm, roas";

struct BaseRow {
    currency: String,
    impressions: i64,
    clicks: i64,
    conversions: i64,
    spend: String,
    conversion_value: String,
    frequency: f64,
    stored: DerivedRatios,
}

impl BaseRow {
    /// Read the [`BASE_COLUMNS`] block starting at column `at`, with the
    /// currency column just before it.
    fn read(row: &duckdb::Row<'_>, at: usize) -> duckdb::Result<Self> {
        Ok(Self {
            currency: row.get(at - 1)?,
            impressions: row.get(at)?,
            clicks: row.get(at + 1)?,
            conversions: row.get(at + 2)?,
            spend: row.get(at + 3)?,
            conversion_value: row.get(at + 4)?,
            frequency: row.get(at + 5)?,
            stored: DerivedRatios {
                ctr: row.get(at + 6)?,
                cpc: row.get(at + 7)?,
                cpm: row.get(at + 8)?,
                roas: row.get(at + 9)?,
            },
        })
    }

    fn totals(&self) -> Result<MetricTotals> {
        Ok(MetricTotals {
            impressions: self.impressions,
            clicks: self.clicks,
            conversions: self.conversions,
            spend: parse_decimal(&self.spend)?,
            conversion_value: parse_decimal(&self.conversion_value)?,
        })
    }
}

struct DailyRow {
    entity_id: String,
    client_id: String,
    date: String,
    attribution: String,
    base: BaseRow,
}

struct RollupRow {
    entity_id: String,
    client_id: String,
    period_start: String,
    attribution: String,
    base: BaseRow,
}

/// Load daily rows of one kind matching `filter` (a SQL predicate over the
/// daily table's columns).
pub(crate) fn query_daily(
    conn: &Connection,
    kind: EntityKind,
    filter: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<MetricRecord>> {
    let sql = format!(
        "SELECT entity_id, client_id, CAST(date AS VARCHAR), attribution, currency, {BASE_COLUMNS} \
         FROM {} WHERE {filter} ORDER BY date, entity_id, attribution",
        daily_table(kind)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok(DailyRow {
            entity_id: row.get(0)?,
            client_id: row.get(1)?,
            date: row.get(2)?,
            attribution: row.get(3)?,
            base: BaseRow::read(row, 5)?,
        })
    })?;

    let mut records = Vec::new();
    for row in rows {
        let row = row?;
        let totals = row.base.totals()?;
        records.push(MetricRecord::new(
            DailyKey {
                entity_id: row.entity_id,
                entity_kind: kind,
                client_id: row.client_id,
                date: parse_date(&row.date)?,
                attribution: row.attribution,
            },
            row.base.currency,
            totals,
            row.base.frequency,
        ));
    }
    Ok(records)
}

pub(crate) fn load_daily_range(
    conn: &Connection,
    client_id: &str,
    kind: EntityKind,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<MetricRecord>> {
    query_daily(
        conn,
        kind,
        "client_id = ?1 AND date BETWEEN CAST(?2 AS DATE) AND CAST(?3 AS DATE)",
        duckdb::params![client_id, format_date(start), format_date(end)],
    )
}

/// Load rollup rows of one kind and granularity matching `filter`.
pub(crate) fn query_rollups(
    conn: &Connection,
    kind: EntityKind,
    granularity: Granularity,
    filter: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<StoredRollup>> {
    let sql = format!(
        "SELECT entity_id, client_id, CAST(period_start AS VARCHAR), attribution, currency, {BASE_COLUMNS} \
         FROM {} WHERE {filter} ORDER BY period_start, entity_id, attribution",
        rollup_table(kind, granularity)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok(RollupRow {
            entity_id: row.get(0)?,
            client_id: row.get(1)?,
            period_start: row.get(2)?,
            attribution: row.get(3)?,
            base: BaseRow::read(row, 5)?,
        })
    })?;

    let mut rollups = Vec::new();
    for row in rows {
        let row = row?;
        let totals = row.base.totals()?;
        let record = RollupRecord::new(
            RollupKey {
                entity_id: row.entity_id,
                entity_kind: kind,
                client_id: row.client_id,
                granularity,
                period_start: parse_date(&row.period_start)?,
                attribution: row.attribution,
            },
            row.base.currency,
            totals,
            row.base.frequency,
        );
        rollups.push(StoredRollup {
            record,
            stored_ratios: row.base.stored,
        });
    }
    Ok(rollups)
}

pub(crate) fn upsert_rollups(conn: &Connection, rollups: &[RollupRecord]) -> Result<()> {
    for rollup in rollups {
        let ratios = rollup.ratios();
        let sql = format!(
            r#"INSERT INTO {} (
                entity_id, client_id, period_start, period_end, attribution, currency,
                impressions, clicks, conversions, spend, conversion_value,
                ctr, cpc, cpm, roas, frequency, created_at, updated_at
            ) VALUES (
                ?1, ?2, CAST(?3 AS DATE), CAST(?4 AS DATE), ?5, ?6,
                ?7, ?8, ?9, CAST(?10 AS DECIMAL(18, 2)), CAST(?11 AS DECIMAL(18, 2)),
                ?12, ?13, ?14, ?15, ?16, now(), now()
            )
            ON CONFLICT (entity_id, period_start, attribution) DO UPDATE SET
                client_id = EXCLUDED.client_id,
                period_end = EXCLUDED.period_end,
                currency = EXCLUDED.currency,
                impressions = EXCLUDED.impressions,
                clicks = EXCLUDED.clicks,
                conversions = EXCLUDED.conversions,
                spend = EXCLUDED.spend,
                conversion_value = EXCLUDED.conversion_value,
                ctr = EXCLUDED.ctr,
                cpc = EXCLUDED.cpc,
                cpm = EXCLUDED.cpm,
                roas = EXCLUDED.roas,
                frequency = EXCLUDED.frequency,
                updated_at = now()"#,
            rollup_table(rollup.key.entity_kind, rollup.key.granularity)
        );
        conn.execute(
            &sql,
            duckdb::params![
                rollup.key.entity_id,
                rollup.key.client_id,
                format_date(rollup.key.period_start),
                format_date(rollup.period_end),
                rollup.key.attribution,
                rollup.currency,
                rollup.totals.impressions,
                rollup.totals.clicks,
                rollup.totals.conversions,
                rollup.totals.spend.to_string(),
                rollup.totals.conversion_value.to_string(),
                ratios.ctr,
                ratios.cpc,
                ratios.cpm,
                ratios.roas,
                rollup.frequency,
            ],
        )?;
    }
    Ok(())
}

fn upsert_daily(conn: &Connection, record: &MetricRecord) -> Result<()> {
    let ratios = record.ratios();
    let sql = format!(
        r#"INSERT INTO {} (
            entity_id, client_id, date, attribution, currency,
            impressions, clicks, conversions, spend, conversion_value,
            ctr, cpc, cpm, roas, frequency, created_at, updated_at
        ) VALUES (
            ?1, ?2, CAST(?3 AS DATE), ?4, ?5,
            ?6, ?7, ?8, CAST(?9 AS DECIMAL(18, 2)), CAST(?10 AS DECIMAL(18, 2)),
            ?11, ?12, ?13, ?14, ?15, now(), now()
        )
        ON CONFLICT (entity_id, date, attribution) DO UPDATE SET
            client_id = EXCLUDED.client_id,
            currency = EXCLUDED.currency,
            impressions = EXCLUDED.impressions,
            clicks = EXCLUDED.clicks,
            conversions = EXCLUDED.conversions,
            spend = EXCLUDED.spend,
            conversion_value = EXCLUDED.conversion_value,
            ctr = EXCLUDED.ctr,
            cpc = EXCLUDED.cpc,
            cpm = EXCLUDED.cpm,
            roas = EXCLUDED.roas,
            frequency = EXCLUDED.frequency,
            updated_at = now()"#,
        daily_table(record.key.entity_kind)
    );
    conn.execute(
        &sql,
        duckdb::params![
            record.key.entity_id,
            record.key.client_id,
            format_date(record.key.date),
            record.key.attribution,
            record.currency,
            record.totals.impressions,
            record.totals.clicks,
            record.totals.conversions,
            record.totals.spend.to_string(),
            record.totals.conversion_value.to_string(),
            ratios.ctr,
            ratios.cpc,
            ratios.cpm,
            ratios.roas,
            record.frequency,
        ],
    )?;
    Ok(())
}

fn upsert_entity(conn: &Connection, entity: &EntityRecord) -> Result<()> {
    conn.execute(
        r#"INSERT INTO entities (entity_id, entity_kind, client_id, name, parent_id, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, now(), now())
           ON CONFLICT (entity_id, entity_kind) DO UPDATE SET
               client_id = EXCLUDED.client_id,
               name = COALESCE(EXCLUDED.name, name),
               parent_id = COALESCE(EXCLUDED.parent_id, parent_id),
               updated_at = now()"#,
        duckdb::params![
            entity.entity_id,
            entity.entity_kind.as_str(),
            entity.client_id,
            entity.name,
            entity.parent_id,
        ],
    )?;
    Ok(())
}

impl DuckDbBackend {
    /// Upsert one day's batch of entities and daily records in a single
    /// transaction. Duplicate keys within the batch resolve to the last
    /// occurrence. Returns the number of metric rows written.
    pub async fn store_daily_batch(
        &self,
        entities: &[EntityRecord],
        records: &[MetricRecord],
    ) -> Result<usize> {
        let entities: BTreeMap<(&str, EntityKind), &EntityRecord> = entities
            .iter()
            .map(|e| ((e.entity_id.as_str(), e.entity_kind), e))
            .collect();
        let records: BTreeMap<(EntityKind, &str, NaiveDate, &str), &MetricRecord> = records
            .iter()
            .map(|r| {
                (
                    (
                        r.key.entity_kind,
                        r.key.entity_id.as_str(),
                        r.key.date,
                        r.key.attribution.as_str(),
                    ),
                    r,
                )
            })
            .collect();

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for entity in entities.values() {
            upsert_entity(&tx, entity)?;
        }
        for record in records.values() {
            upsert_daily(&tx, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Daily records of one kind for `client_id` dated within `[start, end]`.
    pub async fn daily_records(
        &self,
        client_id: &str,
        kind: EntityKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MetricRecord>> {
        let conn = self.conn.lock().await;
        load_daily_range(&conn, client_id, kind, start, end)
    }

    /// `true` when any daily row (ad or campaign) exists for the client on `date`.
    pub async fn has_daily_data(&self, client_id: &str, date: NaiveDate) -> Result<bool> {
        let conn = self.conn.lock().await;
        let mut total = 0i64;
        for kind in EntityKind::ALL {
            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE client_id = ?1 AND date = CAST(?2 AS DATE)",
                daily_table(kind)
            );
            let count: i64 = conn
                .prepare(&sql)?
                .query_row(duckdb::params![client_id, format_date(date)], |row| row.get(0))?;
            total += count;
        }
        Ok(total > 0)
    }

    /// Stored rollups of one kind for a period, including the ratio columns
    /// as written.
    pub async fn rollups(
        &self,
        client_id: &str,
        kind: EntityKind,
        granularity: Granularity,
        period_start: NaiveDate,
    ) -> Result<Vec<StoredRollup>> {
        let conn = self.conn.lock().await;
        query_rollups(
            &conn,
            kind,
            granularity,
            "client_id = ?1 AND period_start = CAST(?2 AS DATE)",
            duckdb::params![client_id, format_date(period_start)],
        )
    }

    /// Look up the stored metadata of one entity.
    pub async fn entity(&self, entity_id: &str, kind: EntityKind) -> Result<Option<EntityRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT entity_id, client_id, name, parent_id FROM entities \
             WHERE entity_id = ?1 AND entity_kind = ?2",
        )?;
        let mut rows = stmt.query_map(duckdb::params![entity_id, kind.as_str()], |row| {
            Ok(EntityRecord {
                entity_id: row.get(0)?,
                entity_kind: kind,
                client_id: row.get(1)?,
                name: row.get(2)?,
                parent_id: row.get(3)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }
}
