use adpulse_core::metrics::EntityKind;
use adpulse_core::period::Granularity;
use adpulse_core::retention::DataCategory;

/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// Every statement uses `IF NOT EXISTS`, so re-running it on startup is a
/// no-op for an existing database.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `ADPULSE_DUCKDB_MEMORY`, default `"1GB"`).
///
/// Money columns are `DECIMAL(18, 2)`. Ratio columns are written alongside
/// the bases but readers recompute them; only reconciliation looks at the
/// stored values.
pub fn init_sql(memory_limit: &str) -> String {
    let mut sql = format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- ENTITIES (ads and campaigns)
-- ===========================================
CREATE TABLE IF NOT EXISTS entities (
    entity_id       VARCHAR NOT NULL,
    entity_kind     VARCHAR NOT NULL,              -- 'ad' | 'campaign'
    client_id       VARCHAR NOT NULL,              -- ads account
    name            VARCHAR,
    parent_id       VARCHAR,                       -- campaign of an ad
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (entity_id, entity_kind)
);
CREATE INDEX IF NOT EXISTS idx_entities_client ON entities(client_id);

-- ===========================================
-- SYNC LOGS
-- ===========================================
CREATE TABLE IF NOT EXISTS sync_logs (
    id                VARCHAR PRIMARY KEY,         -- UUID v4
    client_id         VARCHAR NOT NULL,
    sync_type         VARCHAR NOT NULL,            -- 'daily' | 'weekly' | 'monthly' | 'backfill'
    period_date       DATE NOT NULL,
    status            VARCHAR NOT NULL,            -- 'pending' | 'running' | 'completed' | 'failed'
    records_processed BIGINT NOT NULL DEFAULT 0,
    error_message     VARCHAR,
    started_at        TIMESTAMP,
    completed_at      TIMESTAMP,
    retry_count       INTEGER NOT NULL DEFAULT 0,
    created_at        TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sync_logs_client_period
    ON sync_logs(client_id, sync_type, period_date);
"#
    );

    for kind in EntityKind::ALL {
        sql.push_str(&daily_table_sql(daily_table(kind)));
        for granularity in [Granularity::Week, Granularity::Month] {
            sql.push_str(&rollup_table_sql(rollup_table(kind, granularity)));
        }
    }
    sql
}

fn daily_table_sql(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    entity_id        VARCHAR NOT NULL,
    client_id        VARCHAR NOT NULL,
    date             DATE NOT NULL,
    attribution      VARCHAR NOT NULL,
    currency         VARCHAR NOT NULL,
    impressions      BIGINT NOT NULL,
    clicks           BIGINT NOT NULL,
    conversions      BIGINT NOT NULL,
    spend            DECIMAL(18, 2) NOT NULL,
    conversion_value DECIMAL(18, 2) NOT NULL,
    ctr              DOUBLE NOT NULL,               -- percentage
    cpc              DOUBLE NOT NULL,
    cpm              DOUBLE NOT NULL,
    roas             DOUBLE NOT NULL,
    frequency        DOUBLE NOT NULL,
    created_at       TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at       TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (entity_id, date, attribution)
);
CREATE INDEX IF NOT EXISTS idx_{table}_entity_date ON {table}(entity_id, date);
CREATE INDEX IF NOT EXISTS idx_{table}_date_roas ON {table}(date, roas DESC);
"#
    )
}

fn rollup_table_sql(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    entity_id        VARCHAR NOT NULL,
    client_id        VARCHAR NOT NULL,
    period_start     DATE NOT NULL,
    period_end       DATE NOT NULL,
    attribution      VARCHAR NOT NULL,
    currency         VARCHAR NOT NULL,
    impressions      BIGINT NOT NULL,
    clicks           BIGINT NOT NULL,
    conversions      BIGINT NOT NULL,
    spend            DECIMAL(18, 2) NOT NULL,
    conversion_value DECIMAL(18, 2) NOT NULL,
    ctr              DOUBLE NOT NULL,
    cpc              DOUBLE NOT NULL,
    cpm              DOUBLE NOT NULL,
    roas             DOUBLE NOT NULL,
    frequency        DOUBLE NOT NULL,
    created_at       TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at       TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (entity_id, period_start, attribution)
);
CREATE INDEX IF NOT EXISTS idx_{table}_client_period ON {table}(client_id, period_start);
"#
    )
}

/// Migrations tracking table SQL.
///
/// Run before [`init_sql`]. Tracks which numbered migrations have been
/// applied so restarts don't re-run them.
pub const MIGRATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS _migrations (
    id          VARCHAR PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Identifier of the baseline schema recorded in `_migrations`.
pub const BASELINE_MIGRATION: &str = "0001_baseline";

pub(crate) fn daily_table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Ad => "ad_metrics",
        EntityKind::Campaign => "campaign_metrics",
    }
}

pub(crate) fn rollup_table(kind: EntityKind, granularity: Granularity) -> &'static str {
    match (granularity, kind) {
        (Granularity::Week, EntityKind::Ad) => "weekly_ad_metrics",
        (Granularity::Week, EntityKind::Campaign) => "weekly_campaign_metrics",
        (Granularity::Month, EntityKind::Ad) => "monthly_ad_metrics",
        (Granularity::Month, EntityKind::Campaign) => "monthly_campaign_metrics",
    }
}

/// Tables holding rows of `category`, with the column (or expression) that
/// dates each row.
pub(crate) fn category_tables(category: DataCategory) -> &'static [(&'static str, &'static str)] {
    match category {
        DataCategory::DailyMetrics => &[("ad_metrics", "date"), ("campaign_metrics", "date")],
        DataCategory::WeeklyRollups => &[
            ("weekly_ad_metrics", "period_start"),
            ("weekly_campaign_metrics", "period_start"),
        ],
        DataCategory::MonthlyRollups => &[
            ("monthly_ad_metrics", "period_start"),
            ("monthly_campaign_metrics", "period_start"),
        ],
        DataCategory::SyncLogs => &[("sync_logs", "CAST(created_at AS DATE)")],
    }
}
