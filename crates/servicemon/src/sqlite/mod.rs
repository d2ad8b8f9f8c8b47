use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};

use crate::models::{ParamValue, QueryStats};
use crate::report::Report;
use crate::utils::time::{format_utc, now_utc_rfc3339};

pub const SQLITE_SCHEMA_VERSION: &str = "query-stats.v1.sqlite.v1";
pub const RUNS_TABLE: &str = "query_runs";
pub const STATS_TABLE: &str = "query_stats";
pub const INTERVALS_TABLE: &str = "query_intervals";
pub const FAILURES_TABLE: &str = "query_failures";
pub const SCHEMA_META_TABLE: &str = "query_schema_meta";

const CREATE_RUNS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS query_runs (
    run_id TEXT NOT NULL PRIMARY KEY,
    recorded_at_utc TEXT NOT NULL,
    succeeded INTEGER NOT NULL,
    failed INTEGER NOT NULL,
    skipped INTEGER NOT NULL
);
"#;

const CREATE_STATS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS query_stats (
    stats_id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES query_runs(run_id),
    name TEXT NOT NULL,
    base_name TEXT NOT NULL,
    query_type TEXT NOT NULL,
    access_url TEXT NOT NULL,
    start_time_utc TEXT,
    end_time_utc TEXT,
    duration_secs REAL NOT NULL,
    params_json TEXT NOT NULL DEFAULT '{}',
    status INTEGER,
    size INTEGER,
    num_rows INTEGER,
    num_columns INTEGER,
    error TEXT,
    CHECK ((error IS NULL) OR (num_rows = -1 AND num_columns = -1))
);
"#;

const CREATE_INDEX_STATS_NAME_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_query_stats_name_time
ON query_stats(name, start_time_utc);
"#;

const CREATE_INTERVALS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS query_intervals (
    stats_id INTEGER NOT NULL REFERENCES query_stats(stats_id),
    sequence INTEGER NOT NULL,
    label TEXT NOT NULL,
    start_time_utc TEXT NOT NULL,
    duration_secs REAL NOT NULL,
    PRIMARY KEY (stats_id, sequence),
    CHECK (duration_secs >= 0)
);
"#;

const CREATE_FAILURES_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS query_failures (
    run_id TEXT NOT NULL REFERENCES query_runs(run_id),
    label TEXT NOT NULL,
    kind TEXT NOT NULL,
    message TEXT NOT NULL,
    intervals_recorded INTEGER NOT NULL,
    CHECK (kind IN ('validation', 'configuration', 'transport', 'storage'))
);
"#;

const CREATE_META_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS query_schema_meta (
    schema_version TEXT NOT NULL,
    applied_at_utc TEXT NOT NULL
);
"#;

#[must_use]
pub fn schema_statements() -> &'static [&'static str] {
    &[
        CREATE_RUNS_TABLE_SQL,
        CREATE_STATS_TABLE_SQL,
        CREATE_INDEX_STATS_NAME_SQL,
        CREATE_INTERVALS_TABLE_SQL,
        CREATE_FAILURES_TABLE_SQL,
        CREATE_META_TABLE_SQL,
    ]
}

#[must_use]
pub fn create_schema_sql() -> String {
    schema_statements().join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqliteWriteStats {
    pub stats_written: usize,
    pub intervals_written: usize,
    pub failures_written: usize,
}

pub fn open_sqlite_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create sqlite parent directory: {}",
                parent.display()
            )
        })?;
    }

    Connection::open(path)
        .with_context(|| format!("failed to open sqlite database: {}", path.display()))
}

pub fn ensure_sqlite_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(&create_schema_sql())
        .context("failed to create sqlite schema")?;

    let existing = connection
        .query_row(
            &format!("SELECT schema_version FROM {SCHEMA_META_TABLE} WHERE schema_version = ?1"),
            [SQLITE_SCHEMA_VERSION],
            |row| row.get::<usize, String>(0),
        )
        .optional()
        .context("failed to query sqlite schema version metadata")?;
    if existing.is_some() {
        return Ok(());
    }

    let applied_at_utc = now_utc_rfc3339()?;
    connection
        .execute(
            &format!(
                "INSERT INTO {SCHEMA_META_TABLE} (schema_version, applied_at_utc) VALUES (?1, ?2)"
            ),
            params![SQLITE_SCHEMA_VERSION, applied_at_utc],
        )
        .context("failed to write sqlite schema meta row")?;

    Ok(())
}

pub fn write_report_to_sqlite(path: &Path, report: &Report) -> Result<SqliteWriteStats> {
    let mut connection = open_sqlite_connection(path)?;
    ensure_sqlite_schema(&connection)?;
    write_report(&mut connection, report)
}

/// Appends one run. Everything lands in a single transaction.
pub fn write_report(connection: &mut Connection, report: &Report) -> Result<SqliteWriteStats> {
    let recorded_at_utc = now_utc_rfc3339()?;
    let tx = connection
        .transaction()
        .context("failed to open sqlite transaction")?;
    let mut intervals_written = 0_usize;

    tx.execute(
        &format!(
            "INSERT INTO {RUNS_TABLE} (run_id, recorded_at_utc, succeeded, failed, skipped) VALUES (?1, ?2, ?3, ?4, ?5)"
        ),
        params![
            report.run_id,
            recorded_at_utc,
            report.stats.len() as i64,
            report.failures.len() as i64,
            report.skipped as i64
        ],
    )
    .with_context(|| format!("failed to insert run_id={}", report.run_id))?;

    {
        let mut insert_stats = tx
            .prepare_cached(&format!(
                "INSERT INTO {STATS_TABLE} (run_id, name, base_name, query_type, access_url, start_time_utc, end_time_utc, duration_secs, params_json, status, size, num_rows, num_columns, error) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ))
            .context("failed to prepare sqlite stats insert")?;
        let mut insert_interval = tx
            .prepare_cached(&format!(
                "INSERT INTO {INTERVALS_TABLE} (stats_id, sequence, label, start_time_utc, duration_secs) VALUES (?1, ?2, ?3, ?4, ?5)"
            ))
            .context("failed to prepare sqlite interval insert")?;

        for stats in &report.stats {
            let meta = stats.result_meta();
            insert_stats
                .execute(params![
                    report.run_id,
                    stats.name(),
                    stats.base_name(),
                    stats.query_type(),
                    stats.access_url(),
                    stats.overall_start().map(format_utc),
                    stats.overall_end().map(format_utc),
                    stats.total_duration().as_secs_f64(),
                    params_json(stats)?,
                    meta.map(|meta| i64::from(meta.status_code())),
                    meta.map(|meta| meta.byte_size()),
                    meta.map(|meta| meta.row_count()),
                    meta.map(|meta| meta.column_count()),
                    meta.and_then(|meta| meta.error()),
                ])
                .with_context(|| format!("failed to insert stats name={}", stats.name()))?;
            let stats_id = tx.last_insert_rowid();

            for (sequence, interval) in stats.intervals().iter().enumerate() {
                insert_interval
                    .execute(params![
                        stats_id,
                        sequence as i64,
                        interval.label(),
                        format_utc(interval.started_at()),
                        interval.duration().as_secs_f64(),
                    ])
                    .with_context(|| {
                        format!(
                            "failed to insert interval {} of name={}",
                            interval.label(),
                            stats.name()
                        )
                    })?;
                intervals_written += 1;
            }
        }

        let mut insert_failure = tx
            .prepare_cached(&format!(
                "INSERT INTO {FAILURES_TABLE} (run_id, label, kind, message, intervals_recorded) VALUES (?1, ?2, ?3, ?4, ?5)"
            ))
            .context("failed to prepare sqlite failure insert")?;
        for failure in &report.failures {
            insert_failure
                .execute(params![
                    report.run_id,
                    failure.label,
                    failure.kind,
                    failure.message,
                    failure.intervals_recorded as i64,
                ])
                .with_context(|| format!("failed to insert failure label={}", failure.label))?;
        }
    }

    tx.commit()
        .context("failed to commit sqlite report transaction")?;

    Ok(SqliteWriteStats {
        stats_written: report.stats.len(),
        intervals_written,
        failures_written: report.failures.len(),
    })
}

fn params_json(stats: &QueryStats) -> Result<String> {
    let mut object = Map::new();
    for (name, value) in stats.params().iter() {
        let value = match value {
            ParamValue::Number(number) => serde_json::Number::from_f64(*number)
                .map_or(Value::Null, Value::Number),
            ParamValue::Text(text) => Value::String(text.clone()),
        };
        object.insert(name.to_string(), value);
    }
    serde_json::to_string(&Value::Object(object)).context("failed to encode params json")
}
