use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::Connection;
use servicemon::identity;
use servicemon::models::{Interval, QueryStats, ResultMetadata};
use servicemon::report::{FailureRecord, Report};
use servicemon::sqlite::{
    SQLITE_SCHEMA_VERSION, ensure_sqlite_schema, write_report, write_report_to_sqlite,
};
use time::OffsetDateTime;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{nanos}"))
}

fn stats(radius_deg: f64, meta: ResultMetadata) -> QueryStats {
    let identity = identity::compute("CSC", "cone", 125.886, 21.3377, radius_deg)
        .expect("identity should compute");
    let mut stats = QueryStats::new(
        identity.name,
        "CSC",
        "cone",
        "http://cda.harvard.edu/cscvo/coneSearch?",
        identity.params,
    );
    let start = OffsetDateTime::from_unix_timestamp(1_704_067_200).expect("valid timestamp");
    stats.add_interval(Interval::from_parts("do_query", start, Duration::from_millis(250)));
    stats.add_interval(Interval::from_parts(
        "stream_to_file",
        start + Duration::from_millis(250),
        Duration::from_millis(500),
    ));
    stats.set_result_meta(meta);
    stats
}

fn report(run_id: &str) -> Report {
    Report {
        run_id: run_id.to_string(),
        stats: vec![
            stats(0.1, ResultMetadata::readable(200, Some(2048), 3, 4)),
            stats(0.5, ResultMetadata::unreadable(502, Some(12), "root element is <html>")),
        ],
        failures: vec![FailureRecord {
            label: "CSC_cone_125.886_21.3377_1".to_string(),
            kind: "transport".to_string(),
            message: "transport error after 2 attempt(s): timed out".to_string(),
            intervals_recorded: 1,
        }],
        skipped: 0,
    }
}

#[test]
fn report_lands_in_every_table() {
    let path = unique_temp_dir("servicemon-sqlite-write").join("stats.sqlite");

    let written = write_report_to_sqlite(&path, &report("batch-1")).expect("report should write");
    assert_eq!(written.stats_written, 2);
    assert_eq!(written.intervals_written, 4);
    assert_eq!(written.failures_written, 1);

    let connection = Connection::open(&path).expect("sqlite should open");
    let (succeeded, failed): (i64, i64) = connection
        .query_row(
            "SELECT succeeded, failed FROM query_runs WHERE run_id = 'batch-1'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("run row should exist");
    assert_eq!((succeeded, failed), (2, 1));

    let (rows, columns, params_json): (i64, i64, String) = connection
        .query_row(
            "SELECT num_rows, num_columns, params_json FROM query_stats WHERE name = 'CSC_cone_125.886_21.3377_0.1'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .expect("stats row should exist");
    assert_eq!((rows, columns), (3, 4));
    assert_eq!(params_json, r#"{"DEC":21.3377,"RA":125.886,"SR":0.1}"#);

    let error: Option<String> = connection
        .query_row(
            "SELECT error FROM query_stats WHERE num_rows = -1",
            [],
            |row| row.get(0),
        )
        .expect("unreadable row should exist");
    assert_eq!(error.as_deref(), Some("root element is <html>"));

    let labels = connection
        .prepare("SELECT label FROM query_intervals ORDER BY stats_id, sequence")
        .expect("statement should prepare")
        .query_map([], |row| row.get::<_, String>(0))
        .expect("query should run")
        .collect::<Result<Vec<_>, _>>()
        .expect("labels should read");
    assert_eq!(
        labels,
        ["do_query", "stream_to_file", "do_query", "stream_to_file"]
    );
}

#[test]
fn runs_append_and_schema_meta_is_written_once() {
    let path = unique_temp_dir("servicemon-sqlite-append").join("stats.sqlite");

    write_report_to_sqlite(&path, &report("batch-1")).expect("first run should write");
    write_report_to_sqlite(&path, &report("batch-2")).expect("second run should write");

    let connection = Connection::open(&path).expect("sqlite should open");
    let runs: i64 = connection
        .query_row("SELECT COUNT(*) FROM query_runs", [], |row| row.get(0))
        .expect("count should query");
    let stats_rows: i64 = connection
        .query_row("SELECT COUNT(*) FROM query_stats", [], |row| row.get(0))
        .expect("count should query");
    let versions = connection
        .prepare("SELECT schema_version FROM query_schema_meta")
        .expect("statement should prepare")
        .query_map([], |row| row.get::<_, String>(0))
        .expect("query should run")
        .collect::<Result<Vec<_>, _>>()
        .expect("versions should read");

    assert_eq!(runs, 2);
    assert_eq!(stats_rows, 4);
    assert_eq!(versions, [SQLITE_SCHEMA_VERSION]);
}

#[test]
fn duplicate_run_id_rolls_back_the_whole_report() {
    let mut connection = Connection::open_in_memory().expect("in-memory sqlite should open");
    ensure_sqlite_schema(&connection).expect("schema should apply");

    write_report(&mut connection, &report("batch-1")).expect("first write succeeds");
    assert!(write_report(&mut connection, &report("batch-1")).is_err());

    let stats_rows: i64 = connection
        .query_row("SELECT COUNT(*) FROM query_stats", [], |row| row.get(0))
        .expect("count should query");
    assert_eq!(stats_rows, 2);
}
