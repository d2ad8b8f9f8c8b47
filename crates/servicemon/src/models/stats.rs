use std::fmt;
use std::time::{Duration, Instant};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::utils::time::{format_utc, unix_seconds};

pub const STATS_SCHEMA_VERSION: &str = "query-stats.v1";

pub const INTERVAL_DO_QUERY: &str = "do_query";
pub const INTERVAL_STREAM_TO_FILE: &str = "stream_to_file";
pub const INTERVAL_GATHER_METADATA: &str = "gather_metadata";

/// One timed phase. The wall-clock start is captured once; the length comes
/// from a monotonic clock, so the end can never precede the start.
#[derive(Debug, Clone)]
pub struct Interval {
    label: String,
    started_at: OffsetDateTime,
    clock: Option<Instant>,
    elapsed: Duration,
}

impl Interval {
    #[must_use]
    pub fn open(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            started_at: OffsetDateTime::now_utc(),
            clock: Some(Instant::now()),
            elapsed: Duration::ZERO,
        }
    }

    /// An already-closed interval with known bounds.
    #[must_use]
    pub fn from_parts(label: impl Into<String>, started_at: OffsetDateTime, elapsed: Duration) -> Self {
        Self {
            label: label.into(),
            started_at,
            clock: None,
            elapsed,
        }
    }

    /// Closing twice keeps the first end.
    pub fn close(&mut self) -> &mut Self {
        if let Some(clock) = self.clock.take() {
            self.elapsed = clock.elapsed();
        }
        self
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.clock.is_none()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    #[must_use]
    pub fn ended_at(&self) -> OffsetDateTime {
        self.started_at + self.elapsed
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.elapsed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Query parameters in insertion order; the order drives column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    entries: Vec<(String, ParamValue)>,
}

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the value in place when the key already exists.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stringified pairs for the HTTP query string.
    #[must_use]
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.clone(), value.to_string()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultMetadata {
    status_code: u16,
    byte_size: i64,
    row_count: i64,
    column_count: i64,
    error: Option<String>,
}

impl ResultMetadata {
    #[must_use]
    pub fn readable(status_code: u16, byte_size: Option<u64>, rows: u64, columns: u64) -> Self {
        Self {
            status_code,
            byte_size: byte_size.map_or(-1, clamp_to_i64),
            row_count: clamp_to_i64(rows),
            column_count: clamp_to_i64(columns),
            error: None,
        }
    }

    /// Rows and columns are pinned to -1; the byte size survives if known.
    #[must_use]
    pub fn unreadable(status_code: u16, byte_size: Option<u64>, error: impl Into<String>) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            "unreadable result payload".to_string()
        } else {
            error
        };
        Self {
            status_code,
            byte_size: byte_size.map_or(-1, clamp_to_i64),
            row_count: -1,
            column_count: -1,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    #[must_use]
    pub fn byte_size(&self) -> i64 {
        self.byte_size
    }

    #[must_use]
    pub fn row_count(&self) -> i64 {
        self.row_count
    }

    #[must_use]
    pub fn column_count(&self) -> i64 {
        self.column_count
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn cells(&self) -> Vec<(String, String)> {
        let mut cells = vec![
            ("status".to_string(), self.status_code.to_string()),
            ("size".to_string(), self.byte_size.to_string()),
            ("num_rows".to_string(), self.row_count.to_string()),
            ("num_columns".to_string(), self.column_count.to_string()),
        ];
        if let Some(error) = &self.error {
            cells.push(("error".to_string(), error.clone()));
        }
        cells
    }
}

fn clamp_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Everything recorded about one query, in execution order.
#[derive(Debug, Clone)]
pub struct QueryStats {
    name: String,
    base_name: String,
    query_type: String,
    access_url: String,
    params: QueryParams,
    intervals: Vec<Interval>,
    result_meta: Option<ResultMetadata>,
    overall_start: Option<OffsetDateTime>,
    overall_end: Option<OffsetDateTime>,
}

impl QueryStats {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        base_name: impl Into<String>,
        query_type: impl Into<String>,
        access_url: impl Into<String>,
        params: QueryParams,
    ) -> Self {
        Self {
            name: name.into(),
            base_name: base_name.into(),
            query_type: query_type.into(),
            access_url: access_url.into(),
            params,
            intervals: Vec::new(),
            result_meta: None,
            overall_start: None,
            overall_end: None,
        }
    }

    /// Appends a phase. An interval still open is closed first.
    /// `overall_start` is the first interval's start and `overall_end` the
    /// latest end seen. For phases run one after another that is the end of
    /// the interval added last; an interval ending earlier never pulls it back.
    pub fn add_interval(&mut self, mut interval: Interval) {
        interval.close();
        if self.overall_start.is_none() {
            self.overall_start = Some(interval.started_at());
        }
        let ended_at = interval.ended_at();
        self.overall_end = Some(match self.overall_end {
            Some(previous) if previous > ended_at => previous,
            _ => ended_at,
        });
        self.intervals.push(interval);
    }

    pub fn set_result_meta(&mut self, result_meta: ResultMetadata) {
        self.result_meta = Some(result_meta);
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    #[must_use]
    pub fn query_type(&self) -> &str {
        &self.query_type
    }

    #[must_use]
    pub fn access_url(&self) -> &str {
        &self.access_url
    }

    #[must_use]
    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    #[must_use]
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    #[must_use]
    pub fn result_meta(&self) -> Option<&ResultMetadata> {
        self.result_meta.as_ref()
    }

    #[must_use]
    pub fn overall_start(&self) -> Option<OffsetDateTime> {
        self.overall_start
    }

    #[must_use]
    pub fn overall_end(&self) -> Option<OffsetDateTime> {
        self.overall_end
    }

    #[must_use]
    pub fn total_duration(&self) -> Duration {
        match (self.overall_start, self.overall_end) {
            (Some(start), Some(end)) => (end - start).try_into().unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }

    /// Column name and rendered value pairs, in report order.
    #[must_use]
    pub fn cells(&self) -> Vec<(String, String)> {
        let mut cells = vec![
            ("name".to_string(), self.name.clone()),
            (
                "start_time".to_string(),
                self.overall_start.map(format_utc).unwrap_or_default(),
            ),
            (
                "end_time".to_string(),
                self.overall_end.map(format_utc).unwrap_or_default(),
            ),
        ];
        for (index, interval) in self.intervals.iter().enumerate() {
            cells.push((format!("int{index}_desc"), interval.label().to_string()));
            cells.push((
                format!("int{index}_duration"),
                interval.duration().as_secs_f64().to_string(),
            ));
        }
        cells.push(("base_name".to_string(), self.base_name.clone()));
        cells.push(("query_type".to_string(), self.query_type.clone()));
        for (key, value) in self.params.iter() {
            cells.push((key.to_string(), value.to_string()));
        }
        cells.push(("access_url".to_string(), self.access_url.clone()));
        if let Some(result_meta) = &self.result_meta {
            cells.extend(result_meta.cells());
        }
        cells
    }

    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        self.cells().into_iter().map(|(column, _)| column).collect()
    }

    #[must_use]
    pub fn header_string(&self) -> String {
        let mut line = self
            .columns()
            .iter()
            .map(|column| crate::report::escape_csv_cell(column))
            .collect::<Vec<_>>()
            .join(",");
        line.push('\n');
        line
    }

    #[must_use]
    pub fn values_string(&self) -> String {
        let mut line = self
            .cells()
            .iter()
            .map(|(_, value)| crate::report::escape_csv_cell(value))
            .collect::<Vec<_>>()
            .join(",");
        line.push('\n');
        line
    }

    #[must_use]
    pub fn to_record(&self) -> QueryStatsRecord {
        QueryStatsRecord {
            schema_version: STATS_SCHEMA_VERSION.to_string(),
            name: self.name.clone(),
            base_name: self.base_name.clone(),
            query_type: self.query_type.clone(),
            access_url: self.access_url.clone(),
            params: self
                .params
                .iter()
                .map(|(name, value)| QueryParamRecord {
                    name: name.to_string(),
                    value: value.clone(),
                })
                .collect(),
            start_time_utc: self.overall_start.map(format_utc),
            end_time_utc: self.overall_end.map(format_utc),
            start_time_unix: self.overall_start.map(unix_seconds),
            end_time_unix: self.overall_end.map(unix_seconds),
            intervals: self
                .intervals
                .iter()
                .map(|interval| IntervalRecord {
                    label: interval.label().to_string(),
                    start_time_utc: format_utc(interval.started_at()),
                    end_time_utc: format_utc(interval.ended_at()),
                    duration_secs: interval.duration().as_secs_f64(),
                })
                .collect(),
            result_meta: self.result_meta.as_ref().map(|meta| ResultMetadataRecord {
                status: meta.status_code(),
                size: meta.byte_size(),
                num_rows: meta.row_count(),
                num_columns: meta.column_count(),
                error: meta.error().map(ToString::to_string),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryParamRecord {
    pub name: String,
    pub value: ParamValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IntervalRecord {
    pub label: String,
    pub start_time_utc: String,
    pub end_time_utc: String,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResultMetadataRecord {
    pub status: u16,
    pub size: i64,
    pub num_rows: i64,
    pub num_columns: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Serialized form of [`QueryStats`] for the JSON lines artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryStatsRecord {
    pub schema_version: String,
    pub name: String,
    pub base_name: String,
    pub query_type: String,
    pub access_url: String,
    pub params: Vec<QueryParamRecord>,
    pub start_time_utc: Option<String>,
    pub end_time_utc: Option<String>,
    pub start_time_unix: Option<f64>,
    pub end_time_unix: Option<f64>,
    pub intervals: Vec<IntervalRecord>,
    pub result_meta: Option<ResultMetadataRecord>,
}

#[must_use]
pub fn json_schema() -> Value {
    let schema = schemars::schema_for!(QueryStatsRecord);
    match serde_json::to_value(schema) {
        Ok(value) => value,
        Err(error) => {
            panic!("failed to serialize generated query stats schema: {error}");
        }
    }
}
