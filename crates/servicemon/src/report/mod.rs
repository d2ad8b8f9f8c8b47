use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::QueryStats;

pub const NO_STATS_SENTINEL: &str = "No stats collected.";
pub const STATS_SCHEMA_FILE_NAME: &str = "query-stats.v1.schema.json";

/// A query that never produced a stats row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub label: String,
    pub kind: String,
    pub message: String,
    pub intervals_recorded: usize,
}

/// Completed queries in completion order, plus the ones that failed.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub run_id: String,
    pub stats: Vec<QueryStats>,
    pub failures: Vec<FailureRecord>,
    /// Combinations never started because the batch was cancelled.
    pub skipped: usize,
}

impl Report {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Union of every record's columns, in first-seen order.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for stats in &self.stats {
            for column in stats.columns() {
                if !columns.contains(&column) {
                    columns.push(column);
                }
            }
        }
        columns
    }

    #[must_use]
    pub fn render_csv(&self) -> String {
        if self.stats.is_empty() {
            return format!("{NO_STATS_SENTINEL}\n");
        }

        let columns = self.columns();
        let mut rendered = join_csv_line(columns.iter().map(String::as_str));
        for stats in &self.stats {
            let cells = stats.cells();
            let row = columns.iter().map(|column| {
                cells
                    .iter()
                    .find(|(name, _)| name == column)
                    .map_or("", |(_, value)| value.as_str())
            });
            rendered.push_str(&join_csv_line(row));
        }
        rendered
    }
}

fn join_csv_line<'a>(cells: impl Iterator<Item = &'a str>) -> String {
    let mut line = cells.map(escape_csv_cell).collect::<Vec<_>>().join(",");
    line.push('\n');
    line
}

/// Quotes a cell only when it would otherwise break the row.
#[must_use]
pub fn escape_csv_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn write_csv_report(path: &Path, report: &Report) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("failed to create stats report directory")?;
    }
    std::fs::write(path, report.render_csv())
        .with_context(|| format!("failed to write stats report: {}", path.display()))
}

pub fn write_stats_jsonl(path: &Path, report: &Report) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("failed to create stats jsonl directory")?;
    }

    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create stats jsonl: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for stats in &report.stats {
        serde_json::to_writer(&mut writer, &stats.to_record())
            .context("failed to encode stats jsonl row")?;
        writer
            .write_all(b"\n")
            .context("failed to write stats newline")?;
    }
    writer
        .flush()
        .context("failed to flush stats jsonl writer")?;

    let schema_path = path
        .parent()
        .map_or_else(|| PathBuf::from(STATS_SCHEMA_FILE_NAME), |parent| {
            parent.join(STATS_SCHEMA_FILE_NAME)
        });
    let encoded = serde_json::to_vec_pretty(&crate::models::json_schema())
        .context("failed to encode stats schema json")?;
    std::fs::write(&schema_path, encoded).context("failed to write stats schema artifact")?;
    Ok(schema_path)
}
