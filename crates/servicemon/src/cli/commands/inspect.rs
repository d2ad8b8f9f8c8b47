use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::Serialize;

use crate::votable::{TableReader, VoTableReader};

/// Reads back a saved payload the same way a query run does.
#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    #[arg(value_name = "PATH")]
    pub target: PathBuf,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectReport {
    pub target_path: String,
    pub file_size_bytes: u64,
    pub num_rows: i64,
    pub num_columns: i64,
    pub error: Option<String>,
}

pub fn inspect_target(path: &Path, reader: &dyn TableReader) -> Result<InspectReport> {
    if !path.exists() {
        bail!("inspect target does not exist: {}", path.display());
    }
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("failed to stat file: {}", path.display()))?;
    if !metadata.is_file() {
        bail!("inspect target must be a file: {}", path.display());
    }

    let mut report = InspectReport {
        target_path: path.to_string_lossy().to_string(),
        file_size_bytes: metadata.len(),
        num_rows: -1,
        num_columns: -1,
        error: None,
    };
    match reader.read_shape(path) {
        Ok(shape) => {
            report.num_rows = i64::try_from(shape.rows).unwrap_or(i64::MAX);
            report.num_columns = i64::try_from(shape.columns).unwrap_or(i64::MAX);
        }
        Err(error) => report.error = Some(error.message),
    }
    Ok(report)
}

#[must_use]
pub fn render_text_report(report: &InspectReport) -> String {
    let mut lines = vec![
        format!("target_path: {}", report.target_path),
        format!("file_size_bytes: {}", report.file_size_bytes),
        format!("num_rows: {}", report.num_rows),
        format!("num_columns: {}", report.num_columns),
    ];
    if let Some(error) = &report.error {
        lines.push(format!("error: {error}"));
    }
    lines.join("\n")
}

pub fn run(args: &InspectArgs) -> Result<()> {
    let report = inspect_target(&args.target, &VoTableReader)?;
    if args.json {
        let encoded =
            serde_json::to_string_pretty(&report).context("failed to encode inspect report")?;
        println!("{encoded}");
    } else {
        println!("{}", render_text_report(&report));
    }
    Ok(())
}
