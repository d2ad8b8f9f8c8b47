use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;

use crate::batch::BatchRunner;
use crate::config::{
    BatchConfig, DEFAULT_QUERY_TYPE, RuntimeEnv, ServiceEntry, ensure_writable_dir,
    load_batch_config, resolve_user_path,
};
use crate::report::{Report, write_csv_report, write_stats_jsonl};
use crate::resolve::{DefaultCoordinateResolver, PositionDescriptor};
use crate::sqlite::write_report_to_sqlite;
use crate::transport::HttpTransport;
use crate::votable::VoTableReader;

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// JSON batch file; the built-in batch runs when omitted.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Adds a service as `NAME=URL`. Replaces the configured services.
    #[arg(long = "service", value_name = "NAME=URL")]
    pub services: Vec<String>,

    /// Replaces the configured positions.
    #[arg(long = "position", value_name = "POSITION")]
    pub positions: Vec<String>,

    /// Replaces the configured radii, in degrees.
    #[arg(long = "radius", value_name = "DEG")]
    pub radii: Vec<f64>,

    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    #[arg(long, value_name = "MS")]
    pub backoff_ms: Option<u64>,

    /// Writes the CSV report here instead of stdout.
    #[arg(long, value_name = "PATH")]
    pub stats_out: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    pub stats_jsonl: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    pub sqlite: Option<PathBuf>,
}

pub fn run(args: &RunArgs, env: &RuntimeEnv) -> Result<()> {
    let config = build_config(args, env)?;
    let runtime_paths = env.resolve_paths(config.out_dir.as_deref())?;
    ensure_writable_dir(&runtime_paths.out_dir)?;

    let transport_config = config.transport_config();
    let transport = HttpTransport::new(&transport_config)?;
    let resolver = DefaultCoordinateResolver;
    let reader = VoTableReader;

    let report = BatchRunner::new(&transport, &resolver, &reader)
        .with_transport_config(transport_config)
        .with_chunk_size(config.chunk_size)
        .with_concurrency(config.concurrency)
        .run(
            &config.service_targets(),
            &config.positions,
            &config.radii,
            &runtime_paths.out_dir,
        );

    emit_report(args, env, &report)
}

fn build_config(args: &RunArgs, env: &RuntimeEnv) -> Result<BatchConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let path = resolve_user_path(path, env.home_dir.as_deref(), &env.cwd)?;
            let mut config = load_batch_config(&path)?;
            // Relative out_dir in a config file is relative to the file.
            if let (Some(out_dir), Some(parent)) = (config.out_dir.as_ref(), path.parent()) {
                config.out_dir = Some(resolve_user_path(out_dir, env.home_dir.as_deref(), parent)?);
            }
            config
        }
        None => BatchConfig::default(),
    };

    if !args.services.is_empty() {
        config.services = args
            .services
            .iter()
            .map(|raw| parse_service_flag(raw))
            .collect::<Result<_>>()?;
    }
    if !args.positions.is_empty() {
        config.positions = args
            .positions
            .iter()
            .map(|raw| PositionDescriptor::Text(raw.clone()))
            .collect();
    }
    if !args.radii.is_empty() {
        config.radii.clone_from(&args.radii);
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(timeout_secs) = args.timeout_secs {
        config.timeout_secs = timeout_secs;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(backoff_ms) = args.backoff_ms {
        config.backoff_ms = backoff_ms;
    }

    config.validate()?;
    Ok(config)
}

fn parse_service_flag(raw: &str) -> Result<ServiceEntry> {
    let Some((base_name, access_url)) = raw.split_once('=') else {
        bail!("--service expects NAME=URL, got `{raw}`");
    };
    if base_name.trim().is_empty() || access_url.trim().is_empty() {
        bail!("--service expects NAME=URL, got `{raw}`");
    }
    Ok(ServiceEntry {
        base_name: base_name.trim().to_string(),
        query_type: DEFAULT_QUERY_TYPE.to_string(),
        access_url: Some(access_url.trim().to_string()),
        title: None,
    })
}

fn emit_report(args: &RunArgs, env: &RuntimeEnv, report: &Report) -> Result<()> {
    match &args.stats_out {
        Some(path) => {
            let path = resolve_output_path(path, env)?;
            write_csv_report(&path, report)?;
            eprintln!("run: stats_csv={}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(report.render_csv().as_bytes())
                .context("failed to write stats report to stdout")?;
            stdout.flush().context("failed to flush stdout")?;
        }
    }

    if let Some(path) = &args.stats_jsonl {
        let path = resolve_output_path(path, env)?;
        let schema_path = write_stats_jsonl(&path, report)?;
        eprintln!(
            "run: stats_jsonl={} schema={}",
            path.display(),
            schema_path.display()
        );
    }

    if let Some(path) = &args.sqlite {
        let path = resolve_output_path(path, env)?;
        let written = write_report_to_sqlite(&path, report)?;
        eprintln!(
            "run: sqlite={} stats={} intervals={} failures={}",
            path.display(),
            written.stats_written,
            written.intervals_written,
            written.failures_written
        );
    }

    Ok(())
}

fn resolve_output_path(path: &Path, env: &RuntimeEnv) -> Result<PathBuf> {
    resolve_user_path(path, env.home_dir.as_deref(), &env.cwd)
}
