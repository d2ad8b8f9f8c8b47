use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::QueryError;
use crate::executor::{
    DEFAULT_CHUNK_SIZE, ExecutionContext, QueryExecutor, QueryFailure, QueryRequest,
};
use crate::models::QueryStats;
use crate::report::{FailureRecord, Report};
use crate::resolve::{CoordinateResolver, PositionDescriptor, ServiceTarget};
use crate::transport::{Transport, TransportConfig};
use crate::utils::time::build_run_id;
use crate::votable::TableReader;

pub const DEFAULT_CONCURRENCY: usize = 1;

/// `services × positions × radii`, services outermost.
#[must_use]
pub fn plan_combinations(
    services: &[ServiceTarget],
    positions: &[PositionDescriptor],
    radii: &[f64],
) -> Vec<QueryRequest> {
    let mut requests = Vec::with_capacity(services.len() * positions.len() * radii.len());
    for service in services {
        for position in positions {
            for radius_deg in radii {
                requests.push(QueryRequest {
                    service: service.clone(),
                    position: position.clone(),
                    radius_deg: *radius_deg,
                });
            }
        }
    }
    requests
}

pub struct BatchRunner<'a> {
    transport: &'a dyn Transport,
    resolver: &'a dyn CoordinateResolver,
    reader: &'a dyn TableReader,
    transport_config: TransportConfig,
    chunk_size: usize,
    concurrency: usize,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> BatchRunner<'a> {
    #[must_use]
    pub fn new(
        transport: &'a dyn Transport,
        resolver: &'a dyn CoordinateResolver,
        reader: &'a dyn TableReader,
    ) -> Self {
        Self {
            transport,
            resolver,
            reader,
            transport_config: TransportConfig::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_transport_config(mut self, transport_config: TransportConfig) -> Self {
        self.transport_config = transport_config;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Upper bound on queries in flight at once.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Once the flag is set no new query starts; running ones finish.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn run(
        &self,
        services: &[ServiceTarget],
        positions: &[PositionDescriptor],
        radii: &[f64],
        out_dir: &Path,
    ) -> Report {
        let requests = plan_combinations(services, positions, radii);
        let context = ExecutionContext {
            transport: self.transport,
            transport_config: self.transport_config,
            resolver: self.resolver,
            reader: self.reader,
            out_dir: out_dir.to_path_buf(),
            chunk_size: self.chunk_size,
        };
        let workers = self.concurrency.clamp(1, requests.len().max(1));
        let run_id = build_run_id("batch");
        eprintln!(
            "run: start run_id={} combinations={} workers={} out_dir={}",
            run_id,
            requests.len(),
            workers,
            out_dir.display()
        );

        let cursor = AtomicUsize::new(0);
        let started = AtomicUsize::new(0);
        let claimed = Mutex::new(HashSet::new());
        let collector = Mutex::new(Report {
            run_id,
            ..Report::default()
        });

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        if self.is_cancelled() {
                            break;
                        }
                        let index = cursor.fetch_add(1, Ordering::SeqCst);
                        let Some(request) = requests.get(index) else {
                            break;
                        };
                        started.fetch_add(1, Ordering::SeqCst);

                        let outcome = run_claimed(&context, request, &claimed);
                        let mut report = collector.lock().unwrap_or_else(PoisonError::into_inner);
                        match outcome {
                            Ok(stats) => {
                                log_completion(&stats);
                                report.stats.push(stats);
                            }
                            Err(failure) => {
                                let record = failure_record(&failure);
                                eprintln!(
                                    "run: query_failed name={} kind={} intervals_recorded={} message={}",
                                    record.label,
                                    record.kind,
                                    record.intervals_recorded,
                                    record.message
                                );
                                report.failures.push(record);
                            }
                        }
                    }
                });
            }
        });

        let mut report = collector
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        report.skipped = requests
            .len()
            .saturating_sub(started.load(Ordering::SeqCst));
        eprintln!(
            "run: complete run_id={} succeeded={} failed={} skipped={}",
            report.run_id,
            report.stats.len(),
            report.failures.len(),
            report.skipped
        );
        report
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .is_some_and(|cancel| cancel.load(Ordering::SeqCst))
    }
}

/// Resolves first so two combinations that land on the same identity never
/// write the same payload file. The later one fails without fetching.
fn run_claimed(
    context: &ExecutionContext<'_>,
    request: &QueryRequest,
    claimed: &Mutex<HashSet<String>>,
) -> Result<QueryStats, QueryFailure> {
    let mut executor = QueryExecutor::new(context, request.clone());
    let name = match executor.resolve() {
        Ok(resolved) => resolved.identity.name.clone(),
        Err(error) => return Err(executor.into_failure(error)),
    };
    let fresh = claimed
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.clone());
    if !fresh {
        return Err(executor.into_failure(QueryError::configuration(format!(
            "duplicate query identity {name} in this batch"
        ))));
    }
    executor.run()
}

fn failure_record(failure: &QueryFailure) -> FailureRecord {
    FailureRecord {
        label: failure.label.clone(),
        kind: failure.error.kind().to_string(),
        message: failure.error.to_string(),
        intervals_recorded: failure
            .partial_stats
            .as_ref()
            .map_or(0, |stats| stats.intervals().len()),
    }
}

fn log_completion(stats: &QueryStats) {
    let (status, rows, columns) = stats.result_meta().map_or((0, -1, -1), |meta| {
        (meta.status_code(), meta.row_count(), meta.column_count())
    });
    eprintln!(
        "run: query_complete name={} status={} rows={} columns={} total_secs={:.3}",
        stats.name(),
        status,
        rows,
        columns,
        stats.total_duration().as_secs_f64()
    );
}
