use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::error::QueryError;
use crate::identity::{self, QueryIdentity};
use crate::models::{
    INTERVAL_DO_QUERY, INTERVAL_GATHER_METADATA, INTERVAL_STREAM_TO_FILE, Interval, QueryStats,
    ResultMetadata,
};
use crate::resolve::{
    CoordinateResolver, PositionDescriptor, ServiceTarget, SkyPosition, resolve_access_url,
    resolve_position,
};
use crate::transport::{Transport, TransportConfig, TransportResponse, fetch_with_retry};
use crate::votable::TableReader;

pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Collaborators shared by every query of a run.
pub struct ExecutionContext<'a> {
    pub transport: &'a dyn Transport,
    pub transport_config: TransportConfig,
    pub resolver: &'a dyn CoordinateResolver,
    pub reader: &'a dyn TableReader,
    pub out_dir: PathBuf,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub service: ServiceTarget,
    pub position: PositionDescriptor,
    pub radius_deg: f64,
}

impl QueryRequest {
    /// Human-readable label used before an identity exists.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "{}_{} position={} radius={}",
            self.service.base_name, self.service.query_type, self.position, self.radius_deg
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Created,
    Fetching,
    Streaming,
    Inspecting,
    Finalized,
    Failed,
}

impl QueryState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Fetching => "fetching",
            Self::Streaming => "streaming",
            Self::Inspecting => "inspecting",
            Self::Finalized => "finalized",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    pub access_url: String,
    pub position: SkyPosition,
    pub identity: QueryIdentity,
    pub payload_path: PathBuf,
}

/// A query that stopped before its stats were complete. `partial_stats`
/// keeps whatever phases had already been timed.
#[derive(Debug, Error)]
#[error("query {label} failed: {error}")]
pub struct QueryFailure {
    pub label: String,
    #[source]
    pub error: QueryError,
    pub partial_stats: Option<QueryStats>,
}

/// Closes its interval and appends it to the stats when dropped, so every
/// exit path out of a phase is recorded.
struct PhaseTimer<'s> {
    stats: &'s mut QueryStats,
    interval: Option<Interval>,
}

impl<'s> PhaseTimer<'s> {
    fn start(stats: &'s mut QueryStats, label: &str) -> Self {
        Self {
            stats,
            interval: Some(Interval::open(label)),
        }
    }
}

impl Drop for PhaseTimer<'_> {
    fn drop(&mut self) {
        if let Some(mut interval) = self.interval.take() {
            interval.close();
            self.stats.add_interval(interval);
        }
    }
}

pub struct QueryExecutor<'a> {
    context: &'a ExecutionContext<'a>,
    request: QueryRequest,
    state: QueryState,
    resolved: Option<ResolvedQuery>,
    stats: Option<QueryStats>,
    status_code: Option<u16>,
}

impl<'a> QueryExecutor<'a> {
    #[must_use]
    pub fn new(context: &'a ExecutionContext<'a>, request: QueryRequest) -> Self {
        Self {
            context,
            request,
            state: QueryState::Created,
            resolved: None,
            stats: None,
            status_code: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> QueryState {
        self.state
    }

    #[must_use]
    pub fn resolved(&self) -> Option<&ResolvedQuery> {
        self.resolved.as_ref()
    }

    #[must_use]
    pub fn stats(&self) -> Option<&QueryStats> {
        self.stats.as_ref()
    }

    /// Normalizes the service and position, computes the identity and
    /// creates the stats record.
    pub fn resolve(&mut self) -> Result<&ResolvedQuery, QueryError> {
        self.expect_state(QueryState::Created, "resolve")?;
        let outcome = self.resolve_inner();
        let resolved = self.track(outcome)?;

        let stats = QueryStats::new(
            resolved.identity.name.clone(),
            self.request.service.base_name.clone(),
            self.request.service.query_type.clone(),
            resolved.access_url.clone(),
            resolved.identity.params.clone(),
        );
        self.stats = Some(stats);
        Ok(self.resolved.insert(resolved))
    }

    fn resolve_inner(&self) -> Result<ResolvedQuery, QueryError> {
        let access_url = resolve_access_url(&self.request.service.descriptor)?;
        let position = resolve_position(&self.request.position, self.context.resolver)?;
        let identity = identity::compute(
            &self.request.service.base_name,
            &self.request.service.query_type,
            position.ra_deg,
            position.dec_deg,
            self.request.radius_deg,
        )?;
        let payload_path = self.context.out_dir.join(format!(
            "{}.{}",
            identity.name,
            self.context.reader.extension()
        ));
        Ok(ResolvedQuery {
            access_url,
            position,
            identity,
            payload_path,
        })
    }

    /// Issues the GET. The `do_query` interval ends once headers arrive.
    pub fn fetch(&mut self) -> Result<TransportResponse, QueryError> {
        self.expect_state(QueryState::Created, "fetch")?;
        self.state = QueryState::Fetching;
        let outcome = match (self.resolved.as_ref(), self.stats.as_mut()) {
            (Some(resolved), Some(stats)) => {
                let _timer = PhaseTimer::start(stats, INTERVAL_DO_QUERY);
                fetch_with_retry(
                    self.context.transport,
                    &self.context.transport_config,
                    &resolved.access_url,
                    &resolved.identity.params,
                )
            }
            _ => Err(QueryError::configuration("fetch called before resolve")),
        };
        let (response, _attempts) = self.track(outcome)?;
        self.status_code = Some(response.status);
        Ok(response)
    }

    /// Copies the body to the payload file chunk by chunk. Read and write
    /// failures are both storage errors; a partial file is left on disk.
    pub fn stream(&mut self, response: TransportResponse) -> Result<u64, QueryError> {
        self.expect_state(QueryState::Fetching, "stream")?;
        self.state = QueryState::Streaming;
        let chunk_size = self.context.chunk_size.max(1);
        let outcome = match (self.resolved.as_ref(), self.stats.as_mut()) {
            (Some(resolved), Some(stats)) => {
                let _timer = PhaseTimer::start(stats, INTERVAL_STREAM_TO_FILE);
                copy_in_chunks(response.body, &resolved.payload_path, chunk_size)
            }
            _ => Err(QueryError::configuration("stream called before resolve")),
        };
        self.track(outcome)
    }

    /// Reads the payload back. Never fails: an unreadable payload becomes
    /// `ResultMetadata::error`.
    pub fn inspect(&mut self) -> Result<ResultMetadata, QueryError> {
        self.expect_state(QueryState::Streaming, "inspect")?;
        self.state = QueryState::Inspecting;
        let status_code = self.status_code.unwrap_or_default();
        let outcome = match (self.resolved.as_ref(), self.stats.as_mut()) {
            (Some(resolved), Some(stats)) => {
                let timer = PhaseTimer::start(&mut *stats, INTERVAL_GATHER_METADATA);
                let meta =
                    gather_metadata(self.context.reader, &resolved.payload_path, status_code);
                drop(timer);

                if let Some(error) = meta.error() {
                    eprintln!(
                        "inspect: readback_failed name={} path={} error={}",
                        resolved.identity.name,
                        resolved.payload_path.display(),
                        error
                    );
                }
                stats.set_result_meta(meta.clone());
                Ok(meta)
            }
            _ => Err(QueryError::configuration("inspect called before resolve")),
        };
        self.track(outcome)
    }

    /// `resolve → fetch → stream → inspect`. Intervals recorded before a
    /// failure travel with the error.
    /// A query already resolved by the caller picks up at `fetch`.
    pub fn run(mut self) -> Result<QueryStats, QueryFailure> {
        match self.run_phases() {
            Ok(()) => match self.stats.take() {
                Some(stats) => {
                    self.state = QueryState::Finalized;
                    Ok(stats)
                }
                None => Err(self.into_failure(QueryError::configuration(
                    "query finished without a stats record",
                ))),
            },
            Err(error) => Err(self.into_failure(error)),
        }
    }

    /// Abandons the query, keeping whatever intervals were recorded.
    pub fn into_failure(mut self, error: QueryError) -> QueryFailure {
        self.state = QueryState::Failed;
        let label = self
            .resolved
            .as_ref()
            .map(|resolved| resolved.identity.name.clone())
            .unwrap_or_else(|| self.request.describe());
        QueryFailure {
            label,
            error,
            partial_stats: self.stats.take(),
        }
    }

    fn run_phases(&mut self) -> Result<(), QueryError> {
        if self.resolved.is_none() {
            self.resolve()?;
        }
        let response = self.fetch()?;
        self.stream(response)?;
        self.inspect()?;
        Ok(())
    }

    fn expect_state(&mut self, expected: QueryState, phase: &str) -> Result<(), QueryError> {
        if self.state == expected {
            return Ok(());
        }
        let error = QueryError::configuration(format!(
            "cannot {phase} a query in state {}",
            self.state.as_str()
        ));
        self.state = QueryState::Failed;
        Err(error)
    }

    fn track<T>(&mut self, outcome: Result<T, QueryError>) -> Result<T, QueryError> {
        if outcome.is_err() {
            self.state = QueryState::Failed;
        }
        outcome
    }
}

fn copy_in_chunks(
    mut body: Box<dyn Read + Send>,
    path: &Path,
    chunk_size: usize,
) -> Result<u64, QueryError> {
    let storage_error = |source: std::io::Error| QueryError::Storage {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(storage_error)?;
    }
    let mut file = File::create(path).map_err(storage_error)?;
    let mut buffer = vec![0_u8; chunk_size];
    let mut written = 0_u64;

    loop {
        let read = match body.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => {
                let source = std::io::Error::new(
                    error.kind(),
                    format!("response body failed after {written} byte(s): {error}"),
                );
                return Err(storage_error(source));
            }
        };
        file.write_all(&buffer[..read]).map_err(storage_error)?;
        written += read as u64;
    }
    file.flush().map_err(storage_error)?;
    Ok(written)
}

fn gather_metadata(reader: &dyn TableReader, path: &Path, status_code: u16) -> ResultMetadata {
    let byte_size = std::fs::metadata(path).ok().map(|metadata| metadata.len());
    match reader.read_shape(path) {
        Ok(shape) => ResultMetadata::readable(status_code, byte_size, shape.rows, shape.columns),
        Err(error) => ResultMetadata::unreadable(status_code, byte_size, error.message),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use super::{ExecutionContext, QueryExecutor, QueryRequest, QueryState};
    use crate::models::QueryParams;
    use crate::resolve::{DefaultCoordinateResolver, PositionDescriptor, ServiceTarget};
    use crate::transport::{AttemptError, Transport, TransportConfig, TransportResponse};
    use crate::votable::VoTableReader;

    struct FixedBody(&'static str);

    impl Transport for FixedBody {
        fn get(&self, url: &str, _params: &QueryParams) -> Result<TransportResponse, AttemptError> {
            Ok(TransportResponse {
                status: 200,
                final_url: url.to_string(),
                body: Box::new(Cursor::new(self.0.as_bytes().to_vec())),
            })
        }
    }

    struct Unreachable;

    impl Transport for Unreachable {
        fn get(&self, _url: &str, _params: &QueryParams) -> Result<TransportResponse, AttemptError> {
            Err(AttemptError::Transient("connection refused".to_string()))
        }
    }

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("{prefix}-{nanos}"))
    }

    fn context<'a>(transport: &'a dyn Transport, out_dir: PathBuf) -> ExecutionContext<'a> {
        ExecutionContext {
            transport,
            transport_config: TransportConfig {
                timeout: Duration::from_secs(1),
                max_attempts: 2,
                initial_backoff: Duration::ZERO,
            },
            resolver: &DefaultCoordinateResolver,
            reader: &VoTableReader,
            out_dir,
            chunk_size: 16,
        }
    }

    fn request(radius_deg: f64) -> QueryRequest {
        QueryRequest {
            service: ServiceTarget::from_url("CSC", "cone", "http://example.invalid/cone?"),
            position: PositionDescriptor::Pair(125.886, 21.3377),
            radius_deg,
        }
    }

    #[test]
    fn phases_advance_state_and_record_intervals() {
        let transport = FixedBody("<VOTABLE><RESOURCE><TABLE><FIELD name=\"a\"/></TABLE></RESOURCE></VOTABLE>");
        let ctx = context(&transport, unique_temp_dir("servicemon-exec-phases"));
        let mut executor = QueryExecutor::new(&ctx, request(0.1));

        executor.resolve().expect("resolve succeeds");
        let response = executor.fetch().expect("fetch succeeds");
        assert_eq!(executor.state(), QueryState::Fetching);
        let written = executor.stream(response).expect("stream succeeds");
        assert!(written > 16, "body should span several chunks");
        let meta = executor.inspect().expect("inspect never fails");
        assert_eq!((meta.row_count(), meta.column_count()), (0, 1));

        let labels = executor
            .stats()
            .expect("stats exist")
            .intervals()
            .iter()
            .map(|interval| interval.label().to_string())
            .collect::<Vec<_>>();
        assert_eq!(labels, ["do_query", "stream_to_file", "gather_metadata"]);
    }

    #[test]
    fn phases_out_of_order_fail() {
        let transport = FixedBody("");
        let ctx = context(&transport, unique_temp_dir("servicemon-exec-order"));
        let mut executor = QueryExecutor::new(&ctx, request(0.1));
        let err = executor.fetch().expect_err("fetch before resolve");
        assert_eq!(err.kind(), "configuration");
        assert_eq!(executor.state(), QueryState::Failed);
    }

    #[test]
    fn transport_failure_keeps_the_fetch_interval() {
        let ctx = context(&Unreachable, unique_temp_dir("servicemon-exec-unreachable"));
        let failure = QueryExecutor::new(&ctx, request(0.1))
            .run()
            .expect_err("unreachable service fails");

        assert_eq!(failure.error.kind(), "transport");
        assert_eq!(failure.label, "CSC_cone_125.886_21.3377_0.1");
        let partial = failure.partial_stats.expect("stats were created");
        assert_eq!(partial.intervals().len(), 1);
        assert_eq!(partial.intervals()[0].label(), "do_query");
        assert!(partial.intervals()[0].is_closed());
        assert!(partial.result_meta().is_none());
    }

    #[test]
    fn invalid_radius_fails_before_any_phase() {
        let transport = FixedBody("");
        let ctx = context(&transport, unique_temp_dir("servicemon-exec-radius"));
        let failure = QueryExecutor::new(&ctx, request(0.0))
            .run()
            .expect_err("zero radius fails");
        assert_eq!(failure.error.kind(), "validation");
        assert!(failure.partial_stats.is_none());
        assert!(failure.label.contains("radius=0"), "label: {}", failure.label);
    }
}
