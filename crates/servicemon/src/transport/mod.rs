use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;

use crate::error::QueryError;
use crate::models::QueryParams;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_BACKOFF_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Per attempt.
    pub timeout: Duration,
    /// Total tries, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each further failure.
    pub initial_backoff: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(16);
        self.initial_backoff.saturating_mul(1_u32 << exponent)
    }
}

/// Response headers have arrived; the body has not been read yet.
pub struct TransportResponse {
    pub status: u16,
    pub final_url: String,
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("final_url", &self.final_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// Worth retrying: timeouts, refused or reset connections.
    Transient(String),
    /// Retrying cannot help: malformed URL, unsupported scheme.
    Permanent(String),
}

impl AttemptError {
    fn message(&self) -> &str {
        match self {
            Self::Transient(message) | Self::Permanent(message) => message,
        }
    }
}

/// One GET. HTTP error statuses are responses, not errors.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, params: &QueryParams) -> Result<TransportResponse, AttemptError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .user_agent(concat!("servicemon/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| anyhow::anyhow!("failed to build HTTP client: {error}"))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, params: &QueryParams) -> Result<TransportResponse, AttemptError> {
        let response = self
            .client
            .get(url)
            .query(&params.to_query_pairs())
            .send()
            .map_err(classify_reqwest_error)?;

        Ok(TransportResponse {
            status: response.status().as_u16(),
            final_url: response.url().to_string(),
            body: Box::new(response),
        })
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> AttemptError {
    let message = format!("{error:#}");
    if error.is_builder() || error.is_redirect() {
        AttemptError::Permanent(message)
    } else {
        AttemptError::Transient(message)
    }
}

/// Runs `transport.get` until it succeeds, fails permanently, or the
/// attempt budget is spent. Returns the response and the attempts used.
pub fn fetch_with_retry(
    transport: &dyn Transport,
    config: &TransportConfig,
    url: &str,
    params: &QueryParams,
) -> Result<(TransportResponse, u32), QueryError> {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let backoff = config.backoff_before(attempt);
        if !backoff.is_zero() {
            std::thread::sleep(backoff);
        }

        match transport.get(url, params) {
            Ok(response) => return Ok((response, attempt)),
            Err(AttemptError::Transient(message)) if attempt < max_attempts => {
                eprintln!(
                    "fetch: retry url={url} attempt={attempt} max_attempts={max_attempts} reason={message}"
                );
            }
            Err(error) => {
                return Err(QueryError::Transport {
                    message: error.message().to_string(),
                    attempts: attempt,
                });
            }
        }
    }
}
