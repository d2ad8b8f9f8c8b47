use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::batch::DEFAULT_CONCURRENCY;
use crate::executor::DEFAULT_CHUNK_SIZE;
use crate::resolve::{PositionDescriptor, ServiceDescriptor, ServiceRecord, ServiceTarget};
use crate::transport::{
    DEFAULT_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_SECS, TransportConfig,
};

pub const DEFAULT_OUT_DIR_NAME: &str = "results";
pub const DEFAULT_QUERY_TYPE: &str = "cone";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
}

/// `out_dir` defaults to `<cwd>/results`. Relative overrides resolve
/// against `cwd`; `~/...` needs a home directory.
pub fn resolve_runtime_paths(
    home_dir: Option<&Path>,
    cwd: &Path,
    out_dir_override: Option<&Path>,
) -> Result<RuntimePaths> {
    if !cwd.is_absolute() {
        bail!("cwd must be absolute: {}", cwd.display());
    }

    let cwd = normalize_lexical(cwd);
    let out_dir = match out_dir_override {
        Some(path) => resolve_user_path(path, home_dir, &cwd)?,
        None => cwd.join(DEFAULT_OUT_DIR_NAME),
    };

    Ok(RuntimePaths {
        cwd,
        out_dir: normalize_lexical(&out_dir),
    })
}

/// Global flags as seen before any config file is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnv {
    pub home_dir: Option<PathBuf>,
    pub cwd: PathBuf,
    pub out_dir: Option<PathBuf>,
}

impl RuntimeEnv {
    /// The `--out-dir` flag wins over the config file's `out_dir`.
    pub fn resolve_paths(&self, config_out_dir: Option<&Path>) -> Result<RuntimePaths> {
        let out_dir = self.out_dir.as_deref().or(config_out_dir);
        resolve_runtime_paths(self.home_dir.as_deref(), &self.cwd, out_dir)
    }
}

/// Creates `out_dir` and proves a file can be written inside it.
pub fn ensure_writable_dir(out_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory: {}", out_dir.display()))?;
    let marker = out_dir.join(".servicemon-write-check");
    std::fs::write(&marker, b"")
        .with_context(|| format!("output directory is not writable: {}", out_dir.display()))?;
    std::fs::remove_file(&marker)
        .with_context(|| format!("failed to remove write check file: {}", marker.display()))?;
    Ok(())
}

pub fn resolve_user_path(path: &Path, home_dir: Option<&Path>, cwd: &Path) -> Result<PathBuf> {
    let expanded = expand_tilde(path, home_dir)?;
    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };

    Ok(normalize_lexical(&resolved))
}

fn expand_tilde(path: &Path, home_dir: Option<&Path>) -> Result<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => {
            let Some(home_dir) = home_dir else {
                bail!("cannot expand `~` without a home directory: {}", path.display());
            };
            let mut expanded = home_dir.to_path_buf();
            for component in components {
                expanded.push(component.as_os_str());
            }
            Ok(expanded)
        }
        Some(Component::Normal(first))
            if first
                .to_str()
                .is_some_and(|segment| segment.starts_with('~')) =>
        {
            bail!(
                "unsupported home expansion syntax (only `~` and `~/...` are supported): {}",
                path.display()
            )
        }
        _ => Ok(path.to_path_buf()),
    }
}

fn normalize_lexical(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            _ => normalized.push(component.as_os_str()),
        }
    }

    normalized
}

/// One service as written in a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceEntry {
    pub base_name: String,
    #[serde(default = "default_query_type", alias = "service_type")]
    pub query_type: String,
    #[serde(default)]
    pub access_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ServiceEntry {
    #[must_use]
    pub fn to_target(&self) -> ServiceTarget {
        ServiceTarget {
            base_name: self.base_name.clone(),
            query_type: self.query_type.clone(),
            descriptor: ServiceDescriptor::Record(ServiceRecord {
                access_url: self.access_url.clone(),
                title: self.title.clone(),
            }),
        }
    }
}

fn default_query_type() -> String {
    DEFAULT_QUERY_TYPE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    pub services: Vec<ServiceEntry>,
    pub positions: Vec<PositionDescriptor>,
    pub radii: Vec<f64>,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_ms() -> u64 {
    DEFAULT_BACKOFF_MS
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for BatchConfig {
    /// The Chandra Source Catalog cone service over two positions and two
    /// radii.
    fn default() -> Self {
        Self {
            out_dir: None,
            concurrency: DEFAULT_CONCURRENCY,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_BACKOFF_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            services: vec![ServiceEntry {
                base_name: "CSC".to_string(),
                query_type: DEFAULT_QUERY_TYPE.to_string(),
                access_url: Some("http://cda.harvard.edu/cscvo/coneSearch?".to_string()),
                title: None,
            }],
            positions: vec![
                PositionDescriptor::Pair(125.886, 21.3377),
                PositionDescriptor::Pair(125.7, 21.5),
            ],
            radii: vec![0.1, 0.5],
        }
    }
}

impl BatchConfig {
    #[must_use]
    pub fn service_targets(&self) -> Vec<ServiceTarget> {
        self.services.iter().map(ServiceEntry::to_target).collect()
    }

    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.backoff_ms),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be at least 1");
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }
        Ok(())
    }
}

pub fn load_batch_config(path: &Path) -> Result<BatchConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read batch config: {}", path.display()))?;
    let config: BatchConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse batch config: {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::{BatchConfig, RuntimeEnv, resolve_runtime_paths};
    use crate::resolve::{PositionDescriptor, ServiceDescriptor};
    use std::path::{Path, PathBuf};

    #[test]
    fn defaults_out_dir_under_cwd_results() {
        let paths = resolve_runtime_paths(None, Path::new("/work/repo"), None)
            .expect("paths should resolve");

        assert_eq!(paths.cwd, Path::new("/work/repo"));
        assert_eq!(paths.out_dir, Path::new("/work/repo/results"));
    }

    #[test]
    fn expands_tilde_override_against_home_dir() {
        let paths = resolve_runtime_paths(
            Some(Path::new("/home/tester")),
            Path::new("/work/repo"),
            Some(Path::new("~/monitor/output")),
        )
        .expect("tilde override should resolve");

        assert_eq!(paths.out_dir, Path::new("/home/tester/monitor/output"));
    }

    #[test]
    fn tilde_without_home_fails() {
        let err = resolve_runtime_paths(None, Path::new("/work/repo"), Some(Path::new("~/x")))
            .expect_err("no home dir");
        assert!(
            err.to_string().contains("without a home directory"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn resolves_relative_override_against_cwd() {
        let paths = resolve_runtime_paths(
            None,
            Path::new("/work/repo"),
            Some(Path::new("./artifacts/../artifacts/runs")),
        )
        .expect("relative override should resolve");

        assert_eq!(paths.out_dir, Path::new("/work/repo/artifacts/runs"));
    }

    #[test]
    fn rejects_non_absolute_cwd() {
        let err = resolve_runtime_paths(None, Path::new("work/repo"), None)
            .expect_err("relative cwd must fail");

        assert!(
            err.to_string().contains("cwd must be absolute"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn out_dir_flag_beats_config_out_dir() {
        let env = RuntimeEnv {
            home_dir: None,
            cwd: PathBuf::from("/work/repo"),
            out_dir: Some(PathBuf::from("flag-dir")),
        };
        let paths = env
            .resolve_paths(Some(Path::new("config-dir")))
            .expect("paths should resolve");
        assert_eq!(paths.out_dir, Path::new("/work/repo/flag-dir"));

        let env = RuntimeEnv {
            out_dir: None,
            ..env
        };
        let paths = env
            .resolve_paths(Some(Path::new("config-dir")))
            .expect("paths should resolve");
        assert_eq!(paths.out_dir, Path::new("/work/repo/config-dir"));
    }

    #[test]
    fn builtin_batch_is_two_by_two_cones() {
        let config = BatchConfig::default();
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.positions.len() * config.radii.len(), 4);
        let targets = config.service_targets();
        assert_eq!(targets[0].base_name, "CSC");
        assert!(matches!(targets[0].descriptor, ServiceDescriptor::Record(_)));
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: BatchConfig = serde_json::from_str(
            r#"{
                "services": [{"base_name": "CSC", "service_type": "cone", "access_url": "http://x/cone?"}],
                "positions": [[10.0, 20.0], "08:23:32.6 +21:20:15.7"],
                "radii": [0.25]
            }"#,
        )
        .expect("config should parse");

        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.services[0].query_type, "cone");
        assert_eq!(config.positions[0], PositionDescriptor::Pair(10.0, 20.0));
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn rejects_unknown_fields_and_zero_concurrency() {
        assert!(
            serde_json::from_str::<BatchConfig>(
                r#"{"services": [], "positions": [], "radii": [], "bogus": 1}"#
            )
            .is_err()
        );
        let config: BatchConfig = serde_json::from_str(
            r#"{"services": [], "positions": [], "radii": [], "concurrency": 0}"#,
        )
        .expect("config should parse");
        assert!(config.validate().is_err());
    }
}
