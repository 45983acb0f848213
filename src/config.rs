//! Run configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Which reporter prints the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReporterKind {
    #[default]
    List,
    Json,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Upper bound on concurrently live workers.
    pub workers: usize,
    /// Default per-test timeout covering fixture setup and the body.
    #[serde(serialize_with = "as_millis")]
    pub timeout: Duration,
    /// Bound on each fixture's teardown.
    #[serde(serialize_with = "as_millis")]
    pub teardown_timeout: Duration,
    pub retries: usize,
    /// Values for parameters declared with `define_parameter`.
    pub params: BTreeMap<String, String>,
    /// Only run tests whose full title contains this text.
    pub grep: Option<String>,
    pub output_dir: PathBuf,
    pub reporter: ReporterKind,
    #[serde(skip)]
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map(usize::from).unwrap_or(2);
        Self {
            workers: (cpus / 2).max(1),
            timeout: Duration::from_secs(10),
            teardown_timeout: Duration::from_secs(10),
            retries: 0,
            params: BTreeMap::new(),
            grep: None,
            output_dir: PathBuf::from("test-results"),
            reporter: ReporterKind::List,
            verbose: false,
        }
    }
}

impl RunConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_grep(mut self, grep: impl Into<String>) -> Self {
        self.grep = Some(grep.into());
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }
}

/// Parse a `name=value` parameter assignment.
///
/// ## Errors
/// When there is no `=` or the name is empty.
pub fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got `{raw}`")),
    }
}

fn as_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
