//! Machine-readable JSON report.
//!
//! Written to the path in `TESSERA_JSON_OUTPUT_NAME` (parent directories are created), or to
//! stdout when unset. `TESSERA_RUN_URL` and `TESSERA_BUILDBOT_NAME` fill the `runInfo` block.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

use crate::config::RunConfig;
use crate::errors::RunError;
use crate::reporters::Reporter;
use crate::results::{Annotation, Spec, StdioEntry, Suite, Test, TestError, TestResult, TestStatus};
use crate::runner::RunSummary;

pub const OUTPUT_NAME_ENV: &str = "TESSERA_JSON_OUTPUT_NAME";
pub const RUN_URL_ENV: &str = "TESSERA_RUN_URL";
pub const BUILDBOT_NAME_ENV: &str = "TESSERA_BUILDBOT_NAME";

// ============================================================================
// Report format
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub config: Option<RunConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitInfo>,
    pub run_info: RunInfo,
    pub errors: Vec<ErrorEntry>,
    pub suites: Vec<SerializedSuite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub sha: String,
    pub unix_timestamp: u64,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInfo {
    pub url: String,
    pub buildbot_name: String,
    pub platform: String,
    pub release: String,
    pub arch: String,
    pub unix_timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorEntry {
    pub error: TestError,
}

#[derive(Debug, Serialize)]
pub struct SerializedSuite {
    pub title: String,
    pub file: String,
    pub location: String,
    pub specs: Vec<SerializedSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suites: Option<Vec<SerializedSuite>>,
}

#[derive(Debug, Serialize)]
pub struct SerializedSpec {
    pub title: String,
    pub file: String,
    pub location: String,
    pub tests: Vec<SerializedTest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedTest {
    pub slow: bool,
    pub timeout: u64,
    pub annotations: Vec<Annotation>,
    pub expected_status: TestStatus,
    pub parameters: BTreeMap<String, String>,
    pub runs: Vec<SerializedResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedResult {
    pub worker_index: usize,
    pub status: TestStatus,
    pub duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
    pub stdout: Vec<SerializedStdio>,
    pub stderr: Vec<SerializedStdio>,
    pub data: BTreeMap<String, String>,
    pub retry: usize,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SerializedStdio {
    Text(String),
    Buffer(String),
}

impl From<&StdioEntry> for SerializedStdio {
    fn from(entry: &StdioEntry) -> Self {
        match entry {
            StdioEntry::Text(text) => SerializedStdio::Text(text.clone()),
            StdioEntry::Buffer(bytes) => SerializedStdio::Buffer(STANDARD.encode(bytes)),
        }
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn serialize_suite(suite: &Suite, params: &BTreeMap<String, String>) -> Option<SerializedSuite> {
    if suite.is_empty() {
        return None;
    }
    let suites: Vec<_> = suite
        .suites
        .iter()
        .filter_map(|child| serialize_suite(child, params))
        .collect();
    Some(SerializedSuite {
        title: suite.title.clone(),
        file: suite.file.clone(),
        location: suite.location.as_ref().map(ToString::to_string).unwrap_or_default(),
        specs: suite.specs.iter().map(|spec| serialize_spec(spec, params)).collect(),
        suites: if suites.is_empty() { None } else { Some(suites) },
    })
}

fn serialize_spec(spec: &Spec, params: &BTreeMap<String, String>) -> SerializedSpec {
    SerializedSpec {
        title: spec.title.clone(),
        file: spec.file.clone(),
        location: spec.location.to_string(),
        tests: spec.tests.iter().map(|test| serialize_test(test, params)).collect(),
    }
}

fn serialize_test(test: &Test, params: &BTreeMap<String, String>) -> SerializedTest {
    SerializedTest {
        slow: test.slow,
        timeout: millis(test.timeout),
        annotations: test.annotations.clone(),
        expected_status: test.expected_status,
        parameters: params.clone(),
        runs: test.results.iter().map(serialize_result).collect(),
    }
}

fn serialize_result(result: &TestResult) -> SerializedResult {
    SerializedResult {
        worker_index: result.worker_index,
        status: result.status,
        duration: millis(result.duration),
        error: result.error.clone(),
        stdout: result.stdout.iter().map(SerializedStdio::from).collect(),
        stderr: result.stderr.iter().map(SerializedStdio::from).collect(),
        data: BTreeMap::new(),
        retry: result.retry,
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Parse `git show -s --format=%H %ct %s` output.
pub fn parse_commit_line(line: &str) -> Option<CommitInfo> {
    let mut tokens = line.trim().splitn(3, ' ');
    let sha = tokens.next().filter(|s| !s.is_empty())?.to_string();
    let unix_timestamp = tokens.next()?.parse().ok()?;
    let message = tokens.next().unwrap_or_default().to_string();
    Some(CommitInfo {
        sha,
        unix_timestamp,
        message,
    })
}

fn commit_info(dir: &Path) -> Option<CommitInfo> {
    let output = Command::new("git")
        .args(["show", "-s", "--format=%H %ct %s", "HEAD"])
        .current_dir(dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_commit_line(&String::from_utf8_lossy(&output.stdout))
}

fn os_release() -> String {
    std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn run_info() -> RunInfo {
    RunInfo {
        url: std::env::var(RUN_URL_ENV).unwrap_or_default(),
        buildbot_name: std::env::var(BUILDBOT_NAME_ENV).unwrap_or_default(),
        platform: std::env::consts::OS.to_string(),
        release: os_release(),
        arch: std::env::consts::ARCH.to_string(),
        unix_timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
    }
}

// ============================================================================
// Reporter
// ============================================================================

pub struct JsonReporter {
    output: Option<PathBuf>,
    config: Option<RunConfig>,
    errors: Vec<ErrorEntry>,
}

impl JsonReporter {
    /// Write to `output`, or to stdout when `None`.
    pub fn new(output: Option<PathBuf>) -> Self {
        Self {
            output,
            config: None,
            errors: Vec::new(),
        }
    }

    /// Output path from `TESSERA_JSON_OUTPUT_NAME`.
    pub fn from_env() -> Self {
        Self::new(std::env::var_os(OUTPUT_NAME_ENV).map(PathBuf::from))
    }

    /// Build the report for `summary`.
    pub fn report(&self, summary: &RunSummary) -> Report {
        let params = self.config.as_ref().map(|c| c.params.clone()).unwrap_or_default();
        let suites: Vec<_> = summary
            .suite
            .suites
            .iter()
            .filter_map(|suite| serialize_suite(suite, &params))
            .collect();
        let commit = suites
            .first()
            .map(|suite| Path::new(&suite.file))
            .and_then(|file| file.parent())
            .map(|dir| if dir.as_os_str().is_empty() { Path::new(".") } else { dir })
            .and_then(commit_info);
        Report {
            config: self.config.clone(),
            commit,
            run_info: run_info(),
            errors: self.errors.iter().map(|e| ErrorEntry { error: e.error.clone() }).collect(),
            suites,
        }
    }

    fn write(&self, text: &str) -> std::io::Result<()> {
        match &self.output {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, text)
            }
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(text.as_bytes())?;
                stdout.write_all(b"\n")
            }
        }
    }
}

impl Reporter for JsonReporter {
    fn on_begin(&mut self, config: &RunConfig, _tests: usize) {
        self.config = Some(config.clone());
    }

    fn on_error(&mut self, error: &RunError) {
        self.errors.push(ErrorEntry {
            error: TestError::from_run_error(error),
        });
    }

    fn on_end(&mut self, summary: &RunSummary) {
        let report = self.report(summary);
        match serde_json::to_string_pretty(&report) {
            Ok(text) => {
                if let Err(error) = self.write(&text) {
                    tracing::error!(%error, "failed to write JSON report");
                }
            }
            Err(error) => tracing::error!(%error, "failed to serialize JSON report"),
        }
    }
}
