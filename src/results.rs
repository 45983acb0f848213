//! Outcome model: what a run produced, shaped the way reporters consume it.
//!
//! ```text
//! Suite (root)
//! └── Suite (file)
//!     ├── Suite (describe)
//!     │   └── Spec ── Test ── [TestResult; attempts]
//!     └── Spec ── Test ── [TestResult; attempts]
//! ```

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tessera_core::Location;

use crate::errors::RunError;

/// Final status of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TestStatus {
    Passed,
    Failed,
    TimedOut,
    Skipped,
}

impl TestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::TimedOut => "timedOut",
            TestStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captured output chunk: text, or bytes that are not valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdioEntry {
    Text(String),
    Buffer(Vec<u8>),
}

/// Failure detail attached to a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl TestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    /// Message of `report` with its cause chain and a frame at `location`.
    pub fn from_report(report: &miette::Report, location: &Location) -> Self {
        let message = report.to_string();
        let mut stack = message.clone();
        for cause in report.chain().skip(1) {
            stack.push_str(&format!("\n    caused by: {cause}"));
        }
        stack.push_str(&format!("\n    at {location}"));
        Self {
            message,
            stack: Some(stack),
        }
    }

    pub fn from_run_error(error: &RunError) -> Self {
        Self {
            message: error.to_string(),
            stack: Some(error.stack()),
        }
    }

    pub fn with_location(message: impl Into<String>, location: &Location) -> Self {
        let message = message.into();
        let stack = format!("{message}\n    at {location}");
        Self {
            message,
            stack: Some(stack),
        }
    }
}

/// One attempt of one test.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub worker_index: usize,
    pub status: TestStatus,
    pub duration: Duration,
    pub error: Option<TestError>,
    pub stdout: Vec<StdioEntry>,
    pub stderr: Vec<StdioEntry>,
    pub retry: usize,
}

impl TestResult {
    pub(crate) fn new(worker_index: usize, retry: usize, status: TestStatus) -> Self {
        Self {
            worker_index,
            status,
            duration: Duration::ZERO,
            error: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            retry,
        }
    }
}

/// Marker-derived note on a test, e.g. `skip` with its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// How a test's attempts compare to its expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Expected,
    Unexpected,
    Flaky,
    Skipped,
}

/// A test with all its attempts.
#[derive(Debug, Clone)]
pub struct Test {
    pub id: usize,
    pub slow: bool,
    pub timeout: Duration,
    pub annotations: Vec<Annotation>,
    pub expected_status: TestStatus,
    pub results: Vec<TestResult>,
}

impl Test {
    pub fn outcome(&self) -> Outcome {
        let Some(last) = self.results.last() else {
            return Outcome::Skipped;
        };
        if last.status == TestStatus::Skipped {
            return Outcome::Skipped;
        }
        if last.status != self.expected_status {
            return Outcome::Unexpected;
        }
        if self.results.len() > 1 {
            Outcome::Flaky
        } else {
            Outcome::Expected
        }
    }

    pub fn ok(&self) -> bool {
        !matches!(self.outcome(), Outcome::Unexpected)
    }
}

/// A declared test and where it came from.
#[derive(Debug, Clone)]
pub struct Spec {
    pub title: String,
    pub file: String,
    pub location: Location,
    pub tests: Vec<Test>,
}

#[derive(Debug, Clone, Default)]
pub struct Suite {
    pub title: String,
    pub file: String,
    pub location: Option<Location>,
    pub suites: Vec<Suite>,
    pub specs: Vec<Spec>,
}

impl Suite {
    /// All specs, depth first, in declaration order.
    pub fn all_specs(&self) -> Vec<&Spec> {
        let mut out = Vec::new();
        self.collect_specs(&mut out);
        out
    }

    fn collect_specs<'a>(&'a self, out: &mut Vec<&'a Spec>) {
        for suite in &self.suites {
            suite.collect_specs(out);
        }
        out.extend(self.specs.iter());
    }

    pub fn all_tests(&self) -> Vec<&Test> {
        self.all_specs().into_iter().flat_map(|spec| spec.tests.iter()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty() && self.suites.iter().all(Suite::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_with(statuses: &[TestStatus], expected: TestStatus) -> Test {
        Test {
            id: 0,
            slow: false,
            timeout: Duration::from_secs(1),
            annotations: vec![],
            expected_status: expected,
            results: statuses
                .iter()
                .enumerate()
                .map(|(retry, status)| TestResult::new(0, retry, *status))
                .collect(),
        }
    }

    #[test]
    fn outcome_classification() {
        use TestStatus::*;
        assert_eq!(test_with(&[Passed], Passed).outcome(), Outcome::Expected);
        assert_eq!(test_with(&[Failed], Passed).outcome(), Outcome::Unexpected);
        assert_eq!(test_with(&[Failed, Passed], Passed).outcome(), Outcome::Flaky);
        assert_eq!(test_with(&[Failed], Failed).outcome(), Outcome::Expected);
        assert_eq!(test_with(&[Skipped], Passed).outcome(), Outcome::Skipped);
        assert!(!test_with(&[TimedOut], Passed).ok());
    }

    #[test]
    fn report_error_carries_chain_and_frame() {
        let report = miette::miette!("boom").wrap_err("while connecting");
        let error = TestError::from_report(&report, &Location::new("tests/a.rs", 4, 2));
        assert_eq!(error.message, "while connecting");
        assert_eq!(
            error.stack.as_deref(),
            Some("while connecting\n    caused by: boom\n    at tests/a.rs:4:2")
        );
    }

    #[test]
    fn status_serializes_camel_case() {
        assert_eq!(serde_json::to_string(&TestStatus::TimedOut).unwrap(), "\"timedOut\"");
        assert_eq!(TestStatus::Passed.to_string(), "passed");
    }
}
