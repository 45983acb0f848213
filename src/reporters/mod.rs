//! Reporters: observers notified as a run progresses.
//!
//! The [`Reporter`] trait separates reporting from execution. [`ListReporter`] prints a
//! pytest-style session to stdout; [`JsonReporter`] writes a machine-readable report.

pub mod json;
pub mod list;

pub use json::JsonReporter;
pub use list::ListReporter;

use crate::config::{ReporterKind, RunConfig};
use crate::errors::RunError;
use crate::results::TestResult;
use crate::runner::RunSummary;
use crate::suite::TestCase;

/// Implement this trait to customize how a run is reported.
pub trait Reporter: Send {
    /// Called once the runnable tests are known.
    fn on_begin(&mut self, _config: &RunConfig, _tests: usize) {}

    /// Called after every attempt of a test.
    fn on_test_end(&mut self, _test: &TestCase, _result: &TestResult) {}

    /// Called for every run-level error.
    fn on_error(&mut self, _error: &RunError) {}

    /// Called when the run is over.
    fn on_end(&mut self, _summary: &RunSummary) {}
}

/// Reporter selected by `kind`.
pub fn for_kind(kind: ReporterKind, verbose: bool) -> Box<dyn Reporter> {
    match kind {
        ReporterKind::List => Box::new(ListReporter::new(verbose)),
        ReporterKind::Json => Box::new(JsonReporter::from_env()),
    }
}
