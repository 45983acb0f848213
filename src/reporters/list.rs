//! Console reporter (pytest-style).

use std::io::Write;

use crate::config::RunConfig;
use crate::errors::RunError;
use crate::reporters::Reporter;
use crate::results::{Outcome, TestResult, TestStatus};
use crate::runner::RunSummary;
use crate::suite::TestCase;

pub struct ListReporter {
    verbose: bool,
    out: Box<dyn Write + Send>,
}

impl ListReporter {
    pub fn new(verbose: bool) -> Self {
        Self::to_writer(verbose, std::io::stdout())
    }

    pub fn to_writer(verbose: bool, out: impl Write + Send + 'static) -> Self {
        Self {
            verbose,
            out: Box::new(out),
        }
    }

    // Console output is best effort; a closed stdout must not abort the run.
    fn emit(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }
}

/// Status label for one attempt.
pub fn status_label(result: &TestResult, expected: TestStatus, verbose: bool) -> String {
    let ms = result.duration.as_millis();
    match (result.status, verbose) {
        (TestStatus::Skipped, true) => "\x1b[33mSKIPPED\x1b[0m".to_string(),
        (TestStatus::Skipped, false) => "\x1b[33ms\x1b[0m".to_string(),
        (status, true) if status == expected && expected == TestStatus::Failed => {
            format!("\x1b[33mXFAIL\x1b[0m ({ms}ms)")
        }
        (TestStatus::Passed, true) if expected == TestStatus::Failed => "\x1b[31mXPASS\x1b[0m".to_string(),
        (TestStatus::Passed, true) => format!("\x1b[32mPASSED\x1b[0m ({ms}ms)"),
        (TestStatus::Failed, true) => format!("\x1b[31mFAILED\x1b[0m ({ms}ms)"),
        (TestStatus::TimedOut, true) => format!("\x1b[31mTIMEOUT\x1b[0m ({ms}ms)"),
        (status, false) if status == expected => "\x1b[32m.\x1b[0m".to_string(),
        (TestStatus::TimedOut, false) => "\x1b[31mT\x1b[0m".to_string(),
        (_, false) => "\x1b[31mF\x1b[0m".to_string(),
    }
}

impl Reporter for ListReporter {
    fn on_begin(&mut self, config: &RunConfig, tests: usize) {
        if tests == 0 {
            self.emit("No tests collected\n");
            return;
        }
        let text = format!(
            "\x1b[1m=================== test session starts ===================\x1b[0m\nRunning {tests} test(s) using up to {} worker(s)\n\n",
            config.workers
        );
        self.emit(&text);
    }

    fn on_test_end(&mut self, test: &TestCase, result: &TestResult) {
        let expected = if test.expects_failure() {
            TestStatus::Failed
        } else {
            TestStatus::Passed
        };
        let label = status_label(result, expected, self.verbose);
        if self.verbose {
            let retry = if result.retry > 0 {
                format!(" (retry #{})", result.retry)
            } else {
                String::new()
            };
            let text = format!(
                "[{}] {} › {}{retry} {label}\n",
                result.worker_index,
                test.file,
                test.full_title()
            );
            self.emit(&text);
        } else {
            self.emit(&label);
        }
    }

    fn on_error(&mut self, error: &RunError) {
        if self.verbose {
            let text = format!("\x1b[31mError:\x1b[0m {error}\n");
            self.emit(&text);
        }
    }

    fn on_end(&mut self, summary: &RunSummary) {
        let mut text = String::new();
        if !self.verbose {
            text.push('\n');
        }

        let failures: Vec<_> = summary
            .suite
            .all_specs()
            .into_iter()
            .flat_map(|spec| spec.tests.iter().map(move |test| (spec, test)))
            .filter(|(_, test)| test.outcome() == Outcome::Unexpected)
            .collect();
        if !failures.is_empty() {
            text.push_str("\n\x1b[1;31m=================== FAILURES ===================\x1b[0m\n");
            for (spec, test) in failures {
                text.push_str(&format!("\n\x1b[1m___________ {} ___________\x1b[0m\n\n", spec.title));
                match test.results.last().and_then(|r| r.error.as_ref()) {
                    Some(error) => {
                        let detail = error.stack.as_deref().unwrap_or(&error.message);
                        for line in detail.lines() {
                            text.push_str(&format!("    {line}\n"));
                        }
                    }
                    None => text.push_str("    \x1b[33mTest passed but was expected to fail\x1b[0m\n"),
                }
                text.push_str(&format!("\n    {}\n", spec.location));
            }
        }

        if !summary.errors.is_empty() {
            text.push_str("\n\x1b[1;31m=================== ERRORS ===================\x1b[0m\n");
            for error in &summary.errors {
                text.push_str(&format!("\n{}\n", error.stack()));
            }
        }

        let mut parts = Vec::new();
        if summary.passed > 0 {
            parts.push(format!("{} passed", summary.passed));
        }
        if summary.failed > 0 {
            parts.push(format!("{} failed", summary.failed));
        }
        if summary.flaky > 0 {
            parts.push(format!("{} flaky", summary.flaky));
        }
        if summary.skipped > 0 {
            parts.push(format!("{} skipped", summary.skipped));
        }
        if !summary.errors.is_empty() {
            parts.push(format!("{} error(s)", summary.errors.len()));
        }
        if parts.is_empty() {
            parts.push("no tests ran".to_string());
        }
        let color = if summary.ok() { "\x1b[1;32m" } else { "\x1b[1;31m" };
        text.push_str(&format!(
            "\n{color}=================== {} in {:.2}s ===================\x1b[0m\n",
            parts.join(", "),
            summary.duration.as_secs_f64()
        ));
        self.emit(&text);
    }
}
