//! Running a collected suite end to end.
//!
//! 1. Number the tests and validate each declaration statically: signature, union conflicts,
//!    resolution. Any error excludes the whole file it was found in.
//! 2. Group the remaining tests into work units by `(file, registry fingerprint)`.
//! 3. Dispatch the units to workers, streaming results to the reporters.
//! 4. Assemble the result tree and the summary.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::config::RunConfig;
use crate::errors::{Requester, RunError};
use crate::fixtures::Fingerprint;
use crate::lifecycle::TestJob;
use crate::reporters::Reporter;
use crate::resolve::resolve;
use crate::results::{Annotation, Outcome, Spec, Suite, Test, TestResult, TestStatus};
use crate::suite::{TestCase, TestMarker, TestSuite};
use crate::worker::{DispatchEvent, Dispatcher, WorkUnit, WorkerOptions};

/// Everything a run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub suite: Suite,
    pub errors: Vec<RunError>,
    pub duration: Duration,
    pub passed: usize,
    pub failed: usize,
    pub flaky: usize,
    pub skipped: usize,
}

impl RunSummary {
    /// Every attempt of every reported test, in declaration order.
    pub fn results(&self) -> Vec<&TestResult> {
        self.suite
            .all_tests()
            .into_iter()
            .flat_map(|test| test.results.iter())
            .collect()
    }

    /// First spec with this title.
    pub fn spec(&self, title: &str) -> Option<&Spec> {
        self.suite.all_specs().into_iter().find(|spec| spec.title == title)
    }

    /// Every test met its expectation and nothing went wrong outside the tests.
    pub fn ok(&self) -> bool {
        self.errors.is_empty() && self.failed == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.ok() { 0 } else { 1 }
    }
}

pub struct Runner {
    config: RunConfig,
    reporters: Vec<Box<dyn Reporter>>,
}

impl Runner {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            reporters: Vec::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    pub fn with_boxed_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run `suite` to completion.
    #[tracing::instrument(skip_all, fields(workers = self.config.workers))]
    pub async fn run(&mut self, mut suite: TestSuite) -> RunSummary {
        let started = Instant::now();
        let collected = suite.number();
        tracing::debug!(collected, "collected tests");

        let mut errors = Vec::new();
        let mut excluded: HashSet<String> = HashSet::new();
        let mut jobs = Vec::new();
        for case in suite.all_tests() {
            match prepare(case, &self.config) {
                Ok(job) => jobs.push(job),
                Err(error) => {
                    tracing::debug!(file = %case.file, %error, "excluding file");
                    excluded.insert(case.file.clone());
                    push_static(&mut errors, error);
                }
            }
        }
        jobs.retain(|job| !excluded.contains(&job.case.file));
        if let Some(grep) = &self.config.grep {
            jobs.retain(|job| job.case.full_title().contains(grep.as_str()));
        }

        let included: HashSet<usize> = jobs.iter().map(|job| job.case.id()).collect();
        let cases: HashMap<usize, Arc<TestCase>> = jobs.iter().map(|job| (job.case.id(), job.case.clone())).collect();
        let units = group_units(jobs);

        for reporter in &mut self.reporters {
            reporter.on_begin(&self.config, included.len());
            for error in &errors {
                reporter.on_error(error);
            }
        }

        let mut results: HashMap<usize, Vec<TestResult>> = HashMap::new();
        let options = WorkerOptions {
            params: Arc::new(self.config.params.clone()),
            teardown_timeout: self.config.teardown_timeout,
            output_dir: self.config.output_dir.clone(),
            retries: self.config.retries,
        };
        let reporters = &mut self.reporters;
        Dispatcher::new(self.config.workers, options)
            .dispatch(units, |event| match event {
                DispatchEvent::Finished { test_id, result } => {
                    if let Some(case) = cases.get(&test_id) {
                        for reporter in reporters.iter_mut() {
                            reporter.on_test_end(case, result);
                        }
                    }
                    results.entry(test_id).or_default().push(result.clone());
                }
                DispatchEvent::Error(error) => {
                    for reporter in reporters.iter_mut() {
                        reporter.on_error(error);
                    }
                    errors.push(error.clone());
                }
            })
            .await;

        let root = build_suite(&suite, &included, &mut results, &self.config);
        let summary = summarize(root, errors, started.elapsed());
        for reporter in &mut self.reporters {
            reporter.on_end(&summary);
        }
        summary
    }
}

/// Record a static error once, however many tests ran into it.
fn push_static(errors: &mut Vec<RunError>, error: RunError) {
    let message = error.to_string();
    let seen = errors
        .iter()
        .any(|known| known.location() == error.location() && known.to_string() == message);
    if !seen {
        errors.push(error);
    }
}

fn prepare(case: &TestCase, config: &RunConfig) -> Result<TestJob, RunError> {
    let requests = case.params.clone().map_err(|error| RunError::Signature {
        requester: Requester::Test,
        error,
        location: case.location.clone(),
    })?;
    if let Some(reserved) = case.registry.reserved().first() {
        return Err(RunError::ReservedName {
            name: reserved.name.clone(),
            location: reserved.location.clone(),
        });
    }
    if let Some(conflict) = case.registry.conflicts().first() {
        return Err(RunError::UnionConflict {
            name: conflict.name.clone(),
            location: conflict.location.clone(),
        });
    }
    let plan = resolve(&requests, &case.registry, true, &case.location)?;
    Ok(TestJob {
        case: Arc::new(case.clone()),
        requests,
        plan,
        timeout: case.effective_timeout(config.timeout),
        first_retry: 0,
    })
}

fn group_units(jobs: Vec<TestJob>) -> Vec<WorkUnit> {
    let mut groups: IndexMap<(String, Fingerprint), Vec<TestJob>> = IndexMap::new();
    for job in jobs {
        let key = (job.case.file.clone(), job.case.registry.fingerprint().clone());
        groups.entry(key).or_default().push(job);
    }
    groups
        .into_iter()
        .map(|((file, fingerprint), jobs)| WorkUnit {
            file,
            fingerprint,
            jobs,
        })
        .collect()
}

fn build_suite(
    suite: &TestSuite,
    included: &HashSet<usize>,
    results: &mut HashMap<usize, Vec<TestResult>>,
    config: &RunConfig,
) -> Suite {
    let suites = suite
        .suites
        .iter()
        .map(|child| build_suite(child, included, results, config))
        .filter(|child| !child.is_empty())
        .collect();
    let specs = suite
        .tests
        .iter()
        .filter(|case| included.contains(&case.id()))
        .map(|case| {
            let mut attempts = results.remove(&case.id()).unwrap_or_default();
            attempts.sort_by_key(|result| result.retry);
            Spec {
                title: case.title.clone(),
                file: case.file.clone(),
                location: case.location.clone(),
                tests: vec![Test {
                    id: case.id(),
                    slow: case.is_slow(),
                    timeout: case.effective_timeout(config.timeout),
                    annotations: annotations(case),
                    expected_status: if case.expects_failure() {
                        TestStatus::Failed
                    } else {
                        TestStatus::Passed
                    },
                    results: attempts,
                }],
            }
        })
        .collect();
    Suite {
        title: suite.title.clone(),
        file: suite.file.clone().unwrap_or_default(),
        location: suite.location.clone(),
        suites,
        specs,
    }
}

fn annotations(case: &TestCase) -> Vec<Annotation> {
    case.markers
        .iter()
        .filter_map(|marker| match marker {
            TestMarker::Skip(reason) => Some(("skip", Some(reason.clone()))),
            TestMarker::Fail(reason) => Some(("fail", Some(reason.clone()))),
            TestMarker::Slow => Some(("slow", None)),
            TestMarker::Timeout(_) => None,
        })
        .map(|(kind, description)| Annotation {
            kind: kind.to_string(),
            description: description.filter(|d| !d.is_empty()),
        })
        .collect()
}

fn summarize(suite: Suite, errors: Vec<RunError>, duration: Duration) -> RunSummary {
    let (mut passed, mut failed, mut flaky, mut skipped) = (0, 0, 0, 0);
    for test in suite.all_tests() {
        match test.outcome() {
            Outcome::Expected => passed += 1,
            Outcome::Unexpected => failed += 1,
            Outcome::Flaky => flaky += 1,
            Outcome::Skipped => skipped += 1,
        }
    }
    RunSummary {
        suite,
        errors,
        duration,
        passed,
        failed,
        flaky,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Fixtures, Registry};

    #[tokio::test]
    async fn static_error_excludes_the_whole_file() {
        let registry = Registry::base().define_test_fixtures(Fixtures::new().value("ok", "()", |_| async { Ok(()) }));
        let mut suite = TestSuite::new();
        suite.file("broken.spec", |f| {
            f.test("fine", &registry, "({ ok })", |_| async { Ok(()) });
            f.test("bad", &registry, "({ missing })", |_| async { Ok(()) });
        });
        suite.file("good.spec", |f| {
            f.test("fine too", &registry, "({ ok })", |_| async { Ok(()) });
        });
        let summary = Runner::new(RunConfig::default().with_workers(1)).run(suite).await;
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].to_string(), "Test has unknown parameter \"missing\".");
        assert_eq!(summary.results().len(), 1);
        assert!(summary.spec("fine too").is_some());
        assert!(summary.spec("fine").is_none());
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn shared_broken_fixture_is_reported_once() {
        let registry = Registry::base()
            .define_test_fixtures(Fixtures::new().value("broken", "function (abc) {}", |_| async { Ok(()) }));
        let mut suite = TestSuite::new();
        suite.file("first.spec", |f| {
            f.test("a", &registry, "({ broken })", |_| async { Ok(()) });
            f.test("b", &registry, "({ broken })", |_| async { Ok(()) });
        });
        suite.file("second.spec", |f| {
            f.test("c", &registry, "({ broken })", |_| async { Ok(()) });
        });
        let summary = Runner::new(RunConfig::default().with_workers(1)).run(suite).await;
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(
            summary.errors[0].to_string(),
            "First argument must use the object destructuring pattern: abc"
        );
        assert!(summary.results().is_empty());
    }

    #[tokio::test]
    async fn redefining_a_builtin_is_static() {
        let registry = Registry::base()
            .define_test_fixtures(Fixtures::new().value("test_info", "()", |_| async { Ok("fake") }));
        let mut suite = TestSuite::new();
        suite.file("reserved.spec", |f| {
            f.test("t", &registry, "({ test_info })", |_| async { Ok(()) });
        });
        let summary = Runner::new(RunConfig::default().with_workers(1)).run(suite).await;
        assert!(matches!(summary.errors.as_slice(), [RunError::ReservedName { name, .. }] if name == "test_info"));
        assert!(summary.results().is_empty());
    }

    #[tokio::test]
    async fn grep_filters_by_title() {
        let registry = Registry::base();
        let mut suite = TestSuite::new();
        suite.file("a.spec", |f| {
            f.describe("login", |g| {
                g.test("works", &registry, "()", |_| async { Ok(()) });
            });
            f.test("logout", &registry, "()", |_| async { Ok(()) });
        });
        let summary = Runner::new(RunConfig::default().with_grep("login")).run(suite).await;
        assert_eq!(summary.passed, 1);
        assert!(summary.spec("works").is_some());
        assert!(summary.ok());
    }

    #[tokio::test]
    async fn union_conflict_is_static() {
        let base = Registry::base();
        let left = base.define_test_fixtures(Fixtures::new().value("x", "()", |_| async { Ok(1_u8) }));
        let right = base.define_test_fixtures(Fixtures::new().value("x", "()", |_| async { Ok(2_u8) }));
        let both = left.union(&right);
        let mut suite = TestSuite::new();
        suite.file("u.spec", |f| {
            f.test("t", &both, "()", |_| async { Ok(()) });
        });
        let summary = Runner::new(RunConfig::default()).run(suite).await;
        assert!(matches!(summary.errors.as_slice(), [RunError::UnionConflict { name, .. }] if name == "x"));
        assert!(summary.results().is_empty());
    }

    #[test]
    fn units_split_by_file_and_fingerprint() {
        let a = Registry::base();
        let b = a.define_test_fixtures(Fixtures::new());
        let mut suite = TestSuite::new();
        suite.file("one", |f| {
            f.test("1", &a, "()", |_| async { Ok(()) });
            f.test("2", &b, "()", |_| async { Ok(()) });
            f.test("3", &a, "()", |_| async { Ok(()) });
        });
        suite.number();
        let config = RunConfig::default();
        let jobs = suite.all_tests().into_iter().map(|case| prepare(case, &config).unwrap()).collect();
        let units = group_units(jobs);
        let shapes: Vec<Vec<&str>> = units
            .iter()
            .map(|unit| unit.jobs.iter().map(|job| job.case.title.as_str()).collect())
            .collect();
        assert_eq!(shapes, vec![vec!["1", "3"], vec!["2"]]);
    }

    #[test]
    fn annotations_follow_markers() {
        let mut suite = TestSuite::new();
        let case = suite
            .test("t", &Registry::base(), "()", |_| async { Ok(()) })
            .skip("")
            .fail("bug 12")
            .clone();
        let kinds: Vec<_> = annotations(&case)
            .into_iter()
            .map(|a| (a.kind, a.description))
            .collect();
        assert_eq!(
            kinds,
            vec![("skip".to_string(), None), ("fail".to_string(), Some("bug 12".to_string()))]
        );
    }
}
