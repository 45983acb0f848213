//! Test collection: files, `describe` groups and test declarations.
//!
//! Declarations capture their source location with `#[track_caller]`, analyse their signature
//! immediately and remember the registry they were bound to. Nothing runs until the collected
//! [`TestSuite`] is handed to a [`crate::Runner`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tessera_core::Location;
use tessera_syntax::{ExtractError, IntoParams, ParamRequest};

use crate::fixtures::{FixtureArgs, Registry};

pub type TestBody = Arc<dyn Fn(FixtureArgs) -> BoxFuture<'static, miette::Result<()>> + Send + Sync>;

/// Per-test markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestMarker {
    /// Do not run; no fixture is created.
    Skip(String),
    /// The test is expected to fail.
    Fail(String),
    /// Triple the timeout.
    Slow,
    /// Explicit timeout for this test.
    Timeout(Duration),
}

/// A collected test declaration.
#[derive(Clone)]
pub struct TestCase {
    pub(crate) id: usize,
    pub title: String,
    /// Titles of the enclosing `describe` groups, outermost first.
    pub path: Vec<String>,
    pub file: String,
    pub location: Location,
    pub registry: Registry,
    pub params: Result<Vec<ParamRequest>, ExtractError>,
    pub(crate) body: TestBody,
    pub markers: Vec<TestMarker>,
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("file", &self.file)
            .field("location", &self.location)
            .field("markers", &self.markers)
            .finish_non_exhaustive()
    }
}

impl TestCase {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Title including enclosing groups, joined with ` › `.
    pub fn full_title(&self) -> String {
        let mut parts = self.path.clone();
        parts.push(self.title.clone());
        parts.join(" › ")
    }

    pub fn skip(&mut self, reason: impl Into<String>) -> &mut Self {
        self.markers.push(TestMarker::Skip(reason.into()));
        self
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> &mut Self {
        self.markers.push(TestMarker::Fail(reason.into()));
        self
    }

    pub fn slow(&mut self) -> &mut Self {
        self.markers.push(TestMarker::Slow);
        self
    }

    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.markers.push(TestMarker::Timeout(timeout));
        self
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.markers.iter().find_map(|m| match m {
            TestMarker::Skip(reason) => Some(reason.as_str()),
            _ => None,
        })
    }

    pub fn expects_failure(&self) -> bool {
        self.markers.iter().any(|m| matches!(m, TestMarker::Fail(_)))
    }

    pub fn is_slow(&self) -> bool {
        self.markers.contains(&TestMarker::Slow)
    }

    /// Timeout after markers: an explicit timeout wins, `slow` triples the default.
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        let explicit = self.markers.iter().rev().find_map(|m| match m {
            TestMarker::Timeout(d) => Some(*d),
            _ => None,
        });
        let base = explicit.unwrap_or(default);
        if self.is_slow() { base * 3 } else { base }
    }
}

/// Position of a declaration within its scope.
#[derive(Debug, Clone, Copy)]
enum Entry {
    Suite(usize),
    Test(usize),
}

/// A collection scope: the root, a file, or a `describe` group.
#[derive(Debug, Default)]
pub struct TestSuite {
    pub title: String,
    pub file: Option<String>,
    pub location: Option<Location>,
    path: Vec<String>,
    pub suites: Vec<TestSuite>,
    pub tests: Vec<TestCase>,
    /// Tests and child suites interleaved as declared.
    order: Vec<Entry>,
}

impl TestSuite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the tests of one file. Tests in different files never share a work unit.
    #[track_caller]
    pub fn file(&mut self, path: impl Into<String>, declare: impl FnOnce(&mut TestSuite)) -> &mut Self {
        let path = path.into();
        let mut child = TestSuite {
            title: path.clone(),
            file: Some(path),
            location: Some(Location::caller()),
            ..TestSuite::default()
        };
        declare(&mut child);
        self.push_suite(child);
        self
    }

    /// Group tests under a title.
    #[track_caller]
    pub fn describe(&mut self, title: impl Into<String>, declare: impl FnOnce(&mut TestSuite)) -> &mut Self {
        let title = title.into();
        let mut path = self.path.clone();
        path.push(title.clone());
        let mut child = TestSuite {
            title,
            file: self.file.clone(),
            location: Some(Location::caller()),
            path,
            ..TestSuite::default()
        };
        declare(&mut child);
        self.push_suite(child);
        self
    }

    /// Declare a test bound to `registry`.
    #[track_caller]
    pub fn test<F, Fut>(
        &mut self,
        title: impl Into<String>,
        registry: &Registry,
        signature: impl IntoParams,
        body: F,
    ) -> &mut TestCase
    where
        F: Fn(FixtureArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = miette::Result<()>> + Send + 'static,
    {
        let location = Location::caller();
        let file = self.file.clone().unwrap_or_else(|| location.file.clone());
        let body: TestBody = Arc::new(move |args: FixtureArgs| -> BoxFuture<'static, miette::Result<()>> {
            Box::pin(body(args))
        });
        let index = self.tests.len();
        self.order.push(Entry::Test(index));
        self.tests.push(TestCase {
            id: 0,
            title: title.into(),
            path: self.path.clone(),
            file,
            location,
            registry: registry.clone(),
            params: signature.into_params(),
            body,
            markers: Vec::new(),
        });
        &mut self.tests[index]
    }

    fn push_suite(&mut self, child: TestSuite) {
        self.order.push(Entry::Suite(self.suites.len()));
        self.suites.push(child);
    }

    /// Assign ids in declaration order and return how many tests there are.
    pub(crate) fn number(&mut self) -> usize {
        let mut next = 0;
        self.number_from(&mut next);
        next
    }

    fn number_from(&mut self, next: &mut usize) {
        for entry in self.order.clone() {
            match entry {
                Entry::Suite(index) => self.suites[index].number_from(next),
                Entry::Test(index) => {
                    self.tests[index].id = *next;
                    *next += 1;
                }
            }
        }
    }

    /// All tests, depth first, in the order ids were assigned.
    pub fn all_tests(&self) -> Vec<&TestCase> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a TestCase>) {
        for entry in &self.order {
            match *entry {
                Entry::Suite(index) => self.suites[index].collect(out),
                Entry::Test(index) => out.push(&self.tests[index]),
            }
        }
    }
}
