//! Run-level errors: problems that are not the failure of a single test body.
//!
//! Static problems (bad signatures, unknown fixtures, cycles, scope mismatches, union conflicts,
//! redefined built-ins) exclude the whole file they were found in. Runtime problems (malformed factories, teardown
//! errors, crashed workers) are reported alongside the affected test results.

use std::fmt;

use miette::Diagnostic;
use tessera_core::{Location, Scope, errors::unknown_parameter};
use tessera_syntax::ExtractError;
use thiserror::Error;

/// Who asked for a fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    Test,
    Fixture(String),
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requester::Test => f.write_str("Test"),
            Requester::Fixture(name) => write!(f, "Fixture \"{name}\""),
        }
    }
}

#[derive(Debug, Clone, Error, Diagnostic)]
pub enum RunError {
    #[error("{error}")]
    #[diagnostic(code(tessera::signature))]
    Signature {
        requester: Requester,
        error: ExtractError,
        location: Location,
    },

    #[error("{}", unknown_parameter(&requester.to_string(), name))]
    #[diagnostic(code(tessera::unknown_fixture))]
    UnknownFixture {
        requester: Requester,
        name: String,
        location: Location,
    },

    #[error("Fixtures form a dependency cycle: {}", cycle.join(" -> "))]
    #[diagnostic(code(tessera::cycle))]
    CyclicDependency { cycle: Vec<String>, location: Location },

    #[error("Worker fixture \"{fixture}\" cannot depend on test fixture \"{dependency}\".")]
    #[diagnostic(code(tessera::scope_mismatch))]
    ScopeMismatch {
        fixture: String,
        dependency: String,
        location: Location,
    },

    #[error("Fixture \"{name}\" is defined differently by both registries of a union.")]
    #[diagnostic(code(tessera::union_conflict), help("rename one of the fixtures or drop the union"))]
    UnionConflict { name: String, location: Location },

    #[error("Fixture \"{name}\" is built in and cannot be redefined.")]
    #[diagnostic(code(tessera::reserved_name), help("pick another name for the fixture"))]
    ReservedName { name: String, location: Location },

    #[error("Fixture \"{name}\" finished without providing a value.")]
    #[diagnostic(code(tessera::malformed_factory), help("call `provide` exactly once"))]
    MalformedFactory {
        name: String,
        scope: Scope,
        location: Location,
    },

    #[error("Error while tearing down {scope} fixture \"{name}\": {message}")]
    #[diagnostic(code(tessera::teardown))]
    Teardown {
        name: String,
        scope: Scope,
        message: String,
        location: Location,
    },

    #[error("Worker #{worker_index} exited unexpectedly: {message}")]
    #[diagnostic(code(tessera::worker_crashed))]
    WorkerCrashed { worker_index: usize, message: String },
}

impl RunError {
    /// Declaration the error points at.
    pub fn location(&self) -> Option<&Location> {
        match self {
            RunError::Signature { location, .. }
            | RunError::UnknownFixture { location, .. }
            | RunError::CyclicDependency { location, .. }
            | RunError::ScopeMismatch { location, .. }
            | RunError::UnionConflict { location, .. }
            | RunError::ReservedName { location, .. }
            | RunError::MalformedFactory { location, .. }
            | RunError::Teardown { location, .. } => Some(location),
            RunError::WorkerCrashed { .. } => None,
        }
    }

    /// Whether the error was found before anything ran.
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            RunError::Signature { .. }
                | RunError::UnknownFixture { .. }
                | RunError::CyclicDependency { .. }
                | RunError::ScopeMismatch { .. }
                | RunError::UnionConflict { .. }
                | RunError::ReservedName { .. }
        )
    }

    /// Message followed by an `at file:line:column` frame.
    pub fn stack(&self) -> String {
        match self.location() {
            Some(location) => format!("{self}\n    at {location}"),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn here() -> Location {
        Location::new("tests/fixtures.rs", 12, 9)
    }

    #[test]
    fn unknown_fixture_messages() {
        let test = RunError::UnknownFixture {
            requester: Requester::Test,
            name: "asdf".into(),
            location: here(),
        };
        assert_eq!(test.to_string(), "Test has unknown parameter \"asdf\".");
        let fixture = RunError::UnknownFixture {
            requester: Requester::Fixture("conn".into()),
            name: "db".into(),
            location: here(),
        };
        assert_eq!(fixture.to_string(), "Fixture \"conn\" has unknown parameter \"db\".");
    }

    #[test]
    fn signature_error_keeps_extractor_message() {
        let error = tessera_syntax::extract_params("function (abc) {}").unwrap_err();
        let run = RunError::Signature {
            requester: Requester::Test,
            error,
            location: here(),
        };
        assert_eq!(
            run.stack(),
            "First argument must use the object destructuring pattern: abc\n    at tests/fixtures.rs:12:9"
        );
        assert!(run.is_static());
    }

    #[test]
    fn cycle_lists_the_path() {
        let err = RunError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
            location: here(),
        };
        assert_eq!(err.to_string(), "Fixtures form a dependency cycle: a -> b -> a");
    }

    #[test]
    fn crashed_worker_has_no_frame() {
        let err = RunError::WorkerCrashed {
            worker_index: 3,
            message: "thread panicked".into(),
        };
        assert_eq!(err.stack(), "Worker #3 exited unexpectedly: thread panicked");
        assert!(!err.is_static());
    }

    #[test]
    fn lifecycle_error_messages() {
        let mismatch = RunError::ScopeMismatch {
            fixture: "browser".into(),
            dependency: "page".into(),
            location: here(),
        };
        insta::assert_snapshot!(mismatch.to_string(), @r#"Worker fixture "browser" cannot depend on test fixture "page"."#);

        let teardown = RunError::Teardown {
            name: "db".into(),
            scope: Scope::Worker,
            message: "connection reset".into(),
            location: here(),
        };
        insta::assert_snapshot!(teardown.to_string(), @r#"Error while tearing down worker fixture "db": connection reset"#);
    }
}
