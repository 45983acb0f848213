//! Shared, pure vocabulary for the tessera fixture engine.
//!
//! This crate is intentionally small and dependency-free. It holds the pieces that both the
//! signature frontend (`tessera_syntax`) and the engine (`tessera`) must agree on:
//! - fixture scopes and source locations,
//! - naming conventions for built-in and automatic fixtures,
//! - shared user-facing error messages,
//! - the keyword/punctuation vocabulary accepted in fixture signatures.
//!
//! ## Notes
//!
//! - This is a "vocabulary" crate: **no IO**, no global state, no engine types.

pub mod conventions;
pub mod errors;
pub mod lang;

use std::fmt;

/// Lifetime class of a fixture instance.
///
/// `Test` instances are created afresh for every test run and torn down when it concludes.
/// `Worker` instances are created at most once per worker and torn down when the worker retires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Test,
    Worker,
}

impl Scope {
    /// Lower-case spelling used in logs and reports.
    pub const fn as_str(self) -> &'static str {
        match self {
            Scope::Test => "test",
            Scope::Worker => "worker",
        }
    }

    /// Capitalized spelling used at the start of diagnostics.
    pub const fn title(self) -> &'static str {
        match self {
            Scope::Test => "Test",
            Scope::Worker => "Worker",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A position in Rust source where a test or fixture was declared.
///
/// Declarations capture this with `#[track_caller]`, so the location points at user code rather
/// than at the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// Location of the caller of the enclosing `#[track_caller]` function.
    #[track_caller]
    pub fn caller() -> Self {
        Self::from(std::panic::Location::caller())
    }
}

impl From<&std::panic::Location<'_>> for Location {
    fn from(loc: &std::panic::Location<'_>) -> Self {
        Self::new(loc.file(), loc.line(), loc.column())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}
