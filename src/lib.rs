#![forbid(unsafe_code)]
//! tessera: a fixture-driven test engine.
//!
//! Tests declare the fixtures they need through an object-destructuring signature
//! (`async ({ page, server: srv })`). A [`Registry`] maps fixture names to factories with a scope:
//! `test` fixtures live for one test run, `worker` fixtures live as long as the worker that created
//! them. The engine resolves each test's transitive dependencies, creates instances in dependency
//! order, tears them down in reverse, and runs tests on workers grouped by registry fingerprint.
//!
//! ## Crates
//!
//! - `tessera_core`: shared vocabulary (scopes, locations, conventions, messages).
//! - `tessera_syntax`: signature lexer/parser and parameter extraction.
//! - `tessera` (this crate): registries, resolution, lifecycle, workers, runner, reporters, CLI.
//!
//! ## Panic Policy
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` module
//!   enforces `#![deny(clippy::unwrap_used)]`.
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.
//! - **User code**: a panic inside a factory or test body fails that test; it never takes the run down.

pub mod cli;
pub mod config;
pub mod errors;
pub mod fixtures;
pub mod lifecycle;
pub mod reporters;
pub mod resolve;
pub mod results;
pub mod runner;
pub mod suite;
pub mod worker;

pub use config::{ReporterKind, RunConfig};
pub use errors::{Requester, RunError};
pub use fixtures::{
    ArgError, FixtureArgs, FixtureDefinition, FixtureValue, Fixtures, Fingerprint, Registry, ReservedName, TestInfo, WorkerInfo,
    Yielder,
};
pub use reporters::{JsonReporter, ListReporter, Reporter};
pub use resolve::{ResolvedPlan, resolve};
pub use results::{StdioEntry, TestError, TestResult, TestStatus};
pub use runner::{RunSummary, Runner};
pub use suite::{TestCase, TestMarker, TestSuite};
pub use tessera_core::{Location, Scope};
pub use tessera_syntax::{ExtractError, ParamRequest, Params, extract_params};
