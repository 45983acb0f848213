//! Command-line harness for tessera suites.
//!
//! A suite is an ordinary Rust test target with `harness = false` whose `main` declares the tests
//! and hands control to [`run`]:
//!
//! ```rust,no_run
//! use tessera::{Registry, TestSuite};
//!
//! fn main() {
//!     tessera::cli::run(|suite: &mut TestSuite| {
//!         let registry = Registry::base();
//!         suite.file("smoke.spec", |f| {
//!             f.test("boots", &registry, "()", |_| async { Ok(()) });
//!         });
//!     });
//! }
//! ```
//!
//! ## Design
//!
//! Flags are parsed with clap derive; the worker count and timeout can also come from
//! `TESSERA_WORKERS` / `TESSERA_TIMEOUT`. [`execute`] returns `CliResult<T>` instead of calling
//! `process::exit`. Only the top-level [`run`] function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::fmt;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;

use crate::config::{ReporterKind, RunConfig, parse_param};
use crate::reporters;
use crate::runner::Runner;
use crate::suite::TestSuite;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations: a user-facing message and an exit code.
#[derive(Debug)]
pub struct CliError {
    /// Already formatted for display; empty when the reporter has said everything.
    pub message: String,
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub type CliResult<T> = Result<T, CliError>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Run a tessera test suite
#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(version = VERSION)]
#[command(about = "Run a tessera test suite", long_about = None)]
pub struct Cli {
    /// Maximum number of concurrent workers
    #[arg(short = 'j', long, env = "TESSERA_WORKERS")]
    pub workers: Option<usize>,

    /// Per-test timeout in milliseconds, covering fixture setup and the body
    #[arg(long, env = "TESSERA_TIMEOUT", value_name = "MS")]
    pub timeout: Option<u64>,

    /// Per-fixture teardown timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub teardown_timeout: Option<u64>,

    /// Retry tests with an unexpected outcome up to N times
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub retries: usize,

    /// Set a parameter declared with `define_parameter` (repeatable)
    #[arg(short = 'p', long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Only run tests whose title contains this text
    #[arg(short = 'g', long)]
    pub grep: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = ReporterKind::List)]
    pub reporter: ReporterKind,

    /// Directory for per-test artifacts
    #[arg(long = "output", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Print one line per test
    #[arg(short, long)]
    pub verbose: bool,

    /// Title filter as forwarded by `cargo test <FILTER>`; same as --grep
    #[arg(value_name = "FILTER", conflicts_with = "grep")]
    pub filter: Option<String>,
}

impl Cli {
    pub fn into_config(self) -> RunConfig {
        let mut config = RunConfig::default();
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(ms) = self.timeout {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.teardown_timeout {
            config = config.with_teardown_timeout(Duration::from_millis(ms));
        }
        if let Some(dir) = self.output_dir {
            config = config.with_output_dir(dir);
        }
        config.retries = self.retries;
        config.params.extend(self.params);
        config.grep = self.grep.or(self.filter);
        config.reporter = self.reporter;
        config.verbose = self.verbose;
        config
    }
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Initialize structured logging on stderr with an env-based filter, defaulting to
/// [`DEFAULT_LOG_FILTER`].
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .try_init();
}

/// Main harness entry point.
///
/// This is the only place where `process::exit` is called.
pub fn run(collect: impl FnOnce(&mut TestSuite)) {
    init_tracing();
    let cli = Cli::parse();

    match execute(cli, collect) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Collect the suite, run it on a fresh runtime and map the outcome to an exit code.
///
/// ## Errors
/// When the runtime cannot start, or the run did not meet every expectation (empty message:
/// the reporter has already printed the details).
pub fn execute(cli: Cli, collect: impl FnOnce(&mut TestSuite)) -> CliResult<ExitCode> {
    let config = cli.into_config();
    let mut suite = TestSuite::new();
    collect(&mut suite);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::failure(format!("failed to start the async runtime: {e}")))?;
    let reporter = reporters::for_kind(config.reporter, config.verbose);
    let mut runner = Runner::new(config).with_boxed_reporter(reporter);
    let summary = runtime.block_on(runner.run(suite));

    if summary.ok() {
        Ok(ExitCode::SUCCESS)
    } else {
        Err(CliError::new("", ExitCode::FAILURE))
    }
}
