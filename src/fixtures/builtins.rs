//! Values of the built-in `test_info` and `worker_info` fixtures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use tessera_core::Location;

use super::registry::Fingerprint;
use crate::results::StdioEntry;

/// Describes the test run a `test_info` value belongs to.
#[derive(Debug)]
pub struct TestInfo {
    pub title: String,
    pub file: String,
    pub location: Location,
    pub retry: usize,
    pub worker_index: usize,
    pub timeout: Duration,
    output_dir: PathBuf,
    stdout: Mutex<Vec<StdioEntry>>,
    stderr: Mutex<Vec<StdioEntry>>,
}

impl TestInfo {
    pub(crate) fn new(
        title: impl Into<String>,
        file: impl Into<String>,
        location: Location,
        retry: usize,
        worker_index: usize,
        timeout: Duration,
        output_root: &Path,
    ) -> Self {
        let title = title.into();
        let file = file.into();
        let output_dir = output_root.join(output_segment(&file, &title, retry));
        Self {
            title,
            file,
            location,
            retry,
            worker_index,
            timeout,
            output_dir,
            stdout: Mutex::new(Vec::new()),
            stderr: Mutex::new(Vec::new()),
        }
    }

    /// Directory reserved for this run's artifacts.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of an artifact inside [`TestInfo::output_dir`]. Nothing is created on disk.
    pub fn output_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.output_dir.join(relative)
    }

    /// Record text on the run's stdout.
    pub fn print(&self, text: impl Into<String>) {
        self.stdout.lock().push(StdioEntry::Text(text.into()));
    }

    /// Record text on the run's stderr.
    pub fn eprint(&self, text: impl Into<String>) {
        self.stderr.lock().push(StdioEntry::Text(text.into()));
    }

    /// Record raw bytes on the run's stdout.
    pub fn write_stdout(&self, bytes: impl Into<Vec<u8>>) {
        self.stdout.lock().push(StdioEntry::Buffer(bytes.into()));
    }

    /// Record raw bytes on the run's stderr.
    pub fn write_stderr(&self, bytes: impl Into<Vec<u8>>) {
        self.stderr.lock().push(StdioEntry::Buffer(bytes.into()));
    }

    pub(crate) fn take_stdio(&self) -> (Vec<StdioEntry>, Vec<StdioEntry>) {
        (
            std::mem::take(&mut *self.stdout.lock()),
            std::mem::take(&mut *self.stderr.lock()),
        )
    }
}

/// Describes the worker a `worker_info` value belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub worker_index: usize,
    pub fingerprint: Fingerprint,
}

fn output_segment(file: &str, title: &str, retry: usize) -> String {
    let stem = Path::new(file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file);
    let mut segment = sanitize(&format!("{stem}-{title}"));
    if retry > 0 {
        segment.push_str(&format!("-retry{retry}"));
    }
    segment
}

fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}
