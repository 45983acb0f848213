//! Workers: isolated executors that run work units one test at a time.
//!
//! Each worker is an OS thread driving its own single-threaded tokio runtime. It owns a
//! [`LifecycleManager`], so worker-scoped fixtures live exactly as long as the worker. The
//! dispatcher talks to it through [`WorkerHandle`] messages.

pub mod scheduler;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::errors::RunError;
use crate::fixtures::{Fingerprint, WorkerInfo};
use crate::lifecycle::{LifecycleManager, RunOutcome, TestJob};
use crate::results::TestStatus;

pub use scheduler::{DispatchEvent, Dispatcher};

/// Tests of one file bound to registries with one fingerprint, in declaration order.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub file: String,
    pub fingerprint: Fingerprint,
    pub jobs: Vec<TestJob>,
}

/// What a worker sends back after a unit.
#[derive(Debug)]
pub struct UnitReport {
    pub outcomes: Vec<RunOutcome>,
    /// Jobs left over when the worker retired mid-unit.
    pub remaining: Vec<TestJob>,
    pub retired: bool,
}

/// Settings every worker shares.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub params: Arc<BTreeMap<String, String>>,
    pub teardown_timeout: Duration,
    pub output_dir: PathBuf,
    pub retries: usize,
}

enum Message {
    Run {
        unit: WorkUnit,
        reply: oneshot::Sender<UnitReport>,
    },
    Shutdown {
        reply: oneshot::Sender<Vec<RunError>>,
    },
}

/// Dispatcher side of a worker.
#[derive(Debug)]
pub struct WorkerHandle {
    index: usize,
    fingerprint: Fingerprint,
    tx: mpsc::UnboundedSender<Message>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Start a worker thread.
    ///
    /// ## Errors
    /// When the OS refuses to create the thread.
    pub fn spawn(index: usize, fingerprint: Fingerprint, options: WorkerOptions) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let info = WorkerInfo {
            worker_index: index,
            fingerprint: fingerprint.clone(),
        };
        let thread = thread::Builder::new()
            .name(format!("tessera-worker-{index}"))
            .spawn(move || worker_main(info, options, rx))?;
        tracing::debug!(worker = index, %fingerprint, "worker started");
        Ok(Self {
            index,
            fingerprint,
            tx,
            thread: Some(thread),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Run `unit` and wait for its report.
    ///
    /// ## Errors
    /// [`RunError::WorkerCrashed`] when the worker stopped before replying.
    pub async fn run(&self, unit: WorkUnit) -> Result<UnitReport, RunError> {
        let file = unit.file.clone();
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Message::Run { unit, reply })
            .map_err(|_| self.crashed(format!("not accepting work for {file}")))?;
        response
            .await
            .map_err(|_| self.crashed(format!("stopped while running {file}")))
    }

    /// Tear down the worker's fixtures and stop the thread.
    pub async fn shutdown(self) -> Vec<RunError> {
        let (reply, response) = oneshot::channel();
        let errors = if self.tx.send(Message::Shutdown { reply }).is_ok() {
            response
                .await
                .unwrap_or_else(|_| vec![self.crashed("stopped during shutdown".to_string())])
        } else {
            vec![self.crashed("stopped before shutdown".to_string())]
        };
        self.join().await;
        errors
    }

    /// Wait for the thread to exit.
    pub async fn join(mut self) {
        let index = self.index;
        if let Some(thread) = self.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => tracing::debug!(worker = index, "worker stopped"),
                Ok(Err(_)) => tracing::error!(worker = index, "worker thread panicked"),
                Err(error) => tracing::error!(worker = index, %error, "could not join worker thread"),
            }
        }
    }

    fn crashed(&self, message: String) -> RunError {
        RunError::WorkerCrashed {
            worker_index: self.index,
            message,
        }
    }
}

fn worker_main(info: WorkerInfo, options: WorkerOptions, mut rx: mpsc::UnboundedReceiver<Message>) {
    let index = info.worker_index;
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(worker = index, %error, "failed to start worker runtime");
            return;
        }
    };

    let span = tracing::info_span!("worker", index);
    runtime.block_on(
        async move {
            let mut manager = LifecycleManager::new(
                info,
                options.params.clone(),
                options.teardown_timeout,
                options.output_dir.clone(),
            );
            while let Some(message) = rx.recv().await {
                match message {
                    Message::Run { unit, reply } => {
                        let report = run_unit(&mut manager, unit, options.retries).await;
                        let retired = report.retired;
                        let _ = reply.send(report);
                        if retired {
                            break;
                        }
                    }
                    Message::Shutdown { reply } => {
                        let _ = reply.send(manager.shutdown().await);
                        break;
                    }
                }
            }
            for error in manager.shutdown().await {
                tracing::warn!(%error, "teardown failed after the dispatcher went away");
            }
        }
        .instrument(span),
    );
}

/// Run the jobs of `unit` in order, retrying unexpected outcomes up to `retries` times.
pub(crate) async fn run_unit(manager: &mut LifecycleManager, unit: WorkUnit, retries: usize) -> UnitReport {
    let mut outcomes = Vec::new();
    let mut jobs = unit.jobs.into_iter();

    while let Some(job) = jobs.next() {
        let expected = job.expected_status();
        let mut retry = job.first_retry;
        loop {
            let outcome = manager.run_test(&job, retry).await;
            let status = outcome.result.status;
            let retired = outcome.retire_worker;
            outcomes.push(outcome);

            let wants_retry = status != expected && status != TestStatus::Skipped && retry < retries;
            if retired {
                let mut remaining = Vec::new();
                if wants_retry {
                    remaining.push(TestJob {
                        first_retry: retry + 1,
                        ..job
                    });
                }
                remaining.extend(jobs);
                return UnitReport {
                    outcomes,
                    remaining,
                    retired: true,
                };
            }
            if !wants_retry {
                break;
            }
            retry += 1;
        }
    }

    UnitReport {
        outcomes,
        remaining: Vec::new(),
        retired: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Fixtures, Registry};
    use crate::resolve::resolve;
    use crate::suite::{TestCase, TestSuite};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn options(retries: usize) -> WorkerOptions {
        WorkerOptions {
            params: Arc::new(BTreeMap::new()),
            teardown_timeout: Duration::from_secs(1),
            output_dir: PathBuf::from("test-results"),
            retries,
        }
    }

    fn unit_of(cases: &[TestCase], timeout: Duration) -> WorkUnit {
        let jobs = cases
            .iter()
            .map(|case| {
                let requests = case.params.clone().unwrap();
                let plan = resolve(&requests, &case.registry, true, &case.location).unwrap();
                TestJob {
                    case: Arc::new(case.clone()),
                    requests,
                    plan,
                    timeout,
                    first_retry: 0,
                }
            })
            .collect();
        WorkUnit {
            file: "unit.spec".into(),
            fingerprint: cases[0].registry.fingerprint().clone(),
            jobs,
        }
    }

    #[tokio::test]
    async fn failing_test_is_retried_until_it_passes() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let mut suite = TestSuite::new();
        let case = suite
            .test("flaky", &Registry::base(), "()", move |_| {
                let seen = seen.clone();
                async move {
                    if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                        return Err(miette::miette!("not yet"));
                    }
                    Ok(())
                }
            })
            .clone();
        let worker = WorkerHandle::spawn(0, case.registry.fingerprint().clone(), options(3)).unwrap();
        let report = worker.run(unit_of(&[case], Duration::from_secs(1))).await.unwrap();
        let statuses: Vec<_> = report.outcomes.iter().map(|o| (o.result.retry, o.result.status)).collect();
        assert_eq!(
            statuses,
            vec![(0, TestStatus::Failed), (1, TestStatus::Failed), (2, TestStatus::Passed)]
        );
        assert!(worker.shutdown().await.is_empty());
    }

    #[tokio::test]
    async fn timeout_returns_the_rest_of_the_unit() {
        let registry = Registry::base().define_worker_fixtures(Fixtures::new().value("w", "()", |_| async { Ok(1_u8) }));
        let mut suite = TestSuite::new();
        let hang = suite
            .test("hang", &registry, "({ w })", |_| async {
                futures::future::pending::<()>().await;
                Ok(())
            })
            .clone();
        let after = suite.test("after", &registry, "()", |_| async { Ok(()) }).clone();
        let worker = WorkerHandle::spawn(4, registry.fingerprint().clone(), options(0)).unwrap();
        let report = worker.run(unit_of(&[hang, after], Duration::from_millis(50))).await.unwrap();
        assert!(report.retired);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].result.status, TestStatus::TimedOut);
        assert_eq!(report.outcomes[0].result.worker_index, 4);
        assert_eq!(report.remaining.len(), 1);
        assert_eq!(report.remaining[0].case.title, "after");
        worker.join().await;
    }

    #[tokio::test]
    async fn expected_failure_is_not_retried() {
        let mut suite = TestSuite::new();
        let case = suite
            .test("known", &Registry::base(), "()", |_| async { Err::<(), _>(miette::miette!("broken")) })
            .fail("tracked upstream")
            .clone();
        let worker = WorkerHandle::spawn(0, case.registry.fingerprint().clone(), options(2)).unwrap();
        let report = worker.run(unit_of(&[case], Duration::from_secs(1))).await.unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].result.status, TestStatus::Failed);
        worker.shutdown().await;
    }
}
