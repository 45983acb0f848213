//! Dispatching work units to workers.
//!
//! ## Policy
//! For each pending unit, in order of preference:
//! 1. an idle worker whose fingerprint matches the unit,
//! 2. a new worker, while fewer than `max_workers` are alive,
//! 3. retire an idle worker with another fingerprint, then start a new one,
//! 4. otherwise wait for a busy worker to finish.
//!
//! Worker indexes are assigned in start order from 0. A worker that retires after a timeout hands
//! its unfinished jobs back; they are queued first and picked up by a fresh worker.

use std::collections::VecDeque;

use tokio::task::JoinSet;

use super::{UnitReport, WorkUnit, WorkerHandle, WorkerOptions};
use crate::errors::RunError;
use crate::fixtures::Fingerprint;
use crate::results::{TestError, TestResult, TestStatus};

/// Progress reported while dispatching.
#[derive(Debug)]
pub enum DispatchEvent<'a> {
    Finished { test_id: usize, result: &'a TestResult },
    Error(&'a RunError),
}

struct Done {
    worker: WorkerHandle,
    file: String,
    fingerprint: Fingerprint,
    /// `(test id, first retry)` of every job in the unit.
    jobs: Vec<(usize, usize)>,
    report: Result<UnitReport, RunError>,
}

pub struct Dispatcher {
    options: WorkerOptions,
    max_workers: usize,
    next_index: usize,
    idle: Vec<WorkerHandle>,
}

impl Dispatcher {
    pub fn new(max_workers: usize, options: WorkerOptions) -> Self {
        Self {
            options,
            max_workers: max_workers.max(1),
            next_index: 0,
            idle: Vec::new(),
        }
    }

    /// Run every unit, then shut all workers down.
    #[tracing::instrument(skip_all, fields(units = units.len(), max_workers = self.max_workers))]
    pub async fn dispatch(mut self, units: Vec<WorkUnit>, mut on_event: impl FnMut(DispatchEvent<'_>)) {
        let mut pending: VecDeque<WorkUnit> = units.into_iter().collect();
        let mut busy: JoinSet<Done> = JoinSet::new();

        loop {
            self.assign(&mut pending, &mut busy, &mut on_event).await;
            let Some(joined) = busy.join_next().await else {
                break;
            };
            match joined {
                Ok(done) => self.finish(done, &mut pending, &mut on_event).await,
                Err(error) => tracing::error!(%error, "work unit task failed"),
            }
        }

        for worker in std::mem::take(&mut self.idle) {
            for error in worker.shutdown().await {
                on_event(DispatchEvent::Error(&error));
            }
        }
    }

    async fn assign(
        &mut self,
        pending: &mut VecDeque<WorkUnit>,
        busy: &mut JoinSet<Done>,
        on_event: &mut impl FnMut(DispatchEvent<'_>),
    ) {
        while !pending.is_empty() {
            if let Some((unit_at, worker_at)) = self.find_match(pending) {
                let worker = self.idle.remove(worker_at);
                if let Some(unit) = pending.remove(unit_at) {
                    start(busy, worker, unit);
                }
                continue;
            }

            if self.idle.len() + busy.len() < self.max_workers {
                let Some(unit) = pending.pop_front() else {
                    break;
                };
                let index = self.next_index;
                self.next_index += 1;
                match WorkerHandle::spawn(index, unit.fingerprint.clone(), self.options.clone()) {
                    Ok(worker) => start(busy, worker, unit),
                    Err(error) => {
                        let crash = RunError::WorkerCrashed {
                            worker_index: index,
                            message: format!("could not start: {error}"),
                        };
                        let jobs: Vec<_> = unit.jobs.iter().map(|j| (j.case.id(), j.first_retry)).collect();
                        fail_jobs(&crash, index, &jobs, on_event);
                    }
                }
                continue;
            }

            if !self.idle.is_empty() {
                let worker = self.idle.remove(0);
                tracing::debug!(worker = worker.index(), "retiring idle worker for another registry");
                for error in worker.shutdown().await {
                    on_event(DispatchEvent::Error(&error));
                }
                continue;
            }

            break;
        }
    }

    fn find_match(&self, pending: &VecDeque<WorkUnit>) -> Option<(usize, usize)> {
        pending.iter().enumerate().find_map(|(unit_at, unit)| {
            self.idle
                .iter()
                .position(|worker| worker.fingerprint() == &unit.fingerprint)
                .map(|worker_at| (unit_at, worker_at))
        })
    }

    async fn finish(
        &mut self,
        done: Done,
        pending: &mut VecDeque<WorkUnit>,
        on_event: &mut impl FnMut(DispatchEvent<'_>),
    ) {
        let Done {
            worker,
            file,
            fingerprint,
            jobs,
            report,
        } = done;

        match report {
            Ok(report) => {
                for outcome in &report.outcomes {
                    on_event(DispatchEvent::Finished {
                        test_id: outcome.test_id,
                        result: &outcome.result,
                    });
                    for error in &outcome.errors {
                        on_event(DispatchEvent::Error(error));
                    }
                }
                if !report.remaining.is_empty() {
                    pending.push_front(WorkUnit {
                        file,
                        fingerprint,
                        jobs: report.remaining,
                    });
                }
                if report.retired {
                    worker.join().await;
                } else {
                    self.idle.push(worker);
                }
            }
            Err(crash) => {
                tracing::error!(worker = worker.index(), %crash, "worker crashed");
                fail_jobs(&crash, worker.index(), &jobs, on_event);
                worker.join().await;
            }
        }
    }
}

fn start(busy: &mut JoinSet<Done>, worker: WorkerHandle, unit: WorkUnit) {
    tracing::debug!(worker = worker.index(), file = %unit.file, tests = unit.jobs.len(), "assign");
    let file = unit.file.clone();
    let fingerprint = unit.fingerprint.clone();
    let jobs = unit.jobs.iter().map(|j| (j.case.id(), j.first_retry)).collect();
    busy.spawn(async move {
        let report = worker.run(unit).await;
        Done {
            worker,
            file,
            fingerprint,
            jobs,
            report,
        }
    });
}

fn fail_jobs(
    crash: &RunError,
    worker_index: usize,
    jobs: &[(usize, usize)],
    on_event: &mut impl FnMut(DispatchEvent<'_>),
) {
    on_event(DispatchEvent::Error(crash));
    for (test_id, retry) in jobs {
        let mut result = TestResult::new(worker_index, *retry, TestStatus::Failed);
        result.error = Some(TestError::from_run_error(crash));
        on_event(DispatchEvent::Finished {
            test_id: *test_id,
            result: &result,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Fixtures, Registry, WorkerInfo};
    use crate::lifecycle::TestJob;
    use crate::resolve::resolve;
    use crate::suite::TestSuite;
    use std::collections::{BTreeMap, HashMap};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    fn options() -> WorkerOptions {
        WorkerOptions {
            params: Arc::new(BTreeMap::new()),
            teardown_timeout: Duration::from_secs(1),
            output_dir: PathBuf::from("test-results"),
            retries: 0,
        }
    }

    /// One unit per registry, each with a single test reporting its worker index.
    fn units(registries: &[(&str, Registry)]) -> Vec<WorkUnit> {
        let mut suite = TestSuite::new();
        for (file, registry) in registries {
            suite.file(*file, |f| {
                f.test("t", registry, "({ worker_info })", |args| async move {
                    args.get::<WorkerInfo>("worker_info")?;
                    Ok(())
                });
            });
        }
        suite.number();
        suite
            .all_tests()
            .into_iter()
            .map(|case| {
                let requests = case.params.clone().unwrap();
                let plan = resolve(&requests, &case.registry, true, &case.location).unwrap();
                WorkUnit {
                    file: case.file.clone(),
                    fingerprint: case.registry.fingerprint().clone(),
                    jobs: vec![TestJob {
                        case: Arc::new(case.clone()),
                        requests,
                        plan,
                        timeout: Duration::from_secs(1),
                        first_retry: 0,
                    }],
                }
            })
            .collect()
    }

    async fn worker_indexes(max_workers: usize, units: Vec<WorkUnit>) -> HashMap<usize, usize> {
        let mut seen = HashMap::new();
        Dispatcher::new(max_workers, options())
            .dispatch(units, |event| {
                if let DispatchEvent::Finished { test_id, result } = event {
                    assert_eq!(result.status, TestStatus::Passed);
                    seen.insert(test_id, result.worker_index);
                }
            })
            .await;
        seen
    }

    fn registry(name: &str) -> Registry {
        Registry::base().define_test_fixtures(Fixtures::new().value(name, "()", |_| async { Ok(()) }))
    }

    #[tokio::test]
    async fn same_fingerprint_reuses_the_worker() {
        let shared = registry("a");
        let seen = worker_indexes(1, units(&[("one", shared.clone()), ("two", shared)])).await;
        assert_eq!(seen[&0], 0);
        assert_eq!(seen[&1], 0);
    }

    #[tokio::test]
    async fn different_fingerprint_retires_at_capacity() {
        let seen = worker_indexes(1, units(&[("one", registry("a")), ("two", registry("b"))])).await;
        assert_eq!(seen[&0], 0);
        assert_eq!(seen[&1], 1);
    }

    #[tokio::test]
    async fn spare_capacity_starts_new_workers() {
        let seen = worker_indexes(4, units(&[("one", registry("a")), ("two", registry("b"))])).await;
        let mut indexes: Vec<_> = seen.values().copied().collect();
        indexes.sort_unstable();
        assert_eq!(indexes, vec![0, 1]);
    }
}
