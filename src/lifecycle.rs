//! Fixture lifecycle: creating instances for a plan, running the body, tearing down.
//!
//! ## Model
//! - A [`FixturePool`] owns the instances of one owner: a worker, or a single test run.
//! - An instance moves `Uncreated -> Created -> TornDown` and never back.
//! - A factory runs as its own task. Its value arrives over a channel; resuming the factory after
//!   the owner finishes runs its teardown.
//! - Each test run has one deadline covering fixture setup and the body. When it passes, the run is
//!   `timedOut`, its test fixtures are torn down, then the worker's fixtures, and the worker retires.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tessera_core::Scope;
use tessera_syntax::ParamRequest;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;

use crate::errors::RunError;
use crate::fixtures::factory::Provided;
use crate::fixtures::registry::FixtureBody;
use crate::fixtures::{FactoryFn, FixtureArgs, FixtureDefinition, FixtureValue, TestInfo, WorkerInfo, Yielder};
use crate::resolve::ResolvedPlan;
use crate::results::{TestError, TestResult, TestStatus};
use crate::suite::TestCase;

// ============================================================================
// Instances and pools
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Uncreated,
    Created,
    TornDown,
}

/// Who owns a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    Worker { worker_index: usize },
    TestRun { worker_index: usize, test: usize, retry: usize },
}

struct PendingTeardown {
    resume: oneshot::Sender<()>,
    task: JoinHandle<miette::Result<()>>,
}

pub struct FixtureInstance {
    definition: Arc<FixtureDefinition>,
    value: FixtureValue,
    state: InstanceState,
    teardown: Option<PendingTeardown>,
}

impl FixtureInstance {
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn scope(&self) -> Scope {
        self.definition.scope()
    }

    pub fn value(&self) -> &FixtureValue {
        &self.value
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }
}

/// Values provided to built-in definitions.
#[derive(Clone)]
pub(crate) struct Builtins {
    pub(crate) test_info: Option<Arc<TestInfo>>,
    pub(crate) worker_info: Arc<WorkerInfo>,
    pub(crate) params: Arc<BTreeMap<String, String>>,
}

/// Why setting up a fixture did not produce a value.
#[derive(Debug)]
pub(crate) enum SetupFailure {
    Failed(TestError),
    Malformed(RunError),
    TimedOut { fixture: String },
}

pub struct FixturePool {
    owner: Owner,
    instances: Vec<FixtureInstance>,
}

impl FixturePool {
    pub fn new(owner: Owner) -> Self {
        Self {
            owner,
            instances: Vec::new(),
        }
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    fn instance(&self, name: &str) -> Option<&FixtureInstance> {
        self.instances.iter().find(|i| i.name() == name)
    }

    /// Value of a live instance.
    pub fn get(&self, name: &str) -> Option<&FixtureValue> {
        self.instance(name)
            .filter(|i| i.state == InstanceState::Created)
            .map(|i| &i.value)
    }

    pub fn state(&self, name: &str) -> InstanceState {
        self.instance(name).map_or(InstanceState::Uncreated, |i| i.state)
    }

    /// Names of instances in creation order.
    pub fn created(&self) -> impl Iterator<Item = &str> {
        self.instances.iter().map(FixtureInstance::name)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub(crate) async fn create(
        &mut self,
        def: &Arc<FixtureDefinition>,
        args: FixtureArgs,
        builtins: &Builtins,
        deadline: Instant,
    ) -> Result<(), SetupFailure> {
        let value: FixtureValue = match &def.body {
            FixtureBody::TestInfo => match &builtins.test_info {
                Some(info) => info.clone(),
                None => {
                    return Err(SetupFailure::Failed(TestError::new(
                        "test_info is only available inside a test",
                    )));
                }
            },
            FixtureBody::WorkerInfo => builtins.worker_info.clone(),
            FixtureBody::Parameter { default, .. } => Arc::new(
                builtins
                    .params
                    .get(def.name())
                    .cloned()
                    .unwrap_or_else(|| default.clone()),
            ),
            FixtureBody::Factory(factory) => return self.spawn_factory(def, factory.clone(), args, deadline).await,
        };
        self.push(def, value, None);
        Ok(())
    }

    async fn spawn_factory(
        &mut self,
        def: &Arc<FixtureDefinition>,
        factory: FactoryFn,
        args: FixtureArgs,
        deadline: Instant,
    ) -> Result<(), SetupFailure> {
        let (yielder, provided): (Yielder, Provided) = Yielder::channel();
        let Provided {
            mut value_rx,
            resume_tx,
        } = provided;
        let mut task = tokio::spawn(factory(args, yielder));

        tokio::select! {
            received = &mut value_rx => match received {
                Ok(value) => {
                    tracing::debug!(fixture = def.name(), scope = %def.scope(), "created");
                    self.push(def, value, Some(PendingTeardown { resume: resume_tx, task }));
                    Ok(())
                }
                Err(_) => match tokio::time::timeout_at(deadline, &mut task).await {
                    Ok(Ok(Ok(()))) => Err(SetupFailure::Malformed(RunError::MalformedFactory {
                        name: def.name().to_string(),
                        scope: def.scope(),
                        location: def.location().clone(),
                    })),
                    Ok(Ok(Err(report))) => Err(SetupFailure::Failed(TestError::from_report(&report, def.location()))),
                    Ok(Err(join)) => Err(SetupFailure::Failed(TestError::with_location(
                        panic_message(join),
                        def.location(),
                    ))),
                    Err(_) => {
                        cancel(task).await;
                        Err(SetupFailure::TimedOut { fixture: def.name().to_string() })
                    }
                },
            },
            () = tokio::time::sleep_until(deadline) => {
                cancel(task).await;
                Err(SetupFailure::TimedOut { fixture: def.name().to_string() })
            }
        }
    }

    fn push(&mut self, def: &Arc<FixtureDefinition>, value: FixtureValue, teardown: Option<PendingTeardown>) {
        self.instances.push(FixtureInstance {
            definition: def.clone(),
            value,
            state: InstanceState::Created,
            teardown,
        });
    }

    /// Tear down every live instance in reverse creation order. Errors are collected, not fatal.
    pub async fn teardown_all(&mut self, limit: Duration) -> Vec<RunError> {
        let mut errors = Vec::new();
        for instance in self.instances.iter_mut().rev() {
            if instance.state != InstanceState::Created {
                continue;
            }
            if let Err(error) = teardown_instance(instance, limit).await {
                tracing::warn!(fixture = instance.name(), %error, "teardown failed");
                errors.push(error);
            }
            instance.state = InstanceState::TornDown;
        }
        errors
    }
}

async fn teardown_instance(instance: &mut FixtureInstance, limit: Duration) -> Result<(), RunError> {
    let Some(pending) = instance.teardown.take() else {
        return Ok(());
    };
    let _ = pending.resume.send(());
    let mut task = pending.task;
    let message = match tokio::time::timeout(limit, &mut task).await {
        Ok(Ok(Ok(()))) => {
            tracing::debug!(fixture = instance.name(), "torn down");
            return Ok(());
        }
        Ok(Ok(Err(report))) => report.to_string(),
        Ok(Err(join)) => panic_message(join),
        Err(_) => {
            cancel(task).await;
            format!("teardown did not finish within {}ms", limit.as_millis())
        }
    };
    Err(RunError::Teardown {
        name: instance.name().to_string(),
        scope: instance.scope(),
        message,
        location: instance.definition.location().clone(),
    })
}

async fn cancel<T>(task: JoinHandle<T>) {
    task.abort();
    let _ = task.await;
}

pub(crate) fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task was cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic with a non-string payload".to_string()),
        Err(_) => "task failed".to_string(),
    }
}

// ============================================================================
// Test runs
// ============================================================================

/// A test ready to run: its validated requests and resolved plan.
#[derive(Debug, Clone)]
pub struct TestJob {
    pub case: Arc<TestCase>,
    pub requests: Vec<ParamRequest>,
    pub plan: ResolvedPlan,
    pub timeout: Duration,
    /// Retry index of the first attempt; nonzero when re-queued after a worker retired.
    pub first_retry: usize,
}

impl TestJob {
    pub fn expected_status(&self) -> TestStatus {
        if self.case.expects_failure() {
            TestStatus::Failed
        } else {
            TestStatus::Passed
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub test_id: usize,
    pub result: TestResult,
    pub errors: Vec<RunError>,
    pub retire_worker: bool,
}

/// Per-worker driver: owns the worker pool and runs tests one at a time.
pub struct LifecycleManager {
    worker_info: Arc<WorkerInfo>,
    worker_pool: FixturePool,
    params: Arc<BTreeMap<String, String>>,
    teardown_timeout: Duration,
    output_dir: PathBuf,
    retired: bool,
}

impl LifecycleManager {
    pub fn new(
        worker_info: WorkerInfo,
        params: Arc<BTreeMap<String, String>>,
        teardown_timeout: Duration,
        output_dir: PathBuf,
    ) -> Self {
        let worker_index = worker_info.worker_index;
        Self {
            worker_info: Arc::new(worker_info),
            worker_pool: FixturePool::new(Owner::Worker { worker_index }),
            params,
            teardown_timeout,
            output_dir,
            retired: false,
        }
    }

    pub fn worker_index(&self) -> usize {
        self.worker_info.worker_index
    }

    pub fn worker_pool(&self) -> &FixturePool {
        &self.worker_pool
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Run one attempt of `job`.
    #[tracing::instrument(skip_all, fields(test = %job.case.full_title(), retry = retry, worker = self.worker_info.worker_index))]
    pub async fn run_test(&mut self, job: &TestJob, retry: usize) -> RunOutcome {
        let started = std::time::Instant::now();
        let worker_index = self.worker_index();
        let case = &job.case;

        if let Some(reason) = case.skip_reason() {
            tracing::debug!(reason, "skipped");
            return RunOutcome {
                test_id: case.id(),
                result: TestResult::new(worker_index, retry, TestStatus::Skipped),
                errors: Vec::new(),
                retire_worker: false,
            };
        }

        let info = Arc::new(TestInfo::new(
            case.full_title(),
            case.file.clone(),
            case.location.clone(),
            retry,
            worker_index,
            job.timeout,
            &self.output_dir,
        ));
        let builtins = Builtins {
            test_info: Some(info.clone()),
            worker_info: self.worker_info.clone(),
            params: self.params.clone(),
        };
        let deadline = Instant::now() + job.timeout;
        let mut test_pool = FixturePool::new(Owner::TestRun {
            worker_index,
            test: case.id(),
            retry,
        });
        let mut errors = Vec::new();

        let (status, error) = match self.setup(job, &mut test_pool, &builtins, deadline).await {
            Ok(args) => run_body(job, args, deadline).await,
            Err(SetupFailure::Failed(error)) => (TestStatus::Failed, Some(error)),
            Err(SetupFailure::Malformed(run_error)) => {
                let error = TestError::from_run_error(&run_error);
                errors.push(run_error);
                (TestStatus::Failed, Some(error))
            }
            Err(SetupFailure::TimedOut { fixture }) => (TestStatus::TimedOut, Some(timeout_error(job, Some(&fixture)))),
        };

        errors.extend(test_pool.teardown_all(self.teardown_timeout).await);
        let retire_worker = status == TestStatus::TimedOut;
        if retire_worker {
            tracing::info!("timed out, retiring worker");
            errors.extend(self.shutdown().await);
        }

        let (stdout, stderr) = info.take_stdio();
        RunOutcome {
            test_id: case.id(),
            result: TestResult {
                worker_index,
                status,
                duration: started.elapsed(),
                error,
                stdout,
                stderr,
                retry,
            },
            errors,
            retire_worker,
        }
    }

    async fn setup(
        &mut self,
        job: &TestJob,
        test_pool: &mut FixturePool,
        builtins: &Builtins,
        deadline: Instant,
    ) -> Result<FixtureArgs, SetupFailure> {
        for step in job.plan.steps() {
            let def = job.case.registry.get(&step.name).cloned().ok_or_else(|| {
                SetupFailure::Failed(TestError::new(format!("Fixture \"{}\" is not registered.", step.name)))
            })?;
            let existing = match def.scope() {
                Scope::Worker => self.worker_pool.state(def.name()),
                Scope::Test => test_pool.state(def.name()),
            };
            if existing != InstanceState::Uncreated {
                continue;
            }
            let requests = def
                .params()
                .map_err(|error| SetupFailure::Failed(TestError::new(error.to_string())))?;
            let args = collect_args(requests, test_pool, &self.worker_pool)?;
            let pool = match def.scope() {
                Scope::Worker => &mut self.worker_pool,
                Scope::Test => &mut *test_pool,
            };
            pool.create(&def, args, builtins, deadline).await?;
        }
        collect_args(&job.requests, test_pool, &self.worker_pool)
    }

    /// Tear down the worker's fixtures. Later calls do nothing.
    pub async fn shutdown(&mut self) -> Vec<RunError> {
        if self.retired {
            return Vec::new();
        }
        self.retired = true;
        self.worker_pool.teardown_all(self.teardown_timeout).await
    }
}

fn collect_args(
    requests: &[ParamRequest],
    test_pool: &FixturePool,
    worker_pool: &FixturePool,
) -> Result<FixtureArgs, SetupFailure> {
    let mut args = FixtureArgs::default();
    for request in requests {
        let value = test_pool
            .get(&request.name)
            .or_else(|| worker_pool.get(&request.name))
            .ok_or_else(|| {
                SetupFailure::Failed(TestError::new(format!("Fixture \"{}\" has no value.", request.name)))
            })?;
        args.insert(request.alias.clone(), value.clone());
    }
    Ok(args)
}

async fn run_body(job: &TestJob, args: FixtureArgs, deadline: Instant) -> (TestStatus, Option<TestError>) {
    let location = &job.case.location;
    let mut task = tokio::spawn((job.case.body)(args));
    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Ok(Ok(()))) => (TestStatus::Passed, None),
        Ok(Ok(Err(report))) => (TestStatus::Failed, Some(TestError::from_report(&report, location))),
        Ok(Err(join)) => (
            TestStatus::Failed,
            Some(TestError::with_location(panic_message(join), location)),
        ),
        Err(_) => {
            cancel(task).await;
            (TestStatus::TimedOut, Some(timeout_error(job, None)))
        }
    }
}

fn timeout_error(job: &TestJob, fixture: Option<&str>) -> TestError {
    let mut message = format!("Timeout of {}ms exceeded.", job.timeout.as_millis());
    if let Some(fixture) = fixture {
        message.push_str(&format!(" (while setting up \"{fixture}\")"));
    }
    TestError::with_location(message, &job.case.location)
}
