//! End-to-end fixture scenarios: scoping, automatic fixtures, unions, workers, errors.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tessera::{
    Fixtures, Registry, RunConfig, RunError, RunSummary, Runner, TestInfo, TestStatus, TestSuite, WorkerInfo,
};

type Seen<T> = Arc<Mutex<Vec<T>>>;

fn config() -> RunConfig {
    RunConfig::default()
        .with_workers(1)
        .with_timeout(Duration::from_secs(5))
        .with_output_dir(std::env::temp_dir().join("tessera-tests"))
}

async fn run_with(config: RunConfig, suite: TestSuite) -> RunSummary {
    Runner::new(config).run(suite).await
}

async fn run(suite: TestSuite) -> RunSummary {
    run_with(config(), suite).await
}

/// A fixture yielding 0, 1, 2, ... each time it is instantiated.
fn counter(name: &str) -> Fixtures {
    let next = Arc::new(AtomicUsize::new(0));
    Fixtures::new().value(name, "async ()", move |_| {
        let next = next.clone();
        async move { Ok(next.fetch_add(1, Ordering::SeqCst)) }
    })
}

fn record_counter(suite: &mut TestSuite, registry: &Registry, seen: &Seen<usize>, times: usize) {
    for i in 0..times {
        let seen = seen.clone();
        suite.test(format!("reads counter {i}"), registry, "async ({ counter })", move |args| {
            let seen = seen.clone();
            async move {
                seen.lock().push(*args.get::<usize>("counter")?);
                Ok(())
            }
        });
    }
}

fn statuses(summary: &RunSummary) -> Vec<TestStatus> {
    summary.results().iter().map(|r| r.status).collect()
}

// ============================================================================
// Scopes
// ============================================================================

#[tokio::test]
async fn test_fixture_is_created_per_test() {
    let registry = Registry::base().define_test_fixtures(counter("counter"));
    let seen: Seen<usize> = Arc::default();
    let mut suite = TestSuite::new();
    suite.file("counter.spec", |f| record_counter(f, &registry, &seen, 3));

    let summary = run(suite).await;
    assert!(summary.ok(), "{:?}", summary.errors);
    assert_eq!(*seen.lock(), vec![0, 1, 2]);
}

#[tokio::test]
async fn tests_run_in_declaration_order_across_groups() {
    let registry = Registry::base().define_test_fixtures(counter("counter"));
    let seen: Seen<(String, usize)> = Arc::default();
    let declare = |scope: &mut TestSuite, title: &'static str| {
        let seen = seen.clone();
        scope.test(title, &registry, "({ counter })", move |args| {
            let seen = seen.clone();
            async move {
                seen.lock().push((title.to_string(), *args.get::<usize>("counter")?));
                Ok(())
            }
        });
    };
    let mut suite = TestSuite::new();
    suite.file("order.spec", |f| {
        declare(f, "first");
        f.describe("group", |g| declare(g, "second"));
        declare(f, "third");
    });

    let summary = run(suite).await;
    assert!(summary.ok(), "{:?}", summary.errors);
    let expected: Vec<(String, usize)> = vec![("first".into(), 0), ("second".into(), 1), ("third".into(), 2)];
    assert_eq!(*seen.lock(), expected);
}

#[tokio::test]
async fn worker_fixture_is_shared_within_a_worker() {
    let registry = Registry::base().define_worker_fixtures(counter("counter"));
    let seen: Seen<usize> = Arc::default();
    let mut suite = TestSuite::new();
    suite.file("counter.spec", |f| record_counter(f, &registry, &seen, 3));

    let summary = run(suite).await;
    assert!(summary.ok(), "{:?}", summary.errors);
    assert_eq!(*seen.lock(), vec![0, 0, 0]);
}

#[tokio::test]
async fn fixtures_compose_across_scopes() {
    let registry = Registry::base()
        .define_worker_fixtures(Fixtures::new().value("base_url", "()", |_| async { Ok("http://localhost".to_string()) }))
        .define_test_fixtures(Fixtures::new().value("endpoint", "({ base_url })", |args| async move {
            Ok(format!("{}/health", args.get::<String>("base_url")?))
        }));
    let mut suite = TestSuite::new();
    suite.file("compose.spec", |f| {
        f.test("builds endpoint", &registry, "({ endpoint })", |args| async move {
            assert_eq!(args.get::<String>("endpoint")?, "http://localhost/health");
            Ok(())
        });
    });
    assert_eq!(statuses(&run(suite).await), vec![TestStatus::Passed]);
}

// ============================================================================
// Automatic fixtures
// ============================================================================

#[tokio::test]
async fn automatic_fixtures_run_without_a_request() {
    let log: Seen<&'static str> = Arc::default();
    let (test_log, worker_log, manual_log) = (log.clone(), log.clone(), log.clone());
    let registry = Registry::base()
        .define_worker_fixtures(Fixtures::new().automatic("setup_worker", "()", move |_, y| {
            let log = worker_log.clone();
            async move {
                log.lock().push("worker");
                y.provide(()).await;
                Ok(())
            }
        }))
        .define_test_fixtures(
            Fixtures::new()
                .value("auto_trace", "()", move |_| {
                    let log = test_log.clone();
                    async move {
                        log.lock().push("test");
                        Ok(())
                    }
                })
                .value("manual", "()", move |_| {
                    let log = manual_log.clone();
                    async move {
                        log.lock().push("manual");
                        Ok(())
                    }
                }),
        );
    let mut suite = TestSuite::new();
    suite.file("auto.spec", |f| {
        f.test("one", &registry, "()", |_| async { Ok(()) });
        f.test("two", &registry, "()", |_| async { Ok(()) });
    });

    let summary = run(suite).await;
    assert!(summary.ok());
    assert_eq!(*log.lock(), vec!["worker", "test", "test"]);
}

// ============================================================================
// Parameters and built-ins
// ============================================================================

#[tokio::test]
async fn renamed_parameter_binds_local_alias() {
    let registry = Registry::base().define_test_fixtures(Fixtures::new().value("asdf", "()", |_| async { Ok(123_i32) }));
    let mut suite = TestSuite::new();
    suite.file("rename.spec", |f| {
        f.test("renamed", &registry, "async ({ asdf: renamed }) => {}", |args| async move {
            assert_eq!(*args.get::<i32>("renamed")?, 123);
            assert!(!args.contains("asdf"));
            Ok(())
        });
    });
    assert_eq!(statuses(&run(suite).await), vec![TestStatus::Passed]);
}

#[tokio::test]
async fn test_info_describes_the_test() {
    let registry = Registry::base();
    let mut suite = TestSuite::new();
    suite.file("info.spec", |f| {
        f.describe("group", |g| {
            g.test("knows its title", &registry, "({ test_info, worker_info })", |args| async move {
                let info = args.get::<TestInfo>("test_info")?;
                assert_eq!(info.title, "group › knows its title");
                assert_eq!(info.file, "info.spec");
                assert_eq!(info.retry, 0);
                assert_eq!(info.worker_index, args.get::<WorkerInfo>("worker_info")?.worker_index);
                info.print("hello from the body");
                Ok(())
            });
        });
    });
    let summary = run(suite).await;
    assert_eq!(statuses(&summary), vec![TestStatus::Passed]);
    assert_eq!(
        summary.results()[0].stdout,
        vec![tessera::StdioEntry::Text("hello from the body".into())]
    );
}

#[tokio::test]
async fn parameter_uses_default_or_configured_value() {
    let registry = Registry::base().define_parameter("browser", "Browser to launch", "chromium");
    let seen: Seen<String> = Arc::default();
    let build = |seen: &Seen<String>| {
        let mut suite = TestSuite::new();
        let seen = seen.clone();
        suite.file("param.spec", |f| {
            f.test("reads param", &registry, "({ browser })", move |args| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(args.cloned::<String>("browser")?);
                    Ok(())
                }
            });
        });
        suite
    };

    run(build(&seen)).await;
    run_with(config().with_param("browser", "firefox"), build(&seen)).await;
    assert_eq!(*seen.lock(), vec!["chromium", "firefox"]);
}

// ============================================================================
// Registries, unions and workers
// ============================================================================

#[tokio::test]
async fn union_of_registries_provides_both_sides() {
    let base = Registry::base();
    let left = base.define_test_fixtures(Fixtures::new().value("a", "()", |_| async { Ok(1_u8) }));
    let right = base.define_worker_fixtures(Fixtures::new().value("b", "()", |_| async { Ok(2_u8) }));
    let both = left.union(&right);
    let mut suite = TestSuite::new();
    suite.file("union.spec", |f| {
        f.test("sees both", &both, "({ a, b })", |args| async move {
            assert_eq!(args.get::<u8>("a")? + args.get::<u8>("b")?, 3);
            Ok(())
        });
    });
    assert_eq!(statuses(&run(suite).await), vec![TestStatus::Passed]);
}

#[tokio::test]
async fn different_registries_in_one_file_use_different_workers() {
    let first = Registry::base().define_worker_fixtures(counter("counter"));
    let second = Registry::base().define_worker_fixtures(counter("counter"));
    let mut suite = TestSuite::new();
    suite.file("two-registries.spec", |f| {
        f.test("first", &first, "({ counter })", |_| async { Ok(()) });
        f.test("second", &second, "({ counter })", |_| async { Ok(()) });
    });

    let summary = run(suite).await;
    let workers: Vec<_> = summary.results().iter().map(|r| r.worker_index).collect();
    assert_eq!(workers, vec![0, 1]);
}

#[tokio::test]
async fn shared_registry_across_files_reuses_the_worker() {
    let registry = Registry::base().define_worker_fixtures(counter("counter"));
    let seen: Seen<usize> = Arc::default();
    let mut suite = TestSuite::new();
    suite.file("a.spec", |f| record_counter(f, &registry, &seen, 1));
    suite.file("b.spec", |f| record_counter(f, &registry, &seen, 1));

    let summary = run(suite).await;
    assert!(summary.ok());
    assert_eq!(*seen.lock(), vec![0, 0]);
    assert!(summary.results().iter().all(|r| r.worker_index == 0));
}

// ============================================================================
// Static errors
// ============================================================================

#[tokio::test]
async fn positional_parameter_excludes_the_file() {
    let registry = Registry::base().define_test_fixtures(Fixtures::new().value("asdf", "()", |_| async { Ok(123_i32) }));
    let mut suite = TestSuite::new();
    suite.file("destructuring.spec", |f| {
        f.test("uses positional", &registry, "function (abc) { expect(abc.asdf).toBe(123); }", |_| async {
            Ok(())
        });
        f.test("innocent bystander", &registry, "({ asdf })", |_| async { Ok(()) });
    });

    let summary = run(suite).await;
    assert!(summary.results().is_empty());
    assert_eq!(summary.errors.len(), 1);
    let error = &summary.errors[0];
    assert_eq!(
        error.to_string(),
        "First argument must use the object destructuring pattern: abc"
    );
    assert!(error.stack().contains("tests/fixtures.rs:"), "{}", error.stack());
    assert_eq!(summary.exit_code(), 1);
}

#[tokio::test]
async fn unknown_parameter_is_reported() {
    let mut suite = TestSuite::new();
    suite.file("unknown.spec", |f| {
        f.test("asks for asdf", &Registry::base(), "async ({ asdf })", |_| async { Ok(()) });
    });
    let summary = run(suite).await;
    assert!(summary.results().is_empty());
    assert_eq!(summary.errors[0].to_string(), "Test has unknown parameter \"asdf\".");
}

#[tokio::test]
async fn cycle_and_scope_mismatch_are_static() {
    let registry = Registry::base()
        .define_test_fixtures(
            Fixtures::new()
                .value("a", "({ b })", |_| async { Ok(()) })
                .value("b", "({ a })", |_| async { Ok(()) })
                .value("page", "()", |_| async { Ok(()) }),
        )
        .define_worker_fixtures(Fixtures::new().value("browser", "({ page })", |_| async { Ok(()) }));
    let mut suite = TestSuite::new();
    suite.file("cycle.spec", |f| {
        f.test("cycle", &registry, "({ a })", |_| async { Ok(()) });
    });
    suite.file("scope.spec", |f| {
        f.test("mismatch", &registry, "({ browser })", |_| async { Ok(()) });
    });

    let summary = run(suite).await;
    assert!(summary.results().is_empty());
    assert!(matches!(summary.errors[0], RunError::CyclicDependency { .. }));
    assert!(matches!(summary.errors[1], RunError::ScopeMismatch { .. }));
}

#[tokio::test]
async fn scope_mismatch_does_not_depend_on_request_order() {
    let teardowns: Seen<&'static str> = Arc::default();
    let log = teardowns.clone();
    let registry = Registry::base()
        .define_test_fixtures(Fixtures::new().fixture("page", "()", move |_, y| {
            let log = log.clone();
            async move {
                y.provide(()).await;
                log.lock().push("teardown page");
                Ok(())
            }
        }))
        .define_worker_fixtures(Fixtures::new().value("browser", "({ page })", |_| async { Ok(()) }));
    let mut suite = TestSuite::new();
    suite.file("order.spec", |f| {
        f.test("page first", &registry, "({ page, browser })", |_| async { Ok(()) });
        f.test("page only", &registry, "({ page })", |_| async { Ok(()) });
    });

    let summary = run(suite).await;
    assert!(summary.results().is_empty());
    assert_eq!(summary.errors.len(), 1);
    assert!(matches!(summary.errors[0], RunError::ScopeMismatch { .. }));
    assert!(teardowns.lock().is_empty());
}

// ============================================================================
// Runtime failures
// ============================================================================

#[tokio::test]
async fn factory_without_value_fails_the_test() {
    let registry = Registry::base().define_test_fixtures(Fixtures::new().fixture("ghost", "()", |_, _y| async { Ok(()) }));
    let mut suite = TestSuite::new();
    suite.file("malformed.spec", |f| {
        f.test("needs ghost", &registry, "({ ghost })", |_| async { Ok(()) });
    });
    let summary = run(suite).await;
    assert_eq!(statuses(&summary), vec![TestStatus::Failed]);
    assert!(matches!(summary.errors.as_slice(), [RunError::MalformedFactory { name, .. }] if name == "ghost"));
}

#[tokio::test]
async fn timeout_tears_down_test_and_worker_fixtures() {
    let dir = tempfile::tempdir().unwrap();
    let marker = |name: &'static str| {
        let path = dir.path().join(name);
        move |_: tessera::FixtureArgs, y: tessera::Yielder| {
            let path = path.clone();
            async move {
                y.provide(()).await;
                std::fs::write(&path, "torn down").map_err(|e| miette::miette!("{e}"))?;
                Ok(())
            }
        }
    };
    let registry = Registry::base()
        .define_worker_fixtures(Fixtures::new().fixture("worker_marker", "()", marker("worker")))
        .define_test_fixtures(Fixtures::new().fixture("test_marker", "()", marker("test")));
    let mut suite = TestSuite::new();
    suite.file("timeout.spec", |f| {
        f.test("hangs", &registry, "({ worker_marker, test_marker })", |_| async {
            futures::future::pending::<()>().await;
            Ok(())
        });
        f.test("runs after", &registry, "({ worker_info })", |_| async { Ok(()) });
    });

    let summary = run_with(config().with_timeout(Duration::from_millis(200)), suite).await;
    let results = summary.results();
    assert_eq!(results[0].status, TestStatus::TimedOut);
    assert_eq!(results[0].error.as_ref().unwrap().message, "Timeout of 200ms exceeded.");
    assert_eq!(results[1].status, TestStatus::Passed);
    assert_eq!(results[0].worker_index, 0);
    assert_eq!(results[1].worker_index, 1);
    assert!(dir.path().join("test").exists());
    assert!(dir.path().join("worker").exists());
}

#[tokio::test]
async fn teardown_error_is_a_run_error() {
    let registry = Registry::base().define_test_fixtures(Fixtures::new().fixture("leaky", "()", |_, y| async move {
        y.provide(()).await;
        Err::<(), _>(miette::miette!("could not close socket"))
    }));
    let mut suite = TestSuite::new();
    suite.file("teardown.spec", |f| {
        f.test("passes anyway", &registry, "({ leaky })", |_| async { Ok(()) });
    });
    let summary = run(suite).await;
    assert_eq!(statuses(&summary), vec![TestStatus::Passed]);
    assert_eq!(summary.errors.len(), 1);
    assert!(!summary.ok());
}

#[tokio::test]
async fn teardown_order_reverses_setup() {
    let log: Seen<String> = Arc::default();
    let step = |name: &'static str, deps: &'static str, log: &Seen<String>| {
        let log = log.clone();
        Fixtures::new().fixture(name, deps, move |_, y| {
            let log = log.clone();
            async move {
                log.lock().push(format!("+{name}"));
                y.provide(()).await;
                log.lock().push(format!("-{name}"));
                Ok(())
            }
        })
    };
    let registry = Registry::base()
        .define_worker_fixtures(step("server", "()", &log))
        .define_test_fixtures(step("context", "({ server })", &log))
        .define_test_fixtures(step("page", "({ context })", &log));
    let mut suite = TestSuite::new();
    suite.file("order.spec", |f| {
        f.test("uses page", &registry, "({ page })", |_| async { Ok(()) });
    });
    assert!(run(suite).await.ok());
    assert_eq!(*log.lock(), vec!["+server", "+context", "+page", "-page", "-context", "-server"]);
}

#[tokio::test]
async fn retries_turn_failures_into_flakes() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut suite = TestSuite::new();
    suite.file("flaky.spec", |f| {
        let attempts = attempts.clone();
        f.test("second time lucky", &Registry::base(), "({ test_info })", move |args| {
            let attempts = attempts.clone();
            async move {
                let retry = args.get::<TestInfo>("test_info")?.retry;
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(miette::miette!("first attempt fails (retry {retry})"));
                }
                Ok(())
            }
        });
    });
    let summary = run_with(config().with_retries(1), suite).await;
    assert_eq!(statuses(&summary), vec![TestStatus::Failed, TestStatus::Passed]);
    assert_eq!(summary.flaky, 1);
    assert!(summary.ok());
}

#[tokio::test]
async fn markers_skip_and_expect_failure() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let registry = Registry::base().define_test_fixtures(Fixtures::new().value("costly", "()", move |_| {
        let counter = counter.clone();
        async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
    }));
    let mut suite = TestSuite::new();
    suite.file("markers.spec", |f| {
        f.test("skipped", &registry, "({ costly })", |_| async { Ok(()) })
            .skip("not on this platform");
        f.test("known failure", &registry, "()", |_| async { Err::<(), _>(miette::miette!("bug")) })
            .fail("tracked");
    });
    let summary = run(suite).await;
    assert_eq!(statuses(&summary), vec![TestStatus::Skipped, TestStatus::Failed]);
    assert_eq!(created.load(Ordering::SeqCst), 0);
    assert_eq!(summary.skipped, 1);
    assert!(summary.ok());
}
