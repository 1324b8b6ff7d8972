//! Integration tests for the per-container operation gate.

use std::time::Duration;

use futures::future::join_all;
use sandpit::{ContainerStatus, InstallOptions, OperationOptions, SandpitError};
use sandpit_test_utils::{TestContext, test_options};
use serde_json::json;
use tokio_util::sync::CancellationToken;

// ============================================================================
// ORDERING TESTS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_operations_never_overlap() {
    let ctx = TestContext::new();
    let id = ctx.spawn().await.id;

    let ops = (0..3).map(|i| {
        let code = format!("sleep(50); module.exports = {};", i);
        let runtime = ctx.runtime.clone();
        let id = id.clone();
        async move {
            runtime
                .execute(id.as_str(), &code, None, OperationOptions::new())
                .await
        }
    });
    let results = join_all(ops).await;

    let exports: Vec<_> = results
        .into_iter()
        .map(|r| r.unwrap().exports)
        .collect();
    assert_eq!(exports, vec![json!(0), json!(1), json!(2)]);
    assert_eq!(ctx.probe.peak(), 1);

    let metrics = ctx.runtime.metrics();
    assert_eq!(metrics.operations_started_total(), 3);
    assert_eq!(metrics.operations_succeeded_total(), 3);
}

#[tokio::test(start_paused = true)]
async fn operations_start_in_submission_order() {
    let ctx = TestContext::new();
    let id = ctx.spawn().await.id;

    // Earlier submissions sleep longer, so any reordering would show.
    let ops = (0..5).map(|i| {
        let code = format!("mark('{}'); sleep({});", i, (5 - i) * 20);
        let runtime = ctx.runtime.clone();
        let id = id.clone();
        async move {
            runtime
                .execute(id.as_str(), &code, None, OperationOptions::new())
                .await
        }
    });
    for result in join_all(ops).await {
        result.unwrap();
    }

    assert_eq!(ctx.probe.marks(), vec!["0", "1", "2", "3", "4"]);
    assert_eq!(ctx.probe.peak(), 1);
}

#[tokio::test(start_paused = true)]
async fn different_containers_run_concurrently() {
    let ctx = TestContext::new();
    let a = ctx.spawn().await.id;
    let b = ctx.spawn().await.id;

    let (ra, rb) = tokio::join!(
        ctx.runtime
            .execute(a.as_str(), "sleep(50);", None, OperationOptions::new()),
        ctx.runtime
            .execute(b.as_str(), "sleep(50);", None, OperationOptions::new()),
    );
    ra.unwrap();
    rb.unwrap();
    assert_eq!(ctx.probe.peak(), 2);
}

#[tokio::test(start_paused = true)]
async fn counters_hold_under_load() {
    let ctx = TestContext::new();
    let id = ctx.spawn().await.id;
    let done = CancellationToken::new();

    let ops = (0..4).map(|_| {
        ctx.runtime
            .execute(id.as_str(), "sleep(20);", None, OperationOptions::new())
    });
    let work = async {
        let results = join_all(ops).await;
        done.cancel();
        results
    };
    let watch = async {
        while !done.is_cancelled() {
            let info = ctx.runtime.get(id.as_str()).unwrap();
            assert!(info.active_operations <= 1);
            assert!(info.pending_operations >= info.active_operations);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };

    let (results, ()) = tokio::join!(work, watch);
    assert!(results.iter().all(|r| r.is_ok()));

    let info = ctx.runtime.get(id.as_str()).unwrap();
    assert_eq!(info.status, ContainerStatus::Ready);
    assert_eq!(info.pending_operations, 0);
    assert_eq!(info.metrics.operations_executed_total(), 4);
}

// ============================================================================
// TIMEOUT TESTS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn hanging_operation_times_out_and_frees_the_gate() {
    let ctx = TestContext::new();
    let id = ctx.spawn().await.id;

    let err = ctx
        .runtime
        .execute(
            id.as_str(),
            "hang();",
            None,
            OperationOptions::new().with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SandpitError::Timeout {
            id: id.to_string(),
            operation: "execute".into(),
            timeout: Duration::from_millis(100),
        }
    );

    let result = ctx
        .runtime
        .execute(id.as_str(), "module.exports = 7;", None, OperationOptions::new())
        .await
        .unwrap();
    assert_eq!(result.exports, json!(7));

    let info = ctx.runtime.get(id.as_str()).unwrap();
    assert_eq!(info.status, ContainerStatus::Ready);
    assert_eq!(info.active_operations, 0);
    assert_eq!(info.pending_operations, 0);
    assert_eq!(info.metrics.operation_timeouts_total(), 1);

    let metrics = ctx.runtime.metrics();
    assert_eq!(metrics.operations_timed_out_total(), 1);
    assert_eq!(metrics.operations_failed_total(), 1);
    assert_eq!(metrics.operations_succeeded_total(), 1);
}

#[tokio::test(start_paused = true)]
async fn worker_backed_timeout_frees_the_gate() {
    let ctx = TestContext::with_builder(test_options(), |builder, engine| {
        builder.worker_provider(engine)
    });
    let id = ctx.spawn().await.id;

    let err = ctx
        .runtime
        .execute(
            id.as_str(),
            "hang();",
            None,
            OperationOptions::new().with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let result = ctx
        .runtime
        .execute(
            id.as_str(),
            "module.exports = 7;",
            None,
            OperationOptions::new().with_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();
    assert_eq!(result.exports, json!(7));
    assert_eq!(ctx.runtime.get(id.as_str()).unwrap().status, ContainerStatus::Ready);

    let terminated = tokio::time::timeout(Duration::from_secs(60), ctx.runtime.terminate(id.as_str()))
        .await
        .expect("terminate should not hang behind the abandoned operation");
    assert!(terminated.unwrap());
    assert!(ctx.runtime.get(id.as_str()).is_none());
    assert_eq!(ctx.provider.terminated(), 1);
}

#[tokio::test(start_paused = true)]
async fn dispose_after_worker_backed_timeouts_completes() {
    let ctx = TestContext::with_builder(test_options(), |builder, engine| {
        builder.worker_provider(engine)
    });
    let a = ctx.spawn().await.id;
    let b = ctx.spawn().await.id;

    for id in [&a, &b] {
        let err = ctx
            .runtime
            .execute(
                id.as_str(),
                "hang();",
                None,
                OperationOptions::new().with_timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    tokio::time::timeout(Duration::from_secs(60), ctx.runtime.dispose())
        .await
        .expect("dispose should not hang")
        .unwrap();
    assert!(ctx.runtime.list().is_empty());
    assert_eq!(ctx.runtime.metrics().containers_terminated_total(), 2);
}

#[tokio::test(start_paused = true)]
async fn default_timeout_applies() {
    let ctx = TestContext::with_options(
        test_options().with_default_timeout(Some(Duration::from_millis(200))),
    );
    let id = ctx.spawn().await.id;

    let err = ctx
        .runtime
        .execute(id.as_str(), "sleep(1000);", None, OperationOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err, SandpitError::Timeout { timeout, .. } if timeout == Duration::from_millis(200)));
}

// ============================================================================
// CANCELLATION TESTS
// ============================================================================

#[tokio::test]
async fn pre_cancelled_token_never_dispatches() {
    let ctx = TestContext::new();
    let id = ctx.spawn().await.id;
    let token = CancellationToken::new();
    token.cancel();

    let err = ctx
        .runtime
        .execute(
            id.as_str(),
            "mark('ran');",
            None,
            OperationOptions::new().with_cancel(token),
        )
        .await
        .unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(ctx.probe.started(), 0);
    assert!(ctx.probe.marks().is_empty());

    let metrics = ctx.runtime.metrics();
    assert_eq!(metrics.operations_started_total(), 0);
    assert_eq!(metrics.operations_aborted_total(), 1);
    assert_eq!(metrics.operations_failed_total(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_while_queued() {
    let ctx = TestContext::new();
    let id = ctx.spawn().await.id;
    let token = CancellationToken::new();

    let (first, second, ()) = tokio::join!(
        ctx.runtime.execute(
            id.as_str(),
            "sleep(100); module.exports = 1;",
            None,
            OperationOptions::new(),
        ),
        ctx.runtime.execute(
            id.as_str(),
            "mark('second');",
            None,
            OperationOptions::new().with_cancel(token.clone()),
        ),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        },
    );

    assert_eq!(first.unwrap().exports, json!(1));
    assert!(second.unwrap_err().is_aborted());
    assert_eq!(ctx.probe.started(), 1);
    assert!(ctx.probe.marks().is_empty());

    let info = ctx.runtime.get(id.as_str()).unwrap();
    assert_eq!(info.pending_operations, 0);
    assert_eq!(info.status, ContainerStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn cancel_while_running() {
    let ctx = TestContext::new();
    let id = ctx.spawn().await.id;
    let token = CancellationToken::new();

    let (result, ()) = tokio::join!(
        ctx.runtime.execute(
            id.as_str(),
            "sleep(1000);",
            None,
            OperationOptions::new().with_cancel(token.clone()),
        ),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        },
    );
    let err = result.unwrap_err();
    assert_eq!(
        err,
        SandpitError::Aborted {
            id: id.to_string(),
            operation: "execute".into(),
        }
    );

    // The gate is free straight away.
    let next = ctx
        .runtime
        .execute(id.as_str(), "module.exports = 'next';", None, OperationOptions::new())
        .await
        .unwrap();
    assert_eq!(next.exports, json!("next"));
}

// ============================================================================
// ERROR PROPAGATION TESTS
// ============================================================================

#[tokio::test]
async fn execution_error_is_recorded_but_not_fatal() {
    let ctx = TestContext::new();
    let id = ctx.spawn().await.id;

    let err = ctx
        .runtime
        .execute(id.as_str(), "throw 'bad input';", None, OperationOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err, SandpitError::Execution("bad input".into()));

    let info = ctx.runtime.get(id.as_str()).unwrap();
    assert_eq!(info.status, ContainerStatus::Ready);
    assert_eq!(info.last_error.as_deref(), Some("execution failed: bad input"));
    assert_eq!(info.metrics.operation_errors_total(), 1);
}

#[tokio::test]
async fn engine_error_moves_container_to_errored() {
    let ctx = TestContext::new();
    let id = ctx.spawn().await.id;

    let err = ctx
        .runtime
        .execute(id.as_str(), "crash();", None, OperationOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SandpitError::Engine(_)));
    assert_eq!(
        ctx.runtime.get(id.as_str()).unwrap().status,
        ContainerStatus::Errored
    );

    // Still addressable; status stays errored.
    let result = ctx
        .runtime
        .execute(id.as_str(), "module.exports = 1;", None, OperationOptions::new())
        .await
        .unwrap();
    assert_eq!(result.exports, json!(1));
    assert_eq!(
        ctx.runtime.get(id.as_str()).unwrap().status,
        ContainerStatus::Errored
    );
}

#[tokio::test]
async fn unknown_container_is_not_found() {
    let ctx = TestContext::new();
    let err = ctx
        .runtime
        .execute("ghost", "module.exports = 1;", None, OperationOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err, SandpitError::NotFound("ghost".into()));

    let err = ctx.runtime.snapshot("ghost").unwrap_err();
    assert_eq!(err, SandpitError::NotFound("ghost".into()));
}

#[tokio::test]
async fn run_file_missing_file_fails() {
    let ctx = TestContext::new();
    let id = ctx.spawn().await.id;
    let err = ctx
        .runtime
        .run_file(id.as_str(), "missing.js", OperationOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SandpitError::Storage(_)));
}

// ============================================================================
// INSTALL TESTS
// ============================================================================

#[tokio::test]
async fn install_records_packages_in_container_fs() {
    let ctx = TestContext::new();
    let id = ctx.spawn().await.id;

    let result = ctx
        .runtime
        .install(
            id.as_str(),
            "lodash@4.17.21 @types/node",
            InstallOptions::default(),
            OperationOptions::new(),
        )
        .await
        .unwrap();
    let names: Vec<_> = result.installed.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["lodash", "@types/node"]);

    let snapshot = ctx.runtime.snapshot(id.as_str()).unwrap();
    assert!(snapshot.get("/workspace/package.json").is_some());
    assert!(snapshot.get("/workspace/node_modules/lodash/package.json").is_some());

    let manifest = ctx
        .runtime
        .execute(
            id.as_str(),
            "module.exports = fs.readFile('package.json');",
            None,
            OperationOptions::new(),
        )
        .await
        .unwrap();
    assert!(manifest.exports.as_str().unwrap().contains("4.17.21"));
}

#[tokio::test]
async fn install_rejects_bad_spec() {
    let ctx = TestContext::new();
    let id = ctx.spawn().await.id;
    let err = ctx
        .runtime
        .install(
            id.as_str(),
            "@broken",
            InstallOptions::default(),
            OperationOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SandpitError::Install(_)));
    assert_eq!(
        ctx.runtime.get(id.as_str()).unwrap().status,
        ContainerStatus::Ready
    );
}
