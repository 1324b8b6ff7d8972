//! Integration tests for published events and runtime metrics.

use std::time::Duration;

use sandpit::{
    ContainerEvent, ContainerStatus, OperationKind, OperationOptions, OperationOutcome,
    RuntimeMode, SpawnOptions, TerminationReason,
};
use sandpit_test_utils::TestContext;
use tokio::sync::broadcast;

fn drain(events: &mut broadcast::Receiver<ContainerEvent>) -> Vec<ContainerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn names(events: &[ContainerEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

#[tokio::test]
async fn spawn_publishes_created_status_ready() {
    let ctx = TestContext::new();
    let mut events = ctx.runtime.subscribe();
    let id = ctx.spawn().await.id;

    let published = drain(&mut events);
    assert_eq!(
        names(&published),
        vec!["container-created", "container-status", "container-ready"]
    );
    assert_eq!(
        published[1],
        ContainerEvent::ContainerStatus {
            id: id.clone(),
            from: ContainerStatus::Creating,
            to: ContainerStatus::Ready,
        }
    );
    assert_eq!(
        published[2],
        ContainerEvent::ContainerReady {
            id,
            mode: RuntimeMode::Inline,
        }
    );
}

#[tokio::test]
async fn operation_publishes_start_and_end() {
    let ctx = TestContext::new();
    let id = ctx.spawn().await.id;
    let mut events = ctx.runtime.subscribe();

    ctx.runtime
        .execute(id.as_str(), "module.exports = 1;", None, OperationOptions::new())
        .await
        .unwrap();

    let published = drain(&mut events);
    assert_eq!(
        names(&published),
        vec![
            "container-status",
            "operation-start",
            "container-status",
            "operation-end"
        ]
    );
    assert!(matches!(
        published[1],
        ContainerEvent::OperationStart {
            kind: OperationKind::Execute,
            ..
        }
    ));
    assert!(matches!(
        published[3],
        ContainerEvent::OperationEnd {
            kind: OperationKind::Execute,
            outcome: OperationOutcome::Succeeded,
            ..
        }
    ));
    assert!(published.iter().all(|e| e.container_id() == &id));
}

#[tokio::test(start_paused = true)]
async fn timed_out_operation_reports_outcome() {
    let ctx = TestContext::new();
    let id = ctx.spawn().await.id;
    let mut events = ctx.runtime.subscribe();

    ctx.runtime
        .execute(
            id.as_str(),
            "hang();",
            None,
            OperationOptions::new().with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    let end = drain(&mut events)
        .into_iter()
        .find(|e| e.name() == "operation-end")
        .unwrap();
    match end {
        ContainerEvent::OperationEnd {
            outcome, duration, ..
        } => {
            assert_eq!(outcome, OperationOutcome::TimedOut);
            assert!(duration >= Duration::from_millis(50));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn terminate_publishes_terminated_last() {
    let ctx = TestContext::new();
    let id = ctx.spawn().await.id;
    let mut events = ctx.runtime.subscribe();

    ctx.runtime.terminate(id.as_str()).await.unwrap();

    let published = drain(&mut events);
    assert_eq!(
        published.first(),
        Some(&ContainerEvent::ContainerStatus {
            id: id.clone(),
            from: ContainerStatus::Ready,
            to: ContainerStatus::Terminating,
        })
    );
    assert_eq!(
        published.last(),
        Some(&ContainerEvent::ContainerTerminated {
            id,
            reason: TerminationReason::Explicit,
        })
    );
}

#[tokio::test]
async fn construction_failure_publishes_error() {
    let ctx = TestContext::new();
    ctx.provider.set_fail_create(true);
    let mut events = ctx.runtime.subscribe();

    ctx.runtime
        .spawn(SpawnOptions::new().with_id("broken"))
        .await
        .unwrap_err();

    assert_eq!(
        names(&drain(&mut events)),
        vec!["container-created", "container-status", "container-error"]
    );
}

#[tokio::test(start_paused = true)]
async fn metrics_track_counters_and_gauges() {
    let ctx = TestContext::new();
    let a = ctx.spawn().await.id;
    ctx.spawn().await;

    ctx.runtime
        .execute(a.as_str(), "module.exports = 1;", None, OperationOptions::new())
        .await
        .unwrap();
    ctx.runtime
        .execute(a.as_str(), "throw 'x';", None, OperationOptions::new())
        .await
        .unwrap_err();
    ctx.runtime
        .execute(
            a.as_str(),
            "hang();",
            None,
            OperationOptions::new().with_timeout(Duration::from_millis(10)),
        )
        .await
        .unwrap_err();

    let metrics = ctx.runtime.metrics();
    assert_eq!(metrics.containers_created_total(), 2);
    assert_eq!(metrics.operations_started_total(), 3);
    assert_eq!(metrics.operations_succeeded_total(), 1);
    assert_eq!(metrics.operations_failed_total(), 2);
    assert_eq!(metrics.operations_timed_out_total(), 1);
    assert_eq!(metrics.num_live_containers(), 2);
    assert_eq!(metrics.num_busy_containers(), 0);
    assert_eq!(metrics.num_pending_operations(), 0);

    // Teardown runs through the gate and counts as an operation.
    ctx.runtime.terminate(a.as_str()).await.unwrap();
    let metrics = ctx.runtime.metrics();
    assert_eq!(metrics.operations_started_total(), 4);
    assert_eq!(metrics.containers_terminated_total(), 1);
    assert_eq!(metrics.num_live_containers(), 1);

    let json = serde_json::to_value(&metrics).unwrap();
    assert_eq!(json["live_containers"], 1);
}
