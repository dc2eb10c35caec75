use std::time::Duration;

use lan_probe_rs::config::EngineConfig;
use lan_probe_rs::error::EngineError;
use lan_probe_rs::events::{event_queue, EventReceiver};
use lan_probe_rs::orchestrator::{Orchestrator, StopOutcome, TaskRequest};
use lan_probe_rs::types::{ProbeEvent, ScanMode, TaskKind, TaskState};
use tokio::time::timeout;

async fn collect_until_idle(rx: &mut EventReceiver) -> Vec<ProbeEvent> {
    let mut out = Vec::new();
    loop {
        let ev = timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("task did not finish in time")
            .expect("queue closed");
        let idle = matches!(ev, ProbeEvent::TaskIdle { .. });
        out.push(ev);
        if idle {
            return out;
        }
    }
}

#[tokio::test]
async fn invalid_targets_rejected_without_state_change() {
    let (tx, mut rx) = event_queue();
    let orch = Orchestrator::new(EngineConfig::default(), tx);

    for req in [
        TaskRequest::Ping { target: "  ".into() },
        TaskRequest::Trace { target: "999.1.1.1".into() },
        TaskRequest::PortTest { target: "bad host".into(), mode: ScanMode::Fast },
        TaskRequest::Bulk { targets: vec![] },
        TaskRequest::NsLookup { target: "example.com".into(), server: Some("not a server".into()) },
    ] {
        assert!(matches!(orch.start(req).await, Err(EngineError::InvalidTarget(_))));
    }
    assert!(!orch.is_busy().await);
    assert!(rx.drain(10).is_empty());
}

#[tokio::test]
async fn second_start_is_busy_and_port_test_stops_cooperatively() {
    let (tx, mut rx) = event_queue();
    let orch = Orchestrator::new(EngineConfig::default(), tx);

    let id = orch
        .start(TaskRequest::PortTest { target: "192.0.2.1".into(), mode: ScanMode::Full })
        .await
        .unwrap();
    let busy = orch.start(TaskRequest::Ping { target: "127.0.0.1".into() }).await;
    assert!(matches!(busy, Err(EngineError::Busy { running: TaskKind::PortTest })));

    assert_eq!(orch.stop(TaskKind::Ping).await, StopOutcome::NotRunning);
    assert_eq!(orch.stop(TaskKind::PortTest).await, StopOutcome::Stopping);
    if let Some(task) = orch.current().await {
        assert_eq!(task.state, TaskState::Stopping);
    }

    let events = collect_until_idle(&mut rx).await;
    assert_eq!(
        events.first(),
        Some(&ProbeEvent::TaskStarted { id, task: TaskKind::PortTest, target: "192.0.2.1".into() })
    );
    let cancelled = events.iter().find_map(|e| match e {
        ProbeEvent::PortScanCancelled { totals, .. } => Some(*totals),
        _ => None,
    });
    let totals = cancelled.expect("scan should report cancellation");
    assert!(totals.done < totals.total);
    assert!(!events.iter().any(|e| matches!(e, ProbeEvent::PortScanDone { .. })));
    let stopping = events
        .iter()
        .filter(|e| matches!(e, ProbeEvent::TaskStopping { task: TaskKind::PortTest, .. }))
        .count();
    assert_eq!(stopping, 1);
    assert_eq!(events.last(), Some(&ProbeEvent::TaskIdle { id, task: TaskKind::PortTest }));

    orch.wait_idle().await;
    assert!(orch.current().await.is_none());
    assert_eq!(orch.stop_current().await, StopOutcome::NotRunning);
}

#[tokio::test]
async fn concurrent_starts_never_overlap() {
    let (tx, mut rx) = event_queue();
    let orch = Orchestrator::new(EngineConfig::default(), tx);

    let mut handles = Vec::new();
    for i in 0..16 {
        let orch = orch.clone();
        handles.push(tokio::spawn(async move {
            orch.start(TaskRequest::Bulk { targets: vec![format!("host-{i}.invalid")] })
                .await
        }));
    }
    let mut started = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => started += 1,
            Err(EngineError::Busy { .. }) => {}
            Err(e) => panic!("unexpected error {e}"),
        }
    }
    assert!(started >= 1);
    orch.wait_idle().await;

    // Started and idle must strictly alternate.
    let mut running: Option<u64> = None;
    let mut seen_started = 0;
    for ev in rx.drain(usize::MAX) {
        match ev {
            ProbeEvent::TaskStarted { id, .. } => {
                assert!(running.is_none(), "task {id} started while another was active");
                running = Some(id);
                seen_started += 1;
            }
            ProbeEvent::TaskIdle { id, .. } => {
                assert_eq!(running.take(), Some(id));
            }
            _ => {}
        }
    }
    assert!(running.is_none());
    assert_eq!(seen_started, started);
}

#[tokio::test]
async fn bulk_ping_cannot_be_stopped() {
    let (tx, mut rx) = event_queue();
    let mut config = EngineConfig::default();
    config.bulk_concurrency = 1;
    config.ping_timeout_ms = 500;
    let orch = Orchestrator::new(config, tx);

    let targets: Vec<String> = (1..=8).map(|i| format!("192.0.2.{i}")).collect();
    orch.start(TaskRequest::Bulk { targets }).await.unwrap();
    let outcome = orch.stop(TaskKind::Bulk).await;
    assert_ne!(outcome, StopOutcome::Stopping);
    assert!(matches!(outcome, StopOutcome::Unsupported | StopOutcome::NotRunning));

    let events = timeout(Duration::from_secs(60), collect_until_idle(&mut rx))
        .await
        .expect("bulk run finished");
    let results = events
        .iter()
        .filter(|e| matches!(e, ProbeEvent::BulkResult { .. }))
        .count();
    assert_eq!(results, 8);
    assert!(events.iter().any(|e| matches!(e, ProbeEvent::BulkDone { total: 8 })));
}

#[tokio::test]
async fn lookup_task_always_ends_with_terminal_event() {
    // Whatever the host has installed, a stream task always ends with a
    // terminal event and returns the slot to idle.
    let (tx, mut rx) = event_queue();
    let orch = Orchestrator::new(EngineConfig::default(), tx);
    orch.start(TaskRequest::NsLookup { target: "localhost".into(), server: None })
        .await
        .unwrap();
    let events = collect_until_idle(&mut rx).await;
    let terminal = events.iter().any(|e| {
        matches!(
            e,
            ProbeEvent::LaunchFailed { task: TaskKind::NsLookup, .. }
                | ProbeEvent::StreamDone { task: TaskKind::NsLookup, .. }
        )
    });
    assert!(terminal);
    assert!(!orch.is_busy().await);
}
