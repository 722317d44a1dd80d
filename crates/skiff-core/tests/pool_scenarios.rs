//! End-to-end pool scenarios against the in-memory engine.
//!
//! Timing-sensitive cases run under tokio's paused clock so retry and
//! eviction schedules elapse in virtual time.

use skiff_core::{
    reason, SandboxConfig, SandboxError, SandboxEvent, SandboxManager, SandboxState,
};
use skiff_docker::{ExecScript, FakeEngine, OutputChunk};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config(min_warm: usize, max_total: usize) -> SandboxConfig {
    let mut config = SandboxConfig::default();
    config.pool.min_warm = min_warm;
    config.pool.max_total = max_total;
    // Keep background loops quiet unless a scenario tunes them down.
    config.pool.max_idle_ms = 600_000;
    config.health_check.interval_ms = 600_000;
    config
}

fn manager(config: SandboxConfig) -> SandboxManager<FakeEngine> {
    SandboxManager::new(FakeEngine::new(), config)
}

fn record_events(manager: &SandboxManager<FakeEngine>) -> Arc<Mutex<Vec<SandboxEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    manager.on(move |event| sink.lock().unwrap().push(event.clone()));
    events
}

#[tokio::test]
async fn warm_acquire_release_cycle() {
    let manager = manager(config(1, 2));
    manager.initialize().await.expect("initialize");

    let stats = manager.stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.ready, 1);
    assert_eq!(stats.executing, 0);
    assert_eq!(stats.idle, 0);

    let sandbox = manager.acquire(Some("session-1".into())).await.expect("acquire");
    assert_eq!(sandbox.state().await, Some(SandboxState::Executing));
    let stats = manager.stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.ready, 0);
    assert_eq!(stats.executing, 1);

    sandbox.release().await.expect("release");
    let stats = manager.stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.ready, 1);
    assert_eq!(stats.executing, 0);

    assert_eq!(manager.counters().warm_hits(), 1);
    assert_eq!(manager.counters().cold_misses(), 0);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pool_exhaustion_fails_after_retries() {
    let manager = manager(config(0, 1));

    let held = manager.acquire(None).await.expect("first acquire");
    assert_eq!(manager.stats().await.executing, 1);

    let err = manager.acquire(None).await.expect_err("pool is full");
    assert!(matches!(err, SandboxError::PoolExhausted(1)));

    drop(held);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn health_eviction_after_three_failures() {
    let mut cfg = config(0, 2);
    cfg.health_check.interval_ms = 50;
    let manager = manager(cfg);
    let events = record_events(&manager);

    let bad: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let bad_ref = Arc::clone(&bad);
    manager.driver().engine().on_exec(move |container, cmd| {
        let is_bad = bad_ref.lock().unwrap().as_deref() == Some(container);
        if cmd.contains("print(1)") && is_bad {
            ExecScript::failure(1, "interpreter wedged")
        } else {
            ExecScript::ok("1")
        }
    });

    let sandbox = manager.acquire(None).await.expect("acquire");
    let id = sandbox.id().clone();
    let container = sandbox.container().name.clone();
    sandbox.release().await.expect("release");
    assert_eq!(manager.state_of(&id).await, Some(SandboxState::Idle));
    *bad.lock().unwrap() = Some(container);

    // Three probe ticks at 50 ms each, plus slack.
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(manager.state_of(&id).await, None);
    assert_eq!(manager.stats().await.total, 0);

    let events = events.lock().unwrap();
    let failed_at = events
        .iter()
        .position(|e| matches!(e, SandboxEvent::HealthCheckFailed { failures: 3, .. }))
        .expect("health-check-failed event");
    let destroyed_at = events
        .iter()
        .position(
            |e| matches!(e, SandboxEvent::Destroyed { reason, .. } if reason == reason::HEALTH_CHECK_FAILURE),
        )
        .expect("destroyed event");
    assert!(failed_at < destroyed_at);
}

#[tokio::test(start_paused = true)]
async fn health_eviction_warms_replacement_to_floor() {
    let mut cfg = config(1, 2);
    cfg.health_check.interval_ms = 50;
    let manager = manager(cfg);

    let bad: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let bad_ref = Arc::clone(&bad);
    manager.driver().engine().on_exec(move |container, cmd| {
        let is_bad = bad_ref.lock().unwrap().as_deref() == Some(container);
        if cmd.contains("print(1)") && is_bad {
            ExecScript::failure(1, "interpreter wedged")
        } else {
            ExecScript::ok("1")
        }
    });

    manager.initialize().await.expect("initialize");
    let sandbox = manager.acquire(None).await.expect("acquire warm");
    let original = sandbox.id().clone();
    let container = sandbox.container().name.clone();
    sandbox.release().await.expect("release");
    *bad.lock().unwrap() = Some(container);

    tokio::time::sleep(Duration::from_millis(600)).await;

    // The wedged sandbox is gone and the floor has been restored.
    assert_eq!(manager.state_of(&original).await, None);
    let stats = manager.stats().await;
    assert_eq!(stats.ready, 1);
    assert_eq!(stats.total, 1);
}

#[tokio::test(start_paused = true)]
async fn idle_sandbox_reaped_after_ttl() {
    let mut cfg = config(0, 2);
    cfg.pool.max_idle_ms = 100;
    cfg.health_check.interval_ms = 50;
    let manager = manager(cfg);
    let events = record_events(&manager);

    let sandbox = manager.acquire(None).await.expect("acquire");
    let id = sandbox.id().clone();
    sandbox.release().await.expect("release");
    // With no warm floor the sandbox stays Idle rather than re-queueing.
    assert_eq!(manager.state_of(&id).await, Some(SandboxState::Idle));

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(manager.state_of(&id).await, None);
    assert!(events.lock().unwrap().iter().any(
        |e| matches!(e, SandboxEvent::Destroyed { reason, .. } if reason == reason::IDLE_TIMEOUT)
    ));
}

#[tokio::test(start_paused = true)]
async fn exec_timeout_leaves_sandbox_usable() {
    let mut cfg = config(0, 1);
    cfg.timeouts.exec_ms = 100;
    let manager = manager(cfg);
    let events = record_events(&manager);

    manager.driver().engine().on_exec(|_, cmd| {
        if cmd.contains("sleep 1") {
            ExecScript::delayed(Duration::from_secs(1))
        } else {
            ExecScript::ok("1")
        }
    });

    let sandbox = manager.acquire(None).await.expect("acquire");
    let err = sandbox.exec("sleep 1").await.expect_err("times out");
    assert!(matches!(
        err,
        SandboxError::Timeout {
            op: "exec",
            timeout_ms: 100
        }
    ));

    // The sandbox itself is unaffected: still leased, next probe healthy.
    assert_eq!(sandbox.state().await, Some(SandboxState::Executing));
    let probe = manager
        .driver()
        .health_probe(sandbox.container())
        .await
        .expect("probe");
    assert!(probe.success());
    assert!(!events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, SandboxEvent::Destroyed { .. })));

    sandbox.release().await.expect("release");
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn exec_demultiplexes_stdout_and_stderr() {
    let manager = manager(config(0, 1));
    manager.driver().engine().on_exec(|_, cmd| {
        if cmd == "greet" {
            ExecScript::with_chunks(
                vec![
                    OutputChunk::Stdout(bytes::Bytes::from_static(b"hello\n")),
                    OutputChunk::Stderr(bytes::Bytes::from_static(b"warn\n")),
                ],
                0,
            )
        } else {
            ExecScript::ok("")
        }
    });

    let sandbox = manager.acquire(None).await.expect("acquire");
    let result = sandbox.exec("greet").await.expect("exec");
    assert_eq!(result.stdout, "hello");
    assert_eq!(result.stderr, "warn");
    assert_eq!(result.exit_code, 0);

    manager.shutdown().await;
}

#[tokio::test]
async fn creation_retries_once_with_fresh_id() {
    let manager = manager(config(0, 2));
    let events = record_events(&manager);
    manager.driver().engine().fail_next_creates(1);

    let sandbox = manager.acquire(None).await.expect("acquire survives one failure");
    assert_eq!(manager.stats().await.total, 1);

    let events = events.lock().unwrap();
    let created: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SandboxEvent::Created { id } => Some(id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(created.len(), 2);
    assert_ne!(created[0], created[1]);
    assert_eq!(&created[1], sandbox.id());
    assert!(events
        .iter()
        .any(|e| matches!(e, SandboxEvent::Error { .. })));
}

#[tokio::test]
async fn creation_failing_twice_reports_unavailable() {
    let manager = manager(config(0, 2));
    manager.driver().engine().fail_next_creates(2);

    let err = manager.acquire(None).await.expect_err("both attempts fail");
    assert!(matches!(err, SandboxError::SandboxUnavailable(_)));
    assert_eq!(manager.stats().await.total, 0);
}

#[tokio::test]
async fn initialize_fails_when_engine_unreachable() {
    let manager = manager(config(0, 1));
    manager.driver().engine().fail_ping(true);

    let err = manager.initialize().await.expect_err("ping fails");
    assert!(matches!(err, SandboxError::SandboxUnavailable(_)));

    // The manager stays up; a later initialize succeeds.
    manager.driver().engine().fail_ping(false);
    manager.initialize().await.expect("recovers");
}

#[tokio::test]
async fn initialize_sweeps_stale_containers() {
    let manager = manager(config(0, 2));
    let engine = manager.driver().engine();
    engine.seed_container("sandbox-dead1");
    engine.seed_container("sandbox-dead2");
    engine.seed_container("unrelated-svc");

    manager.initialize().await.expect("initialize");

    let names = engine.container_names();
    assert_eq!(names, vec!["unrelated-svc"]);
}

#[tokio::test]
async fn initialize_pulls_image_once() {
    let manager = manager(config(0, 1));
    manager.initialize().await.expect("initialize");
    assert!(manager.driver().engine().image_pulled("ubuntu:22.04"));
    // Idempotent re-initialize is a no-op.
    manager.initialize().await.expect("re-initialize");
}

#[tokio::test(start_paused = true)]
async fn pool_bound_holds_under_churn() {
    let manager = manager(config(0, 2));

    let a = manager.acquire(None).await.expect("a");
    let b = manager.acquire(None).await.expect("b");
    assert_eq!(manager.stats().await.total, 2);

    let err = manager.acquire(None).await.expect_err("over ceiling");
    assert!(matches!(err, SandboxError::PoolExhausted(2)));
    assert_eq!(manager.stats().await.total, 2);

    let a_id = a.id().clone();
    a.release().await.expect("release a");
    // With no warm floor the released sandbox idles until the reaper gets
    // it, so it still occupies a slot and the ceiling holds.
    assert_eq!(manager.state_of(&a_id).await, Some(SandboxState::Idle));
    let err = manager.acquire(None).await.expect_err("idle slot still counts");
    assert!(matches!(err, SandboxError::PoolExhausted(2)));
    assert_eq!(manager.stats().await.total, 2);

    drop(b);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn warm_pool_is_fifo_and_requeues_on_release() {
    let manager = manager(config(2, 3));
    manager.initialize().await.expect("initialize");
    assert_eq!(manager.stats().await.ready, 2);

    let first = manager.acquire(None).await.expect("first");
    let second = manager.acquire(None).await.expect("second");
    assert_ne!(first.id(), second.id());
    assert_eq!(manager.stats().await.ready, 0);

    let first_id = first.id().clone();
    first.release().await.expect("release first");
    // Floor is short, so the release re-queued it.
    assert_eq!(manager.state_of(&first_id).await, Some(SandboxState::Ready));

    let third = manager.acquire(None).await.expect("third");
    assert_eq!(third.id(), &first_id);

    manager.shutdown().await;
}

#[tokio::test]
async fn lifecycle_events_are_causally_ordered() {
    let manager = manager(config(0, 1));
    let events = record_events(&manager);

    let sandbox = manager.acquire(None).await.expect("acquire");
    let id = sandbox.id().clone();
    sandbox.release().await.expect("release");
    manager.destroy_sandbox(&id, reason::MANUAL).await;

    let events = events.lock().unwrap();
    let mine: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            SandboxEvent::Created { id: eid } if *eid == id => Some("created".to_string()),
            SandboxEvent::StateChange { id: eid, from, to } if *eid == id => {
                Some(format!("{from}->{to}"))
            }
            SandboxEvent::Destroyed { id: eid, reason } if *eid == id => {
                Some(format!("destroyed:{reason}"))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        mine,
        vec![
            "created",
            "Creating->Initializing",
            "Initializing->Ready",
            "Ready->Executing",
            "Executing->Idle",
            "destroyed:manual",
        ]
    );

    // Event totality: exactly one created, one destroyed.
    assert_eq!(mine.iter().filter(|e| *e == "created").count(), 1);
    assert_eq!(mine.iter().filter(|e| e.starts_with("destroyed")).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_is_idempotent_and_final() {
    let mut cfg = config(1, 2);
    cfg.timeouts.shutdown_grace_ms = 100;
    let manager = manager(cfg);
    manager.initialize().await.expect("initialize");
    let held = manager.acquire(None).await.expect("acquire");

    manager.shutdown().await;
    let stats = manager.stats().await;
    assert_eq!(stats.total, 0);

    // Second shutdown is a no-op.
    manager.shutdown().await;

    // Acquire after shutdown is refused.
    let err = manager.acquire(None).await.expect_err("refused");
    assert!(matches!(err, SandboxError::SandboxUnavailable(_)));

    // The surviving handle now points at a destroyed sandbox.
    assert_eq!(held.state().await, None);
}

#[tokio::test]
async fn release_of_unknown_id_is_a_noop() {
    let manager = manager(config(0, 1));
    manager
        .release(&skiff_core::SandboxId::from_raw("deadbeef"))
        .await
        .expect("silent no-op");
    assert_eq!(manager.stats().await.total, 0);
}

#[tokio::test]
async fn destroyed_event_fires_at_most_once() {
    let manager = manager(config(0, 1));
    let events = record_events(&manager);

    let sandbox = manager.acquire(None).await.expect("acquire");
    let id = sandbox.id().clone();
    drop(sandbox);

    manager.destroy_sandbox(&id, reason::MANUAL).await;
    manager.destroy_sandbox(&id, reason::MANUAL).await;

    let destroyed = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, SandboxEvent::Destroyed { .. }))
        .count();
    assert_eq!(destroyed, 1);
}

#[tokio::test(start_paused = true)]
async fn every_container_gets_a_unique_sandbox_name() {
    let manager = manager(config(0, 3));
    let a = manager.acquire(None).await.expect("a");
    let b = manager.acquire(None).await.expect("b");
    let c = manager.acquire(None).await.expect("c");

    let names: HashSet<String> = manager
        .driver()
        .engine()
        .container_names()
        .into_iter()
        .collect();
    assert_eq!(names.len(), 3);
    for handle in [&a, &b, &c] {
        assert!(names.contains(&handle.container().name));
        assert!(handle.container().name.starts_with("sandbox-"));
    }
    manager.shutdown().await;
}
