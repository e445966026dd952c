//! End-to-end engine tests against real pty sessions.
#![cfg(unix)]

use std::time::Duration;

use futures::future::join_all;
use uuid::Uuid;

use patchbay_core::{EngineConfig, EngineError, PtyEngine, Subscription};
use patchbay_types::{GlobalEvent, SessionEvent, SessionStatus, SpawnSpec};

fn sh(script: &str) -> SpawnSpec {
    let mut spec = SpawnSpec::new("sh");
    spec.args = vec!["-c".to_string(), script.to_string()];
    spec
}

fn quick_engine() -> PtyEngine {
    PtyEngine::new(EngineConfig {
        close_grace: Duration::from_millis(20),
        ..EngineConfig::default()
    })
}

/// Drain a subscription to its terminal Exit, stitching replay and live
/// data together by sequence number and reporting consumption as we go.
async fn collect_until_exit(
    engine: &PtyEngine,
    id: Uuid,
    sub: Subscription,
) -> (String, Vec<patchbay_types::ParsedEvent>) {
    let Subscription { replay, mut receiver } = sub;
    let mut text = replay.text;
    let mut next_seq = replay.next_seq;
    let mut events = Vec::new();

    loop {
        match tokio::time::timeout(Duration::from_secs(10), receiver.recv()).await {
            Ok(Ok(SessionEvent::Data { seq, text: chunk })) => {
                if seq < next_seq {
                    continue;
                }
                next_seq = seq + 1;
                let bytes = chunk.len() as u64;
                text.push_str(&chunk);
                let _ = engine.report_consumed(id, bytes);
            }
            Ok(Ok(SessionEvent::Event { event })) => events.push(event),
            Ok(Ok(SessionEvent::Exit)) => break,
            Ok(Err(_)) => break,
            Err(_) => panic!("timed out waiting for session exit"),
        }
    }
    (text, events)
}

#[tokio::test]
async fn test_spawn_list_and_close() {
    let engine = quick_engine();
    let summary = engine.create(sh("sleep 5")).await.unwrap();

    assert_eq!(summary.command, "sh");
    assert_eq!(summary.status, SessionStatus::Running);
    assert_eq!(summary.agent, None);
    assert_eq!((summary.rows, summary.cols), (24, 80));

    let listed = engine.list_active();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, summary.id);

    engine.close(summary.id).await.unwrap();
    assert!(engine.list_active().is_empty());
    assert_eq!(engine.metrics().active_sessions, 0);
}

#[tokio::test]
async fn test_output_streams_with_exit_last() {
    let engine = quick_engine();
    let summary = engine.create(sh("echo hello-from-child")).await.unwrap();
    let sub = engine.subscribe(summary.id).unwrap();

    let (text, _) = collect_until_exit(&engine, summary.id, sub).await;
    assert!(text.contains("hello-from-child"), "output was: {text:?}");

    // Exit was terminal: the session is gone.
    assert!(engine.get_summary(summary.id).unwrap_err().is_not_found());
    assert_eq!(engine.metrics().active_sessions, 0);
}

#[tokio::test]
async fn test_write_reaches_child_stdin() {
    let engine = quick_engine();
    let summary = engine
        .create(sh("read line; echo \"got:$line\""))
        .await
        .unwrap();
    let sub = engine.subscribe(summary.id).unwrap();

    // Give the shell a moment to reach its read.
    tokio::time::sleep(Duration::from_millis(300)).await;
    engine.write(summary.id, b"ping\n").unwrap();

    let (text, _) = collect_until_exit(&engine, summary.id, sub).await;
    assert!(text.contains("got:ping"), "output was: {text:?}");
}

#[tokio::test]
async fn test_replay_covers_output_before_subscribe() {
    let engine = quick_engine();
    let summary = engine.create(sh("echo early-bird; sleep 5")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let sub = engine.subscribe(summary.id).unwrap();
    assert!(
        sub.replay.text.contains("early-bird"),
        "replay was: {:?}",
        sub.replay.text
    );
    let replay_next = sub.replay.next_seq;

    engine.close(summary.id).await.unwrap();

    // Nothing on the live side may predate the snapshot.
    let Subscription { mut receiver, .. } = sub;
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_secs(5), receiver.recv()).await
    {
        match event {
            SessionEvent::Data { seq, .. } => assert!(seq >= replay_next),
            SessionEvent::Exit => break,
            SessionEvent::Event { .. } => {}
        }
    }
}

#[tokio::test]
async fn test_resize_validates_before_lookup() {
    let engine = quick_engine();
    let summary = engine.create(sh("sleep 5")).await.unwrap();

    engine.resize(summary.id, 50, 120).unwrap();
    let resized = engine.get_summary(summary.id).unwrap();
    assert_eq!((resized.rows, resized.cols), (50, 120));

    // Zero dimensions are rejected whether or not the session exists.
    assert!(matches!(
        engine.resize(summary.id, 0, 80),
        Err(EngineError::InvalidDimensions { rows: 0, cols: 80 })
    ));
    assert!(matches!(
        engine.resize(Uuid::new_v4(), 0, 80),
        Err(EngineError::InvalidDimensions { .. })
    ));
    assert!(matches!(
        engine.resize(Uuid::new_v4(), 10, 10),
        Err(EngineError::SessionNotFound(_))
    ));

    engine.close(summary.id).await.unwrap();
}

#[tokio::test]
async fn test_pause_resume_reflect_in_status() {
    let engine = quick_engine();
    let summary = engine.create(sh("sleep 5")).await.unwrap();

    engine.pause(summary.id).unwrap();
    assert_eq!(
        engine.get_summary(summary.id).unwrap().status,
        SessionStatus::Paused
    );
    assert!(engine.metrics().pauses_triggered >= 1);

    engine.resume(summary.id).unwrap();
    assert_eq!(
        engine.get_summary(summary.id).unwrap().status,
        SessionStatus::Running
    );

    engine.close(summary.id).await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let engine = quick_engine();
    let summary = engine.create(sh("sleep 30")).await.unwrap();

    engine.close(summary.id).await.unwrap();
    engine.close(summary.id).await.unwrap();
    engine.close(Uuid::new_v4()).await.unwrap();

    assert!(engine.list_active().is_empty());
    assert_eq!(engine.metrics().active_sessions, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_unblocks_a_stalled_writer() {
    let engine = quick_engine();
    let summary = engine.create(sh("sleep 30")).await.unwrap();
    let id = summary.id;

    // The child never reads, so its pty input buffer fills and this
    // oversized write stalls inside the kernel holding the writer.
    let writer_engine = engine.clone();
    let writer = std::thread::spawn(move || {
        let flood = vec![b'x'; 1024 * 1024];
        // Errors out when teardown drops the master.
        let _ = writer_engine.write(id, &flood);
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Close must not wait for the stalled write to complete.
    tokio::time::timeout(Duration::from_secs(5), engine.close(id))
        .await
        .expect("close blocked behind a stalled writer")
        .unwrap();

    writer.join().unwrap();
    assert_eq!(engine.active_count(), 0);
    assert_eq!(engine.metrics().active_sessions, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_spawn_timeout_reports_and_leaves_engine_clean() {
    let engine = PtyEngine::new(EngineConfig {
        spawn_attempts: 2,
        spawn_timeout: Duration::from_millis(0),
        close_grace: Duration::from_millis(20),
        ..EngineConfig::default()
    });

    let err = engine.create(sh("sleep 30")).await.unwrap_err();
    match err {
        EngineError::SpawnFailed { attempts, message } => {
            assert_eq!(attempts, 2);
            assert!(message.contains("timed out"), "message was: {message:?}");
        }
        other => panic!("unexpected error: {other}"),
    }

    // Nothing was registered; late-finishing attempts are reaped off
    // the registry's books entirely.
    assert_eq!(engine.metrics().failed_spawns, 1);
    assert_eq!(engine.metrics().total_spawned, 0);
    assert_eq!(engine.active_count(), 0);
    assert!(engine.list_active().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_closes_in_arbitrary_order_leak_nothing() {
    let engine = quick_engine();
    let creates = join_all((0..50).map(|_| engine.create(sh("sleep 30"))));
    let ids: Vec<Uuid> = creates
        .await
        .into_iter()
        .map(|r| r.unwrap().id)
        .collect();
    assert_eq!(engine.active_count(), 50);

    // Arbitrary order, with every session closed twice concurrently.
    let mut order: Vec<Uuid> = ids.iter().rev().copied().collect();
    order.extend(ids.iter().copied());

    let results = join_all(order.into_iter().map(|id| engine.close(id))).await;
    assert!(results.into_iter().all(|r| r.is_ok()));

    assert_eq!(engine.active_count(), 0);
    let snap = engine.metrics();
    assert_eq!(snap.total_spawned, 50);
    assert_eq!(snap.active_sessions, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_backpressure_pauses_without_losing_output() {
    let engine = PtyEngine::new(EngineConfig {
        high_watermark: 64,
        low_watermark: 16,
        close_grace: Duration::from_millis(20),
        ..EngineConfig::default()
    });
    let script = "i=1; while [ $i -le 200 ]; do echo line$i; i=$((i+1)); done";
    let summary = engine.create(sh(script)).await.unwrap();
    let Subscription { replay, mut receiver } = engine.subscribe(summary.id).unwrap();

    let mut text = replay.text;
    let mut next_seq = replay.next_seq;
    let mut unreported = 0u64;
    let mut idle_stalls = 0;

    // Consume in bursts: hold consumption until the stream stalls, so
    // the reader must hit the high watermark, then release everything.
    loop {
        match tokio::time::timeout(Duration::from_millis(300), receiver.recv()).await {
            Ok(Ok(SessionEvent::Data { seq, text: chunk })) => {
                if seq < next_seq {
                    continue;
                }
                next_seq = seq + 1;
                unreported += chunk.len() as u64;
                text.push_str(&chunk);
                idle_stalls = 0;
            }
            Ok(Ok(SessionEvent::Event { .. })) => {}
            Ok(Ok(SessionEvent::Exit)) => break,
            Ok(Err(_)) => break,
            Err(_) => {
                if unreported > 0 {
                    engine.report_consumed(summary.id, unreported).unwrap();
                    unreported = 0;
                } else {
                    idle_stalls += 1;
                    assert!(idle_stalls < 30, "stream stalled without exiting");
                }
            }
        }
    }

    // The gate engaged at least once and nothing was lost or reordered.
    assert!(engine.metrics().pauses_triggered >= 1);
    let mut last_pos = 0;
    for i in 1..=200 {
        let needle = format!("line{i}\r\n");
        let pos = text[last_pos..]
            .find(&needle)
            .unwrap_or_else(|| panic!("missing or out of order: {needle:?}"));
        last_pos += pos + needle.len();
    }
}

#[tokio::test]
async fn test_spawn_failure_reports_attempts_and_global_event() {
    let engine = PtyEngine::new(EngineConfig {
        spawn_attempts: 2,
        ..EngineConfig::default()
    });
    let mut global = engine.subscribe_global();

    let err = engine
        .create(SpawnSpec::new("/nonexistent/patchbay-test-binary"))
        .await
        .unwrap_err();
    match err {
        EngineError::SpawnFailed { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("unexpected error: {other}"),
    }

    let snap = engine.metrics();
    assert_eq!(snap.failed_spawns, 1);
    assert_eq!(snap.total_spawned, 0);
    assert_eq!(snap.active_sessions, 0);

    let event = tokio::time::timeout(Duration::from_secs(5), global.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, GlobalEvent::SpawnFailed { .. }));
}

#[tokio::test]
async fn test_empty_command_fails_without_attempts() {
    let engine = quick_engine();
    let err = engine.create(SpawnSpec::new("  ")).await.unwrap_err();
    assert!(matches!(err, EngineError::SpawnFailed { attempts: 0, .. }));
    assert_eq!(engine.metrics().failed_spawns, 1);
}

#[tokio::test]
async fn test_zero_dimension_spawn_rejected() {
    let engine = quick_engine();
    let mut spec = sh("sleep 1");
    spec.rows = 0;
    let err = engine.create(spec).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidDimensions { .. }));
    // Rejected before any attempt was made.
    assert_eq!(engine.metrics().failed_spawns, 0);
}

#[tokio::test]
async fn test_global_lifecycle_events() {
    let engine = quick_engine();
    let mut global = engine.subscribe_global();

    let summary = engine.create(sh("sleep 5")).await.unwrap();
    let started = tokio::time::timeout(Duration::from_secs(5), global.recv())
        .await
        .unwrap()
        .unwrap();
    match started {
        GlobalEvent::SessionStarted { session } => assert_eq!(session.id, summary.id),
        other => panic!("unexpected event: {other:?}"),
    }

    engine.close(summary.id).await.unwrap();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), global.recv())
            .await
            .unwrap()
            .unwrap();
        if let GlobalEvent::SessionExited { session_id } = event {
            assert_eq!(session_id, summary.id);
            break;
        }
    }
}

#[tokio::test]
async fn test_spawn_in_requested_cwd() {
    let engine = quick_engine();
    let dir = tempfile::TempDir::new().unwrap();
    let canonical = dir.path().canonicalize().unwrap();

    let mut spec = sh("pwd");
    spec.cwd = Some(canonical.clone());
    let summary = engine.create(spec).await.unwrap();
    assert_eq!(summary.cwd, canonical);

    let sub = engine.subscribe(summary.id).unwrap();
    let (text, _) = collect_until_exit(&engine, summary.id, sub).await;
    assert!(
        text.contains(canonical.to_str().unwrap()),
        "output was: {text:?}"
    );
}

#[tokio::test]
async fn test_parsed_events_ride_the_session_stream() {
    let engine = quick_engine();
    let summary = engine
        .create(sh("echo 'error: rate limit exceeded, retry in 7 seconds'"))
        .await
        .unwrap();
    let sub = engine.subscribe(summary.id).unwrap();

    let (_, events) = collect_until_exit(&engine, summary.id, sub).await;
    assert!(
        events.iter().any(|e| matches!(
            e,
            patchbay_types::ParsedEvent::RateLimit {
                retry_after: Some(7),
                ..
            }
        )),
        "events were: {events:?}"
    );
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let engine = quick_engine();
    for _ in 0..4 {
        engine.create(sh("sleep 30")).await.unwrap();
    }
    engine.shutdown().await;
    assert_eq!(engine.active_count(), 0);
    assert_eq!(engine.metrics().active_sessions, 0);
}
