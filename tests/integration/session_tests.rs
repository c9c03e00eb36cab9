//! Session bridge tests against the fake spawn primitive.
//!
//! Cover the batched read path, the unbatched write path, resize queuing,
//! kill semantics, exit delivery, and failure banners.

use std::collections::HashMap;
use std::time::Duration;

use lane_pty::models::plan::SpawnPlan;
use lane_pty::models::session::{SessionKey, SessionStatus, TerminalSize};
use lane_pty::session::{Session, SessionEvent};
use lane_pty::AppError;

use super::test_helpers::{drain_until_exit, next_event, FakeSpawner, WAIT};

fn plan() -> SpawnPlan {
    SpawnPlan {
        executable: "/bin/bash".into(),
        args: vec!["-l".into(), "-i".into()],
        cwd: None,
        env: HashMap::new(),
    }
}

fn session_with_frame(frame: Duration) -> Session {
    Session::new(SessionKey::lane("lane-a"), TerminalSize::default(), frame)
}

fn session() -> Session {
    session_with_frame(Duration::from_millis(16))
}

async fn launched(spawner: &FakeSpawner, session: &Session) {
    session
        .launch(spawner, &plan(), TerminalSize::default())
        .await
        .expect("launch succeeds");
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn new_session_starts_initializing() {
    let session = session();
    assert_eq!(session.status(), SessionStatus::Initializing);
    assert_eq!(session.pid().await, None);
    assert_eq!(session.key().to_string(), "lane-a");
}

#[tokio::test]
async fn launch_moves_to_ready_and_records_pid() {
    let spawner = FakeSpawner::new();
    let session = session();
    launched(&spawner, &session).await;

    assert_eq!(session.status(), SessionStatus::Ready);
    assert_eq!(session.settled().await, SessionStatus::Ready);
    assert!(session.pid().await.is_some());
    assert_eq!(spawner.last().plan, plan());
}

#[tokio::test]
async fn launch_failure_leaves_session_initializing() {
    let spawner = FakeSpawner::new();
    spawner.fail_on("/bin/bash");
    let session = session();

    let result = session
        .launch(&*spawner, &plan(), TerminalSize::default())
        .await;

    assert!(matches!(result, Err(AppError::Spawn(_))));
    assert_eq!(session.status(), SessionStatus::Initializing);
}

#[tokio::test]
async fn second_launch_is_rejected() {
    let spawner = FakeSpawner::new();
    let session = session();
    launched(&spawner, &session).await;

    let again = session
        .launch(&*spawner, &plan(), TerminalSize::default())
        .await;
    assert!(matches!(again, Err(AppError::Spawn(_))));
    assert_eq!(spawner.spawn_count(), 1);
}

// ── Read path ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn chunks_within_one_frame_are_delivered_together() {
    let spawner = FakeSpawner::new();
    let session = session_with_frame(Duration::from_millis(100));
    launched(&spawner, &session).await;
    let mut events = session.subscribe().await;

    let process = spawner.last();
    process.output(b"hello ");
    process.output(b"wide ");
    process.output(b"world");

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Output(b"hello wide world".to_vec())
    );
    assert!(
        tokio::time::timeout(Duration::from_millis(200), events.recv())
            .await
            .is_err(),
        "one frame must produce exactly one output event"
    );
}

#[tokio::test]
async fn output_is_retained_until_a_subscriber_attaches() {
    let spawner = FakeSpawner::new();
    let session = session();
    launched(&spawner, &session).await;

    spawner.last().output(b"early output");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut events = session.subscribe().await;
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Output(b"early output".to_vec())
    );
}

#[tokio::test]
async fn multibyte_output_survives_chunk_boundaries() {
    let spawner = FakeSpawner::new();
    let session = session();
    launched(&spawner, &session).await;
    let mut events = session.subscribe().await;

    let text = "ünïcødé → ✓".as_bytes();
    let process = spawner.last();
    for byte in text {
        process.output(std::slice::from_ref(byte));
    }
    process.exit(Some(0));

    let (output, code) = drain_until_exit(&mut events).await;
    assert_eq!(output, text);
    assert_eq!(code, Some(0));
}

#[tokio::test]
async fn subscribe_replaces_previous_subscriber() {
    let spawner = FakeSpawner::new();
    let session = session();
    launched(&spawner, &session).await;

    let mut first = session.subscribe().await;
    let mut second = session.subscribe().await;
    spawner.last().output(b"to second");

    assert_eq!(
        next_event(&mut second).await,
        SessionEvent::Output(b"to second".to_vec())
    );
    assert_eq!(first.recv().await, None, "replaced subscriber is closed");
}

// ── Exit ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn exit_follows_final_output_exactly_once() {
    let spawner = FakeSpawner::new();
    let session = session_with_frame(Duration::from_secs(10));
    launched(&spawner, &session).await;
    let mut events = session.subscribe().await;

    let process = spawner.last();
    process.output(b"last words");
    process.exit(Some(3));

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Output(b"last words".to_vec())
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Exited { code: Some(3) }
    );
    assert!(session.wait_exit(WAIT).await);
    assert_eq!(session.status(), SessionStatus::Exited);
    assert_eq!(session.exit_code().await, Some(3));

    session.dispose().await;
    assert_eq!(events.recv().await, None, "no second exit after dispose");
}

#[tokio::test]
async fn late_subscriber_receives_exit() {
    let spawner = FakeSpawner::new();
    let session = session();
    launched(&spawner, &session).await;

    spawner.last().exit(Some(0));
    assert!(session.wait_exit(WAIT).await);

    let mut events = session.subscribe().await;
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Exited { code: Some(0) }
    );

    let mut again = session.subscribe().await;
    assert!(
        again.try_recv().is_err(),
        "exit is delivered to one subscriber only"
    );
}

#[tokio::test]
async fn wait_exit_times_out_while_running() {
    let spawner = FakeSpawner::new();
    let session = session();
    launched(&spawner, &session).await;

    assert!(!session.wait_exit(Duration::from_millis(50)).await);
    assert_eq!(session.status(), SessionStatus::Ready);
}

// ── Write path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn write_forwards_bytes_immediately() {
    let spawner = FakeSpawner::new();
    let session = session_with_frame(Duration::from_secs(10));
    launched(&spawner, &session).await;

    session.write(b"ls -la\r").await.expect("write");
    session.write(b"").await.expect("empty write");

    assert_eq!(spawner.last().log.written(), b"ls -la\r");
}

#[tokio::test]
async fn write_before_spawn_is_a_noop() {
    let session = session();
    session.write(b"too early").await.expect("no-op write");
    assert_eq!(session.status(), SessionStatus::Initializing);
}

#[tokio::test]
async fn write_after_exit_is_a_noop() {
    let spawner = FakeSpawner::new();
    let session = session();
    launched(&spawner, &session).await;
    let process = spawner.last();
    process.exit(Some(0));
    assert!(session.wait_exit(WAIT).await);

    session.write(b"ignored").await.expect("no-op write");
    assert!(process.log.written().is_empty());
}

// ── Resize ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn resize_while_initializing_applies_latest_once() {
    let spawner = FakeSpawner::new();
    let session = session();

    session
        .resize(TerminalSize::new(100, 30).unwrap())
        .await
        .expect("queued");
    session
        .resize(TerminalSize::new(120, 40).unwrap())
        .await
        .expect("queued");
    launched(&spawner, &session).await;

    assert_eq!(
        spawner.last().log.resized(),
        vec![TerminalSize::new(120, 40).unwrap()]
    );
    assert_eq!(session.size().await, TerminalSize::new(120, 40).unwrap());
}

#[tokio::test]
async fn resize_when_ready_forwards_changes_only() {
    let spawner = FakeSpawner::new();
    let session = session();
    launched(&spawner, &session).await;

    let size = TerminalSize::new(132, 43).unwrap();
    session.resize(size).await.expect("resize");
    session.resize(size).await.expect("same size");

    assert_eq!(spawner.last().log.resized(), vec![size]);
    assert_eq!(session.info().await.cols, 132);
}

// ── Kill ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn kill_flushes_buffered_output_first() {
    let spawner = FakeSpawner::new();
    let session = session_with_frame(Duration::from_secs(10));
    launched(&spawner, &session).await;
    let mut events = session.subscribe().await;

    spawner.last().output(b"pending");
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.kill().await;

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Output(b"pending".to_vec())
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Exited { code: Some(137) }
    );
}

#[tokio::test]
async fn kill_is_idempotent() {
    let spawner = FakeSpawner::stubborn();
    let session = session();
    launched(&spawner, &session).await;

    session.kill().await;
    session.kill().await;

    assert_eq!(spawner.last().log.kill_count(), 1);
}

#[tokio::test]
async fn kill_after_exit_is_safe() {
    let spawner = FakeSpawner::new();
    let session = session();
    launched(&spawner, &session).await;
    let process = spawner.last();
    process.exit(Some(0));
    assert!(session.wait_exit(WAIT).await);

    session.kill().await;
    assert_eq!(process.log.kill_count(), 0);
}

#[tokio::test]
async fn kill_during_spawn_is_applied_after_ready() {
    let spawner = FakeSpawner::new();
    let session = session();

    session.kill().await;
    launched(&spawner, &session).await;

    assert_eq!(spawner.last().log.kill_count(), 1);
    assert!(session.wait_exit(WAIT).await);
}

#[tokio::test]
async fn force_kill_stops_process_that_ignores_kill() {
    let spawner = FakeSpawner::stubborn();
    let session = session();
    launched(&spawner, &session).await;

    session.kill().await;
    assert!(!session.wait_exit(Duration::from_millis(50)).await);

    session.force_kill().await;
    assert!(session.wait_exit(WAIT).await);
    assert_eq!(spawner.last().log.force_kill_count(), 1);
    assert_eq!(session.exit_code().await, Some(137));
}

#[tokio::test]
async fn force_kill_before_spawn_is_a_noop() {
    let session = session();
    session.force_kill().await;
    assert_eq!(session.status(), SessionStatus::Initializing);
}

// ── Failure ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fail_renders_banner_into_output() {
    let session = session();
    session
        .fail(&AppError::Spawn("cannot exec /bin/bash".into()))
        .await;

    assert_eq!(session.status(), SessionStatus::Failed);
    assert_eq!(session.settled().await, SessionStatus::Failed);
    assert!(session
        .failure()
        .await
        .is_some_and(|msg| msg.contains("cannot exec")));

    let mut events = session.subscribe().await;
    let SessionEvent::Output(bytes) = next_event(&mut events).await else {
        panic!("expected banner output");
    };
    let banner = String::from_utf8(bytes).unwrap();
    assert!(banner.contains("failed to start terminal"));
    assert!(banner.contains("spawn: cannot exec /bin/bash"));
}

#[tokio::test]
async fn fail_after_ready_is_ignored() {
    let spawner = FakeSpawner::new();
    let session = session();
    launched(&spawner, &session).await;

    session.fail(&AppError::Spawn("late".into())).await;
    assert_eq!(session.status(), SessionStatus::Ready);
    assert_eq!(session.failure().await, None);
}

#[tokio::test]
async fn info_reports_snapshot() {
    let spawner = FakeSpawner::new();
    let session = Session::new(
        SessionKey::tab("lane-a", "2"),
        TerminalSize::new(90, 30).unwrap(),
        Duration::from_millis(16),
    );
    launched(&spawner, &session).await;

    let info = session.info().await;
    assert_eq!(info.key, "lane-a-tab-2");
    assert_eq!(info.status, SessionStatus::Ready);
    assert_eq!((info.cols, info.rows), (80, 24));
    assert!(info.pid.is_some());
    assert_eq!(info.exit_code, None);
    assert_eq!(info.created_at, session.created_at());
}
