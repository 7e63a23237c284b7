//! Process lifecycle: connect, startup probe, terminate.

use usi_bridge::session::LifecycleState;
use usi_bridge::AppError;

use super::test_helpers::{ready_session, start_session};

#[tokio::test]
async fn connect_twice_reports_already_running() {
    let test = start_session(&[]);

    let first = test.session.connect(None).await.expect("connect");
    assert!(first.engine_running);
    assert!(!first.already_running);
    assert!(first.engine_path.ends_with("usi-bridge-mock-engine") || first.engine_path.ends_with("usi-bridge-mock-engine.exe"));

    let second = test.session.connect(None).await.expect("connect again");
    assert!(second.already_running);

    let health = test.session.health().await.expect("health");
    assert_eq!(health.lifecycle, LifecycleState::Starting);
    assert!(health.started_at.is_some());

    test.stop().await;
}

#[tokio::test]
async fn missing_executable_is_a_startup_failure() {
    let test = start_session(&[]);

    let err = test
        .session
        .connect(Some("/definitely/not/here/engine".into()))
        .await
        .expect_err("missing engine");
    assert!(matches!(err, AppError::StartupFailure(_)), "got {err}");

    let health = test.session.health().await.expect("health");
    assert!(!health.engine_running);
    assert_eq!(health.lifecycle, LifecycleState::Disconnected);

    test.stop().await;
}

#[tokio::test]
async fn engine_exiting_during_startup_probe_fails_connect() {
    let test = start_session(&["--exit-on-start", "1"]);

    let err = test.session.connect(None).await.expect_err("early exit");
    assert!(matches!(err, AppError::StartupFailure(_)), "got {err}");
    assert!(!test.session.health().await.expect("health").engine_running);

    test.stop().await;
}

#[tokio::test]
async fn terminate_sends_quit_and_reinitializes() {
    let test = ready_session(&[]).await;

    test.session.terminate().await.expect("terminate");
    let health = test.session.health().await.expect("health");
    assert_eq!(health.lifecycle, LifecycleState::Disconnected);
    assert!(!health.engine_running);
    assert_eq!(health.engine_name, None);
    assert_eq!(health.started_at, None);
    assert_eq!(test.sent_count("quit"), 1);

    test.stop().await;
}

#[tokio::test]
async fn terminate_without_engine_succeeds() {
    let test = start_session(&[]);
    test.session.terminate().await.expect("terminate");
    assert_eq!(
        test.session.health().await.expect("health").lifecycle,
        LifecycleState::Disconnected
    );
    test.stop().await;
}

#[tokio::test]
async fn terminate_fails_an_outstanding_think() {
    let test = ready_session(&["--no-bestmove"]).await;

    let session = test.session.clone();
    let think = tokio::spawn(async move { session.think(5000).await });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    test.session.terminate().await.expect("terminate");
    let err = think.await.expect("join").expect_err("think fails");
    assert!(
        matches!(err, AppError::ProcessCrash(_) | AppError::PipeBroken(_)),
        "got {err}"
    );

    test.stop().await;
}

#[tokio::test]
async fn new_game_requires_handshake() {
    let test = start_session(&[]);
    test.session.connect(None).await.expect("connect");
    let err = test.session.new_game().await.expect_err("not ready");
    assert!(matches!(err, AppError::NotReady(_)));

    test.session.handshake().await.expect("handshake");
    test.session.new_game().await.expect("usinewgame");
    assert_eq!(test.sent_count("usinewgame"), 1);

    test.stop().await;
}
