//! Handshake coordinator behaviour against the mock engine.

use std::time::Duration;

use usi_bridge::session::{LifecycleState, SessionTimings};
use usi_bridge::AppError;

use super::test_helpers::{fast_timings, start_session, start_session_with, wait_for_lifecycle};

fn short_handshake() -> SessionTimings {
    SessionTimings {
        handshake_timeout: Duration::from_millis(300),
        ..fast_timings()
    }
}

#[tokio::test]
async fn concurrent_callers_share_one_handshake() {
    let test = start_session(&[]);
    test.session.connect(None).await.expect("connect");

    let (a, b) = tokio::join!(test.session.handshake(), test.session.handshake());
    let a = a.expect("first caller");
    let b = b.expect("second caller");
    assert!(a.ready && b.ready);
    assert_eq!(a, b);
    assert_eq!(test.sent_count("usi"), 1, "usi must be sent once");
    assert_eq!(test.sent_count("isready"), 1);

    test.stop().await;
}

#[tokio::test]
async fn completed_handshake_is_answered_from_cache() {
    let test = start_session(&[]);
    test.session.connect(None).await.expect("connect");
    test.session.handshake().await.expect("first");

    let again = test.session.handshake().await.expect("second");
    assert!(again.ready);
    assert_eq!(again.name.as_deref(), Some("MockEngine"));
    assert_eq!(test.sent_count("usi"), 1);

    test.stop().await;
}

#[tokio::test]
async fn engine_name_option_is_used_when_id_name_is_missing() {
    let test = start_session(&["--option-name", "--name", "dlshogi"]);
    test.session.connect(None).await.expect("connect");

    let hs = test.session.handshake().await.expect("handshake");
    assert!(hs.ready);
    assert_eq!(hs.name.as_deref(), Some("dlshogi"));

    test.stop().await;
}

#[tokio::test]
async fn exit_before_readyok_with_known_name_reports_not_ready() {
    let test = start_session(&["--name", "Foo", "--exit-before-readyok", "3"]);
    test.session.connect(None).await.expect("connect");

    let hs = test.session.handshake().await.expect("identity fallback");
    assert!(!hs.ready);
    assert_eq!(hs.name.as_deref(), Some("Foo"));

    wait_for_lifecycle(&test.session, LifecycleState::Crashed).await;
    let health = test.session.health().await.expect("health");
    assert!(!health.engine_running);
    assert_eq!(health.engine_name.as_deref(), Some("Foo"));

    // Dead engine with a known name: answered from cache.
    let cached = test.session.handshake().await.expect("cached identity");
    assert!(!cached.ready);
    assert_eq!(cached.name.as_deref(), Some("Foo"));

    test.stop().await;
}

#[tokio::test]
async fn silent_engine_times_out_without_identity() {
    let test = start_session_with(&["--silent"], short_handshake());
    test.session.connect(None).await.expect("connect");

    let err = test.session.handshake().await.expect_err("timeout");
    assert!(matches!(err, AppError::HandshakeTimeout(_)), "got {err}");

    let health = test.session.health().await.expect("health");
    assert_eq!(health.lifecycle, LifecycleState::Starting);
    assert!(health.engine_alive);

    // A later attempt starts over from `usi`.
    let err = test.session.handshake().await.expect_err("timeout again");
    assert!(matches!(err, AppError::HandshakeTimeout(_)));
    assert_eq!(test.sent_count("usi"), 2);

    test.stop().await;
}

#[tokio::test]
async fn missing_usiok_with_known_name_reports_not_ready() {
    let test = start_session_with(&["--no-usiok", "--name", "Half"], short_handshake());
    test.session.connect(None).await.expect("connect");

    let hs = test.session.handshake().await.expect("identity fallback");
    assert!(!hs.ready);
    assert_eq!(hs.name.as_deref(), Some("Half"));
    assert_eq!(test.sent_count("isready"), 0);

    test.stop().await;
}

#[tokio::test]
async fn handshake_without_engine_is_not_running() {
    let test = start_session(&[]);
    let err = test.session.handshake().await.expect_err("no engine");
    assert!(matches!(err, AppError::NotRunning(_)));
    test.stop().await;
}

#[tokio::test]
async fn engine_exiting_before_identity_fails_the_handshake() {
    let test = start_session(&["--exit-on-usi", "4"]);
    test.session.connect(None).await.expect("connect");

    let err = test.session.handshake().await.expect_err("engine died");
    assert!(matches!(err, AppError::ProcessCrash(_)), "got {err}");

    wait_for_lifecycle(&test.session, LifecycleState::Crashed).await;
    let health = test.session.health().await.expect("health");
    assert_eq!(health.engine_name, None);
    assert!(!health.engine_running);

    // Reconnect runs the handshake from the start again.
    test.session.connect(None).await.expect("reconnect");
    let err = test.session.handshake().await.expect_err("engine died again");
    assert!(matches!(err, AppError::ProcessCrash(_)), "got {err}");
    assert_eq!(test.sent_count("usi"), 2);

    test.stop().await;
}
