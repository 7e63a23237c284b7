//! Position setter behaviour: validation, readiness, dedup, settling.

use std::time::Duration;

use usi_bridge::session::{LifecycleState, SessionTimings};
use usi_bridge::AppError;

use super::test_helpers::{
    fast_timings, ready_session, start_session, start_session_with, wait_for_lifecycle, STARTPOS,
};

#[tokio::test]
async fn identical_position_while_settling_is_suppressed() {
    let test = ready_session(&[]).await;
    let moves = vec!["7g7f".to_owned()];

    let (first, second) = tokio::join!(
        test.session.set_position(STARTPOS.into(), moves.clone()),
        test.session.set_position(STARTPOS.into(), moves.clone()),
    );
    let first = first.expect("first position");
    let second = second.expect("second position");
    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert!(second.request_id > first.request_id);
    assert_eq!(test.sent_count("position"), 1);

    // After settling the same position is sent again.
    let third = test
        .session
        .set_position(STARTPOS.into(), moves)
        .await
        .expect("third position");
    assert!(!third.duplicate);
    assert_eq!(test.sent_count("position"), 2);

    test.stop().await;
}

#[tokio::test]
async fn position_line_is_trimmed_and_joined() {
    let test = ready_session(&[]).await;
    test.session
        .set_position(
            format!("  {STARTPOS} "),
            vec![" 7g7f".to_owned(), "3c3d ".to_owned()],
        )
        .await
        .expect("position");

    let sent = test.sent();
    let expected = format!("position sfen {STARTPOS} moves 7g7f 3c3d");
    assert!(sent.contains(&expected), "sent: {sent:?}");

    test.stop().await;
}

#[tokio::test]
async fn position_without_engine_is_not_running() {
    let test = start_session(&[]);

    let failure = test
        .session
        .set_position(STARTPOS.into(), Vec::new())
        .await
        .expect_err("no engine");
    assert!(matches!(failure.error, AppError::NotRunning(_)));
    assert_eq!(failure.request_id, Some(1));
    assert_eq!(failure.command, None);

    test.stop().await;
}

#[tokio::test]
async fn position_before_handshake_is_not_ready() {
    let test = start_session(&[]);
    test.session.connect(None).await.expect("connect");

    let failure = test
        .session
        .set_position(STARTPOS.into(), Vec::new())
        .await
        .expect_err("not ready");
    assert!(matches!(failure.error, AppError::NotReady(_)));
    assert_eq!(test.sent_count("position"), 0);

    test.stop().await;
}

#[tokio::test]
async fn blank_sfen_is_rejected_with_request_id() {
    let test = ready_session(&[]).await;

    let failure = test
        .session
        .set_position("   ".into(), Vec::new())
        .await
        .expect_err("blank sfen");
    assert!(matches!(failure.error, AppError::Validation(_)));
    assert!(failure.request_id.is_some());
    assert_eq!(test.sent_count("position"), 0);

    test.stop().await;
}

#[tokio::test]
async fn move_with_inner_whitespace_is_rejected() {
    let test = ready_session(&[]).await;

    let failure = test
        .session
        .set_position(STARTPOS.into(), vec!["7g 7f".to_owned()])
        .await
        .expect_err("bad move");
    assert!(matches!(failure.error, AppError::Validation(_)));
    assert_eq!(test.sent_count("position"), 0);

    test.stop().await;
}

#[tokio::test]
async fn engine_crash_after_position_reports_the_command() {
    let test = ready_session(&["--crash-on-position", "2"]).await;

    let failure = test
        .session
        .set_position(STARTPOS.into(), vec!["7g7f".to_owned()])
        .await
        .expect_err("engine crashed");
    assert!(
        matches!(failure.error, AppError::ProcessCrash(_)),
        "got {}",
        failure.error
    );
    let command = failure.command.expect("command is reported");
    assert!(command.starts_with("position sfen "), "command: {command}");

    wait_for_lifecycle(&test.session, LifecycleState::Crashed).await;
    let health = test.session.health().await.expect("health");
    assert!(!health.engine_running);

    test.stop().await;
}

#[tokio::test]
async fn repeat_after_engine_death_is_not_a_duplicate() {
    let timings = SessionTimings {
        position_settle: Duration::from_millis(1000),
        ..fast_timings()
    };
    let test = start_session_with(
        &["--crash-on-position", "3", "--exit-delay-ms", "100"],
        timings,
    );
    test.session.connect(None).await.expect("connect");
    assert!(test.session.handshake().await.expect("handshake").ready);

    let failure = test
        .session
        .set_position(STARTPOS.into(), Vec::new())
        .await
        .expect_err("engine died inside the settle window");
    assert!(matches!(failure.error, AppError::ProcessCrash(_)));

    let failure = test
        .session
        .set_position(STARTPOS.into(), Vec::new())
        .await
        .expect_err("dead engine is never answered from the dedup cache");
    assert!(matches!(failure.error, AppError::NotRunning(_)), "got {}", failure.error);
    assert_eq!(test.sent_count("position"), 1);

    test.stop().await;
}
