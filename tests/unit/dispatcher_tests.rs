//! Unit tests for the session data model and response dispatcher.

use usi_bridge::session::state::{DispatchOutcome, SessionState};
use usi_bridge::session::{LifecycleState, Position};
use usi_bridge::usi::{parse_engine_line, EngineLine};

fn feed(state: &mut SessionState, line: &str) -> DispatchOutcome {
    state.apply(&parse_engine_line(line))
}

fn handshaken() -> SessionState {
    let mut state = SessionState::new();
    state.on_process_started();
    state.lifecycle = LifecycleState::AwaitingProtocolOk;
    feed(&mut state, "id name Mock");
    feed(&mut state, "id author Tester");
    feed(&mut state, "usiok");
    state.lifecycle = LifecycleState::AwaitingReadyOk;
    feed(&mut state, "readyok");
    state
}

#[test]
fn new_state_is_disconnected_and_anonymous() {
    let state = SessionState::new();
    assert_eq!(state.lifecycle, LifecycleState::Disconnected);
    assert!(state.identity.name.is_none());
    assert!(!state.handshake_complete());
    assert!(!state.lifecycle.has_process());
}

#[test]
fn full_handshake_reaches_ready() {
    let state = handshaken();
    assert_eq!(state.lifecycle, LifecycleState::Ready);
    assert!(state.handshake_complete());
    assert_eq!(state.identity.name.as_deref(), Some("Mock"));
    assert_eq!(state.identity.author.as_deref(), Some("Tester"));
}

#[test]
fn readyok_before_usiok_does_not_make_ready() {
    let mut state = SessionState::new();
    state.on_process_started();
    let outcome = feed(&mut state, "readyok");
    assert_eq!(
        outcome,
        DispatchOutcome::ReadyOk {
            became_ready: false
        }
    );
    assert_eq!(state.lifecycle, LifecycleState::Starting);
    assert!(!state.handshake_complete());
}

#[test]
fn engine_name_option_fills_the_name() {
    let mut state = SessionState::new();
    assert_eq!(
        feed(
            &mut state,
            "option name Engine_Name type string default dlshogi"
        ),
        DispatchOutcome::Identity
    );
    assert_eq!(state.identity.name.as_deref(), Some("dlshogi"));
}

#[test]
fn bestmove_ordinals_follow_go_count() {
    let mut state = handshaken();
    assert_eq!(state.record_go(), 1);
    assert_eq!(state.record_go(), 2);

    let first = feed(&mut state, "bestmove 7g7f");
    assert!(matches!(first, DispatchOutcome::BestMove { ordinal: Some(1), .. }));
    let second = feed(&mut state, "bestmove 3c3d ponder 2g2f");
    assert_eq!(
        second,
        DispatchOutcome::BestMove {
            ordinal: Some(2),
            best_move: "3c3d".into(),
            ponder: Some("2g2f".into()),
        }
    );
}

#[test]
fn unsolicited_bestmove_has_no_ordinal_and_is_not_counted() {
    let mut state = handshaken();
    let stray = feed(&mut state, "bestmove 7g7f");
    assert!(matches!(stray, DispatchOutcome::BestMove { ordinal: None, .. }));
    assert_eq!(state.bestmoves_seen, 0);

    state.record_go();
    let answer = feed(&mut state, "bestmove 2g2f");
    assert!(matches!(answer, DispatchOutcome::BestMove { ordinal: Some(1), .. }));
}

#[test]
fn unknown_lines_are_ignored() {
    let mut state = handshaken();
    assert_eq!(
        feed(&mut state, "info depth 3 score cp 10"),
        DispatchOutcome::Ignored
    );
    assert_eq!(state.apply(&EngineLine::Other), DispatchOutcome::Ignored);
}

#[test]
fn soft_reset_keeps_identity() {
    let mut state = handshaken();
    state.current_position = Some(Position {
        sfen: "9/9/9/9/9/9/9/9/9 b - 1".into(),
        moves: Vec::new(),
    });
    state.last_position_command = Some("position sfen 9/9/9/9/9/9/9/9/9 b - 1".into());
    state.record_go();

    state.soft_reset(LifecycleState::Crashed);

    assert_eq!(state.lifecycle, LifecycleState::Crashed);
    assert_eq!(state.identity.name.as_deref(), Some("Mock"));
    assert!(!state.handshake_complete());
    assert!(state.last_position_command.is_none());
    assert_eq!(state.go_issued, 0);
    assert_eq!(state.bestmoves_seen, 0);
}

#[test]
fn hard_reset_clears_identity_but_not_request_ids() {
    let mut state = handshaken();
    assert_eq!(state.next_position_id(), 1);
    assert_eq!(state.next_position_id(), 2);

    state.hard_reset();

    assert_eq!(state.lifecycle, LifecycleState::Disconnected);
    assert!(state.identity.name.is_none());
    assert!(state.identity.author.is_none());
    assert_eq!(state.next_position_id(), 3);
}

#[test]
fn lifecycle_names_are_stable() {
    assert_eq!(LifecycleState::AwaitingProtocolOk.as_str(), "awaiting_protocol_ok");
    assert_eq!(LifecycleState::Thinking.to_string(), "thinking");
    assert!(LifecycleState::Thinking.has_process());
    assert!(!LifecycleState::Crashed.has_process());
}
