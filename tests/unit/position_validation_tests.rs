//! Unit tests for structural position validation.

use usi_bridge::session::validate_position;
use usi_bridge::AppError;

const STARTPOS: &str = "lnsgkgsnl/1r5b1/ppppppppp/9/9/9/PPPPPPPPP/1B5R1/LNSGKGSNL b - 1";

fn moves(list: &[&str]) -> Vec<String> {
    list.iter().map(|m| (*m).to_owned()).collect()
}

#[test]
fn well_formed_position_passes() {
    assert!(validate_position(STARTPOS, &[]).is_ok());
    assert!(validate_position(STARTPOS, &moves(&["7g7f", "3c3d", "P*5e"])).is_ok());
}

#[test]
fn blank_sfen_is_rejected() {
    let err = validate_position("   ", &[]).expect_err("blank");
    assert!(matches!(err, AppError::Validation(ref msg) if msg.contains("sfen")));
}

#[test]
fn line_break_in_sfen_is_rejected() {
    let sfen = format!("{STARTPOS}\ngo byoyomi 1");
    assert!(matches!(
        validate_position(&sfen, &[]),
        Err(AppError::Validation(_))
    ));
}

#[test]
fn whitespace_inside_a_move_is_rejected() {
    let err = validate_position(STARTPOS, &moves(&["7g7f", "3c 3d"])).expect_err("space");
    assert!(matches!(err, AppError::Validation(ref msg) if msg.contains("move 1")));

    let err = validate_position(STARTPOS, &moves(&["7g7f\r\nquit"])).expect_err("crlf");
    assert!(matches!(err, AppError::Validation(_)));
}

#[test]
fn empty_move_is_rejected() {
    assert!(matches!(
        validate_position(STARTPOS, &moves(&["7g7f", ""])),
        Err(AppError::Validation(_))
    ));
}

#[test]
fn short_sfen_is_structurally_accepted() {
    // Fewer than four fields only warns when sent.
    assert!(validate_position("9/9/9/9/9/9/9/9/9", &[]).is_ok());
}
