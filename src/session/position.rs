//! Position setter: validation, duplicate suppression, settle windows.

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::session::actor::{deliver, PendingSettle, SessionActor, TimerKind};
use crate::session::state::Position;
use crate::session::{PositionAck, PositionFailure, PositionResult};
use crate::usi::process::EngineProcess;
use crate::usi::UsiCommand;
use crate::{AppError, Result};

/// Minimum whitespace-separated fields of a well-formed SFEN.
const SFEN_FIELDS: usize = 4;

/// Structural checks on a position request.
///
/// Rejects a blank SFEN and anything that would break line framing on the
/// engine's stdin: line breaks in the SFEN, and line breaks or inner
/// whitespace in a move. Board legality is the engine's business.
///
/// # Errors
///
/// `AppError::Validation` describing the first offending field.
pub fn validate_position(sfen: &str, moves: &[String]) -> Result<()> {
    if sfen.trim().is_empty() {
        return Err(AppError::Validation("sfen is required".into()));
    }
    if sfen.contains(['\r', '\n']) {
        return Err(AppError::Validation("sfen must not contain line breaks".into()));
    }
    for (index, mv) in moves.iter().enumerate() {
        if mv.is_empty() {
            return Err(AppError::Validation(format!("move {index} is empty")));
        }
        if mv.chars().any(char::is_whitespace) {
            return Err(AppError::Validation(format!(
                "move {index} must not contain whitespace: {mv:?}"
            )));
        }
    }
    Ok(())
}

impl SessionActor {
    pub(super) fn set_position(
        &mut self,
        sfen: &str,
        moves: Vec<String>,
        reply: oneshot::Sender<PositionResult>,
    ) {
        let request_id = self.state.next_position_id();
        let sfen = sfen.trim().to_owned();
        let moves: Vec<String> = moves.into_iter().map(|m| m.trim().to_owned()).collect();
        let command = UsiCommand::Position {
            sfen: sfen.clone(),
            moves: moves.clone(),
        };
        let line = command.to_string();

        if self.is_settling()
            && self.live_process().is_ok()
            && self.state.last_position_command.as_deref() == Some(line.as_str())
        {
            info!(request_id, "duplicate position suppressed");
            deliver(
                reply,
                Ok(PositionAck {
                    request_id,
                    duplicate: true,
                }),
            );
            return;
        }

        let reject = |error: AppError| PositionFailure {
            request_id: Some(request_id),
            command: None,
            error,
        };

        if let Err(error) = validate_position(&sfen, &moves) {
            warn!(request_id, error = %error, "position rejected");
            deliver(reply, Err(reject(error)));
            return;
        }
        if sfen.split_whitespace().count() < SFEN_FIELDS {
            warn!(request_id, sfen = %sfen, "sfen has fewer than {SFEN_FIELDS} fields, sending anyway");
        }
        if let Err(error) = self.ready_process() {
            debug!(request_id, error = %error, "position refused");
            deliver(reply, Err(reject(error)));
            return;
        }

        self.state.current_position = Some(Position { sfen, moves });
        self.state.last_position_command = Some(line.clone());
        if let Err(error) = self.live_process().and_then(|p| p.send(&command)) {
            self.state.last_position_command = None;
            warn!(request_id, error = %error, "position not delivered");
            deliver(
                reply,
                Err(PositionFailure {
                    request_id: Some(request_id),
                    command: Some(line),
                    error,
                }),
            );
            return;
        }

        self.arm_timer(
            TimerKind::Settle { request_id },
            self.config.timings.position_settle,
        );
        self.settles.push(PendingSettle {
            request_id,
            command: line,
            reply,
        });
    }

    pub(super) fn on_settle_elapsed(&mut self, request_id: u64) {
        let Some(index) = self
            .settles
            .iter()
            .position(|settle| settle.request_id == request_id)
        else {
            return;
        };
        let settle = self.settles.remove(index);

        let result = if self.process.as_ref().is_some_and(EngineProcess::is_alive) {
            debug!(request_id, "position settled");
            Ok(PositionAck {
                request_id,
                duplicate: false,
            })
        } else {
            Err(PositionFailure {
                request_id: Some(request_id),
                error: AppError::ProcessCrash(format!(
                    "engine died after `{}`",
                    settle.command
                )),
                command: Some(settle.command),
            })
        };
        deliver(settle.reply, result);

        if !self.is_settling() {
            self.release_deferred_think();
        }
    }
}
