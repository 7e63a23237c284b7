//! Handshake coordinator.
//!
//! `usi` → `usiok` → `isready` → `readyok`, once per process. Concurrent
//! callers join the in-flight handshake and share its resolution. Each
//! phase runs against its own timer; on timeout or process exit a caller
//! still gets a (not-ready) identity when the engine already named itself.

use tokio::sync::oneshot;
use tokio_util::time::delay_queue::Key;
use tracing::{debug, info, warn};

use crate::session::actor::{deliver, HandshakePhase, PendingHandshake, SessionActor, TimerKind};
use crate::session::state::LifecycleState;
use crate::session::HandshakeOutcome;
use crate::usi::process::EngineProcess;
use crate::usi::UsiCommand;
use crate::{AppError, Result};

impl SessionActor {
    pub(super) fn handshake(&mut self, reply: oneshot::Sender<Result<HandshakeOutcome>>) {
        if matches!(
            self.state.lifecycle,
            LifecycleState::Ready | LifecycleState::Thinking
        ) {
            deliver(reply, Ok(self.identity_outcome()));
            return;
        }

        let alive = self.process.as_ref().is_some_and(EngineProcess::is_alive);
        if !alive {
            let result = if self.state.identity.name.is_some() {
                Ok(self.identity_outcome())
            } else {
                Err(AppError::NotRunning("engine is not running".into()))
            };
            deliver(reply, result);
            return;
        }

        if let Some(pending) = self.handshake.as_mut() {
            debug!(phase = pending.phase.token(), "joining handshake in flight");
            pending.waiters.push(reply);
            return;
        }

        self.state.protocol_ok = false;
        self.state.ready_ok = false;
        if let Err(err) = self.live_process().and_then(|p| p.send(&UsiCommand::Usi)) {
            deliver(reply, Err(err));
            return;
        }
        self.state.lifecycle = LifecycleState::AwaitingProtocolOk;
        let timer = self.arm_handshake_timer(HandshakePhase::ProtocolOk);
        self.handshake = Some(PendingHandshake {
            phase: HandshakePhase::ProtocolOk,
            timer,
            waiters: vec![reply],
        });
    }

    pub(super) fn on_protocol_ok(&mut self) {
        let Some(mut pending) = self
            .handshake
            .take_if(|pending| pending.phase == HandshakePhase::ProtocolOk)
        else {
            debug!("usiok outside handshake ignored");
            return;
        };
        self.timers.try_remove(&pending.timer);

        if let Err(err) = self.live_process().and_then(|p| p.send(&UsiCommand::IsReady)) {
            self.handshake = Some(pending);
            self.fail_handshake(&err);
            return;
        }
        self.state.lifecycle = LifecycleState::AwaitingReadyOk;
        pending.phase = HandshakePhase::ReadyOk;
        pending.timer = self.arm_handshake_timer(HandshakePhase::ReadyOk);
        self.handshake = Some(pending);
    }

    pub(super) fn on_ready(&mut self) {
        info!(
            name = ?self.state.identity.name,
            author = ?self.state.identity.author,
            "engine ready"
        );
        let Some(pending) = self.handshake.take() else {
            return;
        };
        self.timers.try_remove(&pending.timer);
        let outcome = self.identity_outcome();
        for waiter in pending.waiters {
            deliver(waiter, Ok(outcome.clone()));
        }
    }

    pub(super) fn on_handshake_timeout(&mut self, generation: u64, phase: HandshakePhase) {
        if generation != self.generation {
            return;
        }
        let Some(pending) = self.handshake.take_if(|pending| pending.phase == phase) else {
            return;
        };

        let timeout_ms = self.config.timings.handshake_timeout.as_millis();
        warn!(phase = phase.token(), timeout_ms, "handshake timed out");
        if self.process.as_ref().is_some_and(EngineProcess::is_alive) {
            self.state.lifecycle = LifecycleState::Starting;
        }

        let err = AppError::HandshakeTimeout(format!(
            "no {} within {timeout_ms} ms",
            phase.token()
        ));
        self.resolve_waiters(pending.waiters, &err);
    }

    /// Resolve an in-flight handshake after a failure.
    pub(super) fn fail_handshake(&mut self, err: &AppError) {
        let Some(pending) = self.handshake.take() else {
            return;
        };
        self.resolve_waiters(pending.waiters, err);
    }

    fn resolve_waiters(
        &self,
        waiters: Vec<oneshot::Sender<Result<HandshakeOutcome>>>,
        err: &AppError,
    ) {
        let result = if self.state.identity.name.is_some() {
            Ok(self.identity_outcome())
        } else {
            Err(err.clone())
        };
        for waiter in waiters {
            deliver(waiter, result.clone());
        }
    }

    fn identity_outcome(&self) -> HandshakeOutcome {
        HandshakeOutcome {
            ready: self.state.handshake_complete()
                && matches!(
                    self.state.lifecycle,
                    LifecycleState::Ready | LifecycleState::Thinking
                ),
            name: self.state.identity.name.clone(),
            author: self.state.identity.author.clone(),
        }
    }

    fn arm_handshake_timer(&mut self, phase: HandshakePhase) -> Key {
        self.arm_timer(
            TimerKind::Handshake {
                generation: self.generation,
                phase,
            },
            self.config.timings.handshake_timeout,
        )
    }
}
