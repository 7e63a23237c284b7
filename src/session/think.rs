//! Think correlator.
//!
//! At most one think is outstanding. The n-th `bestmove` since process
//! start answers the n-th `go`, so each pending think remembers the
//! sequence number of its own `go` and only that ordinal resolves it. A
//! `bestmove` for a think that already timed out is counted, logged, and
//! dropped.
//!
//! No `stop` is sent when a think times out: the engine keeps searching
//! and its eventual answer is discarded by the correlation above.

use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::session::actor::{deliver, DeferredThink, PendingThink, SessionActor, TimerKind};
use crate::session::state::LifecycleState;
use crate::session::{ThinkOutcome, MAX_THINK_MS, MAX_TIMER_DELAY};
use crate::usi::process::EngineProcess;
use crate::usi::UsiCommand;
use crate::{AppError, Result};

impl SessionActor {
    pub(super) fn think(&mut self, time_limit_ms: u64, reply: oneshot::Sender<Result<ThinkOutcome>>) {
        if time_limit_ms > MAX_THINK_MS {
            warn!(time_limit_ms, "think budget rejected");
            deliver(
                reply,
                Err(AppError::Validation(format!(
                    "time limit must be at most {MAX_THINK_MS} ms, got {time_limit_ms}"
                ))),
            );
            return;
        }
        if let Err(err) = self.ready_process() {
            deliver(reply, Err(err));
            return;
        }
        if self.pending_think.is_some() || self.deferred_think.is_some() {
            deliver(reply, Err(think_in_progress()));
            return;
        }

        if self.is_settling() {
            let waiter_id = self.next_waiter_id();
            let timer = self.arm_timer(
                TimerKind::DeferCap { waiter_id },
                self.config.timings.settle_wait_cap,
            );
            debug!(waiter_id, time_limit_ms, "think deferred until position settles");
            self.deferred_think = Some(DeferredThink {
                waiter_id,
                time_limit_ms,
                timer,
                reply,
            });
            return;
        }

        self.start_think(time_limit_ms, reply);
    }

    /// Settling ended; run the deferred think, if any.
    pub(super) fn release_deferred_think(&mut self) {
        let Some(deferred) = self.deferred_think.take() else {
            return;
        };
        self.timers.try_remove(&deferred.timer);
        self.start_think(deferred.time_limit_ms, deferred.reply);
    }

    pub(super) fn on_defer_cap(&mut self, waiter_id: u64) {
        let Some(deferred) = self
            .deferred_think
            .take_if(|deferred| deferred.waiter_id == waiter_id)
        else {
            return;
        };
        warn!(
            waiter_id,
            cap_ms = self.config.timings.settle_wait_cap.as_millis(),
            "position still settling, starting think anyway"
        );
        self.start_think(deferred.time_limit_ms, deferred.reply);
    }

    fn start_think(&mut self, time_limit_ms: u64, reply: oneshot::Sender<Result<ThinkOutcome>>) {
        if let Err(err) = self.ready_process() {
            deliver(reply, Err(err));
            return;
        }
        if self.pending_think.is_some() {
            deliver(reply, Err(think_in_progress()));
            return;
        }

        let command = UsiCommand::go_for_millis(time_limit_ms);
        if let Err(err) = self.live_process().and_then(|p| p.send(&command)) {
            deliver(reply, Err(err));
            return;
        }

        let go_seq = self.state.record_go();
        let deadline = Duration::from_millis(time_limit_ms)
            .saturating_add(self.config.timings.think_grace)
            .min(MAX_TIMER_DELAY);
        let timer = self.arm_timer(TimerKind::ThinkDeadline { go_seq }, deadline);
        self.state.lifecycle = LifecycleState::Thinking;
        info!(go_seq, time_limit_ms, "think started");
        self.pending_think = Some(PendingThink {
            go_seq,
            deadline,
            started_at: Instant::now(),
            position: self.state.current_position.clone(),
            timer,
            reply,
        });
    }

    pub(super) fn on_bestmove(
        &mut self,
        ordinal: Option<u64>,
        best_move: String,
        ponder: Option<String>,
    ) {
        let Some(ordinal) = ordinal else {
            warn!(best_move = %best_move, "bestmove without outstanding go ignored");
            return;
        };
        let Some(think) = self
            .pending_think
            .take_if(|think| think.go_seq == ordinal)
        else {
            info!(ordinal, best_move = %best_move, "late bestmove ignored");
            return;
        };

        self.timers.try_remove(&think.timer);
        self.return_to_ready();
        let elapsed = think.started_at.elapsed();
        info!(
            go_seq = think.go_seq,
            best_move = %best_move,
            elapsed_ms = elapsed.as_millis(),
            "think finished"
        );
        deliver(
            think.reply,
            Ok(ThinkOutcome {
                best_move,
                ponder,
                position: think.position,
                elapsed,
            }),
        );
    }

    pub(super) fn on_think_deadline(&mut self, go_seq: u64) {
        let Some(think) = self.pending_think.take_if(|think| think.go_seq == go_seq) else {
            return;
        };

        let alive = self.process.as_ref().is_some_and(EngineProcess::is_alive);
        let err = if alive {
            warn!(go_seq, deadline_ms = think.deadline.as_millis(), "think timed out");
            AppError::ThinkTimeout(format!(
                "no bestmove within {} ms",
                think.deadline.as_millis()
            ))
        } else {
            AppError::ProcessCrash("engine died during think".into())
        };
        self.return_to_ready();
        deliver(think.reply, Err(err));
    }

    fn return_to_ready(&mut self) {
        if self.state.lifecycle == LifecycleState::Thinking
            && self.process.as_ref().is_some_and(EngineProcess::is_alive)
        {
            self.state.lifecycle = LifecycleState::Ready;
        }
    }
}

fn think_in_progress() -> AppError {
    AppError::ThinkInProgress("another think is already outstanding".into())
}
