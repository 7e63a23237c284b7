//! Session actor: event loop, connect, exit handling, terminate, health.

use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::time::delay_queue::Key;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

use crate::session::state::{DispatchOutcome, LifecycleState, Position, SessionState};
use crate::session::{
    ConnectOutcome, HandshakeOutcome, PositionFailure, PositionResult, SessionCommand,
    SessionConfig, SessionHealth, ThinkOutcome, MAX_TIMER_DELAY,
};
use crate::usi::process::{resolve_engine_path, spawn_engine, EngineProcess, SpawnConfig};
use crate::usi::{parse_engine_line, ProcessEvent, ProcessEventKind, UsiCommand};
use crate::{AppError, Result};

/// Handshake phase a timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum HandshakePhase {
    ProtocolOk,
    ReadyOk,
}

impl HandshakePhase {
    pub(super) fn token(self) -> &'static str {
        match self {
            Self::ProtocolOk => "usiok",
            Self::ReadyOk => "readyok",
        }
    }
}

/// Timer payloads. Each carries the token of the waiter it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TimerKind {
    Startup { generation: u64 },
    Handshake { generation: u64, phase: HandshakePhase },
    Settle { request_id: u64 },
    DeferCap { waiter_id: u64 },
    ThinkDeadline { go_seq: u64 },
    QuitGrace { generation: u64 },
}

pub(super) struct PendingConnect {
    pub(super) generation: u64,
    pub(super) engine_path: String,
    pub(super) reply: oneshot::Sender<Result<ConnectOutcome>>,
}

pub(super) struct PendingHandshake {
    pub(super) phase: HandshakePhase,
    pub(super) timer: Key,
    pub(super) waiters: Vec<oneshot::Sender<Result<HandshakeOutcome>>>,
}

pub(super) struct PendingSettle {
    pub(super) request_id: u64,
    pub(super) command: String,
    pub(super) reply: oneshot::Sender<PositionResult>,
}

pub(super) struct DeferredThink {
    pub(super) waiter_id: u64,
    pub(super) time_limit_ms: u64,
    pub(super) timer: Key,
    pub(super) reply: oneshot::Sender<Result<ThinkOutcome>>,
}

pub(super) struct PendingThink {
    pub(super) go_seq: u64,
    pub(super) deadline: Duration,
    pub(super) started_at: Instant,
    pub(super) position: Option<Position>,
    pub(super) timer: Key,
    pub(super) reply: oneshot::Sender<Result<ThinkOutcome>>,
}

/// Owner of all state for one engine session.
pub(super) struct SessionActor {
    pub(super) config: SessionConfig,
    pub(super) state: SessionState,
    pub(super) process: Option<EngineProcess>,
    pub(super) generation: u64,
    pub(super) event_tx: mpsc::UnboundedSender<ProcessEvent>,
    event_rx: mpsc::UnboundedReceiver<ProcessEvent>,
    pub(super) timers: DelayQueue<TimerKind>,
    pub(super) cancel: CancellationToken,
    pub(super) pending_connect: Option<PendingConnect>,
    pub(super) handshake: Option<PendingHandshake>,
    pub(super) settles: Vec<PendingSettle>,
    pub(super) deferred_think: Option<DeferredThink>,
    pub(super) pending_think: Option<PendingThink>,
    pub(super) next_waiter_id: u64,
    terminating: bool,
    terminate_waiters: Vec<oneshot::Sender<Result<()>>>,
}

/// Send `value` to a waiting caller; a caller that went away is not an error.
pub(super) fn deliver<T>(reply: oneshot::Sender<T>, value: T) {
    if reply.send(value).is_err() {
        debug!("caller went away before its reply was ready");
    }
}

impl SessionActor {
    pub(super) fn new(config: SessionConfig, cancel: CancellationToken) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            state: SessionState::new(),
            process: None,
            generation: 0,
            event_tx,
            event_rx,
            timers: DelayQueue::new(),
            cancel,
            pending_connect: None,
            handshake: None,
            settles: Vec::new(),
            deferred_think: None,
            pending_think: None,
            next_waiter_id: 0,
            terminating: false,
            terminate_waiters: Vec::new(),
        }
    }

    /// Arm a timer, clamping `delay` to [`MAX_TIMER_DELAY`].
    pub(super) fn arm_timer(&mut self, kind: TimerKind, delay: Duration) -> Key {
        self.timers.insert(kind, delay.min(MAX_TIMER_DELAY))
    }

    /// Actor main loop.
    pub(super) async fn run(mut self, mut cmd_rx: mpsc::Receiver<SessionCommand>) {
        info!(engine_path = %self.config.engine_path, "engine session started");

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    debug!("engine session: cancellation received");
                    break;
                }

                Some(event) = self.event_rx.recv() => self.on_process_event(event),

                Some(expired) = self.timers.next(), if !self.timers.is_empty() => {
                    self.on_timer(expired.into_inner());
                }

                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("engine session: all handles dropped");
                        break;
                    };
                    self.on_command(cmd);
                }
            }
        }

        self.shutdown().await;
        info!("engine session stopped");
    }

    fn on_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Connect { engine_path, reply } => self.connect(engine_path, reply),
            SessionCommand::Handshake { reply } => self.handshake(reply),
            SessionCommand::NewGame { reply } => deliver(reply, self.new_game()),
            SessionCommand::SetPosition { sfen, moves, reply } => {
                self.set_position(&sfen, moves, reply);
            }
            SessionCommand::Think {
                time_limit_ms,
                reply,
            } => self.think(time_limit_ms, reply),
            SessionCommand::Terminate { reply } => self.terminate(reply),
            SessionCommand::Health { reply } => deliver(reply, self.health()),
        }
    }

    fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Startup { generation } => self.on_startup_probe(generation),
            TimerKind::Handshake { generation, phase } => {
                self.on_handshake_timeout(generation, phase);
            }
            TimerKind::Settle { request_id } => self.on_settle_elapsed(request_id),
            TimerKind::DeferCap { waiter_id } => self.on_defer_cap(waiter_id),
            TimerKind::ThinkDeadline { go_seq } => self.on_think_deadline(go_seq),
            TimerKind::QuitGrace { generation } => self.on_quit_grace(generation),
        }
    }

    // ── Process events ───────────────────────────────────────────────────────

    fn on_process_event(&mut self, event: ProcessEvent) {
        if event.generation != self.generation || self.process.is_none() {
            debug!(generation = event.generation, "stale process event ignored");
            return;
        }

        match event.kind {
            ProcessEventKind::Line(line) => self.on_engine_line(&line),
            ProcessEventKind::StdoutClosed { reason } => {
                debug!(reason = %reason, "engine stdout closed");
            }
            ProcessEventKind::WriteFailed(err) => {
                warn!(error = %err, "engine stdin broken, killing process");
                if let Some(process) = self.process.as_mut() {
                    process.mark_pipe_broken();
                    process.kill();
                }
            }
            ProcessEventKind::Exited { code, reason } => self.on_process_exit(code, &reason),
        }
    }

    fn on_engine_line(&mut self, line: &str) {
        let parsed = parse_engine_line(line);
        match self.state.apply(&parsed) {
            DispatchOutcome::Identity => {
                debug!(
                    name = ?self.state.identity.name,
                    author = ?self.state.identity.author,
                    "engine identity updated"
                );
            }
            DispatchOutcome::ProtocolOk => self.on_protocol_ok(),
            DispatchOutcome::ReadyOk { became_ready } => {
                if became_ready {
                    self.on_ready();
                } else {
                    debug!(lifecycle = %self.state.lifecycle, "readyok ignored");
                }
            }
            DispatchOutcome::BestMove {
                ordinal,
                best_move,
                ponder,
            } => self.on_bestmove(ordinal, best_move, ponder),
            DispatchOutcome::Ignored => debug!(line, "engine line ignored"),
        }
    }

    fn on_process_exit(&mut self, code: Option<i32>, reason: &str) {
        let Some(process) = self.process.take() else {
            return;
        };

        let crash = if process.pipe_broken() {
            AppError::PipeBroken(format!("engine stdin failed, then {reason}"))
        } else {
            AppError::ProcessCrash(format!("engine {reason}"))
        };
        drop(process);
        self.timers.clear();

        if let Some(pending) = self.pending_connect.take() {
            deliver(
                pending.reply,
                Err(AppError::StartupFailure(format!(
                    "engine exited during startup probe: {reason}"
                ))),
            );
        }
        self.fail_handshake(&crash);
        for settle in self.settles.drain(..) {
            deliver(
                settle.reply,
                Err(PositionFailure {
                    request_id: Some(settle.request_id),
                    command: Some(settle.command),
                    error: crash.clone(),
                }),
            );
        }
        if let Some(deferred) = self.deferred_think.take() {
            deliver(deferred.reply, Err(crash.clone()));
        }
        if let Some(think) = self.pending_think.take() {
            warn!(go_seq = think.go_seq, ?code, "engine exited during think");
            deliver(think.reply, Err(crash));
        }

        if self.terminating {
            self.terminating = false;
            self.state.hard_reset();
            info!(?code, "engine quit, session reinitialized");
            for waiter in self.terminate_waiters.drain(..) {
                deliver(waiter, Ok(()));
            }
        } else if code == Some(0) {
            self.state.soft_reset(LifecycleState::Disconnected);
            info!("engine exited cleanly");
        } else {
            self.state.soft_reset(LifecycleState::Crashed);
            warn!(?code, reason, "engine crashed");
        }
    }

    // ── Connect ──────────────────────────────────────────────────────────────

    fn connect(
        &mut self,
        engine_path: Option<String>,
        reply: oneshot::Sender<Result<ConnectOutcome>>,
    ) {
        if let Some(process) = &self.process {
            deliver(
                reply,
                Ok(ConnectOutcome {
                    engine_path: process.path().display().to_string(),
                    engine_running: process.is_alive(),
                    already_running: true,
                }),
            );
            return;
        }

        let raw = engine_path
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.config.engine_path.clone());
        let path = match resolve_engine_path(&raw) {
            Ok(path) => path,
            Err(err) => {
                warn!(engine_path = %raw, error = %err, "connect rejected");
                deliver(reply, Err(err));
                return;
            }
        };

        let generation = self.generation + 1;
        let spawn_config = SpawnConfig {
            engine_path: path,
            engine_args: self.config.engine_args.clone(),
        };
        let process = match spawn_engine(
            &spawn_config,
            generation,
            self.event_tx.clone(),
            &self.cancel,
        ) {
            Ok(process) => process,
            Err(err) => {
                warn!(error = %err, "engine spawn failed");
                deliver(reply, Err(err));
                return;
            }
        };

        self.generation = generation;
        let engine_path = process.path().display().to_string();
        self.process = Some(process);
        self.state.on_process_started();
        self.arm_timer(
            TimerKind::Startup { generation },
            self.config.timings.startup_probe,
        );
        self.pending_connect = Some(PendingConnect {
            generation,
            engine_path,
            reply,
        });
    }

    fn on_startup_probe(&mut self, generation: u64) {
        let Some(pending) = self
            .pending_connect
            .take_if(|pending| pending.generation == generation)
        else {
            return;
        };

        let alive = self.process.as_ref().is_some_and(EngineProcess::is_alive);
        let result = if alive {
            info!(engine_path = %pending.engine_path, "engine connected");
            Ok(ConnectOutcome {
                engine_path: pending.engine_path,
                engine_running: true,
                already_running: false,
            })
        } else {
            Err(AppError::StartupFailure(format!(
                "engine exited during startup probe: {}",
                pending.engine_path
            )))
        };
        deliver(pending.reply, result);
    }

    // ── New game / terminate / health ────────────────────────────────────────

    /// The process, if present and accepting input.
    pub(super) fn live_process(&self) -> Result<&EngineProcess> {
        match &self.process {
            Some(process) if process.is_alive() => Ok(process),
            _ => Err(AppError::NotRunning("engine is not running".into())),
        }
    }

    /// Alive and handshake complete.
    pub(super) fn ready_process(&self) -> Result<&EngineProcess> {
        let process = self.live_process()?;
        if !self.state.handshake_complete() {
            return Err(AppError::NotReady("handshake has not completed".into()));
        }
        Ok(process)
    }

    fn new_game(&self) -> Result<()> {
        self.ready_process()?.send(&UsiCommand::UsiNewGame)
    }

    fn terminate(&mut self, reply: oneshot::Sender<Result<()>>) {
        let Some(process) = &self.process else {
            self.state.hard_reset();
            info!("no engine running, session reinitialized");
            deliver(reply, Ok(()));
            return;
        };

        self.terminate_waiters.push(reply);
        if self.terminating {
            return;
        }
        self.terminating = true;
        if let Err(err) = process.send(&UsiCommand::Quit) {
            debug!(error = %err, "quit not delivered, killing directly");
            process.kill();
        }
        self.arm_timer(
            TimerKind::QuitGrace {
                generation: self.generation,
            },
            self.config.timings.quit_grace,
        );
    }

    fn on_quit_grace(&mut self, generation: u64) {
        if generation != self.generation {
            return;
        }
        if let Some(process) = &self.process {
            warn!("engine did not quit within grace period, forcing kill");
            process.kill();
        }
    }

    fn health(&self) -> SessionHealth {
        let lifecycle = self.state.lifecycle;
        SessionHealth {
            engine_running: self.process.is_some(),
            engine_ready: self.state.handshake_complete()
                && matches!(lifecycle, LifecycleState::Ready | LifecycleState::Thinking),
            engine_name: self.state.identity.name.clone(),
            engine_author: self.state.identity.author.clone(),
            engine_alive: self.process.as_ref().is_some_and(EngineProcess::is_alive),
            lifecycle,
            settling: self.is_settling(),
            thinking: self.pending_think.is_some(),
            started_at: self.process.as_ref().map(EngineProcess::started_at),
        }
    }

    /// A position settle window is open.
    pub(super) fn is_settling(&self) -> bool {
        !self.settles.is_empty()
    }

    pub(super) fn next_waiter_id(&mut self) -> u64 {
        self.next_waiter_id += 1;
        self.next_waiter_id
    }

    async fn shutdown(&mut self) {
        let closed = AppError::SessionClosed("session is shutting down".into());
        self.timers.clear();
        if let Some(pending) = self.pending_connect.take() {
            deliver(pending.reply, Err(closed.clone()));
        }
        self.fail_handshake(&closed);
        for settle in self.settles.drain(..) {
            deliver(
                settle.reply,
                Err(PositionFailure {
                    request_id: Some(settle.request_id),
                    command: Some(settle.command),
                    error: closed.clone(),
                }),
            );
        }
        if let Some(deferred) = self.deferred_think.take() {
            deliver(deferred.reply, Err(closed.clone()));
        }
        if let Some(think) = self.pending_think.take() {
            deliver(think.reply, Err(closed));
        }

        if let Some(process) = self.process.take() {
            process.shutdown(self.config.timings.quit_grace).await;
        }
        self.state.hard_reset();
        for waiter in self.terminate_waiters.drain(..) {
            deliver(waiter, Ok(()));
        }
    }
}
