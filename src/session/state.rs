//! Session data model and response dispatcher.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::usi::EngineLine;

/// Lifecycle status for an engine session.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No engine process.
    Disconnected,
    /// Process spawned, handshake not yet started (or abandoned).
    Starting,
    /// `usi` sent, waiting for `usiok`.
    AwaitingProtocolOk,
    /// `isready` sent, waiting for `readyok`.
    AwaitingReadyOk,
    /// Handshake complete, no think outstanding.
    Ready,
    /// `go` sent, waiting for `bestmove`.
    Thinking,
    /// Process exited abnormally.
    Crashed,
}

impl LifecycleState {
    /// Stable lowercase name for logs and health output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Starting => "starting",
            Self::AwaitingProtocolOk => "awaiting_protocol_ok",
            Self::AwaitingReadyOk => "awaiting_ready_ok",
            Self::Ready => "ready",
            Self::Thinking => "thinking",
            Self::Crashed => "crashed",
        }
    }

    /// Whether a process handle must be present in this state.
    #[must_use]
    pub fn has_process(self) -> bool {
        !matches!(self, Self::Disconnected | Self::Crashed)
    }
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine identity learned during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineIdentity {
    /// From `id name` or the `Engine_Name` option.
    pub name: Option<String>,
    /// From `id author`.
    pub author: Option<String>,
}

/// Last accepted position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// SFEN board encoding.
    pub sfen: String,
    /// Moves applied to the SFEN position.
    pub moves: Vec<String>,
}

/// What applying one engine line changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// `id name`, `id author`, or the `Engine_Name` fallback was recorded.
    Identity,
    /// `usiok` observed.
    ProtocolOk,
    /// `readyok` observed.
    ReadyOk {
        /// True when this line moved the session into [`LifecycleState::Ready`].
        became_ready: bool,
    },
    /// `bestmove` observed.
    BestMove {
        /// Which `go` this line answers; `None` when no `go` is unanswered.
        ordinal: Option<u64>,
        /// Chosen move.
        best_move: String,
        /// Expected reply, when reported.
        ponder: Option<String>,
    },
    /// Nothing to act on.
    Ignored,
}

/// Mutable state of one engine session, owned by its actor.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Current lifecycle status.
    pub lifecycle: LifecycleState,
    /// Engine identity; kept across soft resets.
    pub identity: EngineIdentity,
    /// Last accepted position.
    pub current_position: Option<Position>,
    /// Exact text of the most recently sent `position` command.
    pub last_position_command: Option<String>,
    /// Last issued position request id.
    pub position_sequence: u64,
    /// `usiok` observed since the current handshake began.
    pub protocol_ok: bool,
    /// `readyok` observed after `usiok`.
    pub ready_ok: bool,
    /// `go` commands sent since process start.
    pub go_issued: u64,
    /// `bestmove` lines received since process start, capped at `go_issued`.
    pub bestmoves_seen: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Fresh, disconnected state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lifecycle: LifecycleState::Disconnected,
            identity: EngineIdentity::default(),
            current_position: None,
            last_position_command: None,
            position_sequence: 0,
            protocol_ok: false,
            ready_ok: false,
            go_issued: 0,
            bestmoves_seen: 0,
        }
    }

    /// Both handshake acknowledgements seen for the current process.
    #[must_use]
    pub fn handshake_complete(&self) -> bool {
        self.protocol_ok && self.ready_ok
    }

    /// Take the next position request id.
    pub fn next_position_id(&mut self) -> u64 {
        self.position_sequence += 1;
        self.position_sequence
    }

    /// Count a sent `go` and return its sequence number.
    pub fn record_go(&mut self) -> u64 {
        self.go_issued += 1;
        self.go_issued
    }

    /// Reset per-process flags for a newly spawned engine.
    pub fn on_process_started(&mut self) {
        self.lifecycle = LifecycleState::Starting;
        self.protocol_ok = false;
        self.ready_ok = false;
        self.go_issued = 0;
        self.bestmoves_seen = 0;
        self.last_position_command = None;
    }

    /// Reset after an unexpected exit. Identity survives.
    pub fn soft_reset(&mut self, lifecycle: LifecycleState) {
        self.lifecycle = lifecycle;
        self.protocol_ok = false;
        self.ready_ok = false;
        self.go_issued = 0;
        self.bestmoves_seen = 0;
        self.last_position_command = None;
        self.current_position = None;
    }

    /// Full reinitialization. Clears identity; keeps the request sequence
    /// so ids stay unique for the lifetime of the session.
    pub fn hard_reset(&mut self) {
        self.soft_reset(LifecycleState::Disconnected);
        self.identity = EngineIdentity::default();
    }

    /// Apply one classified engine line.
    pub fn apply(&mut self, line: &EngineLine) -> DispatchOutcome {
        match line {
            EngineLine::IdName(name) | EngineLine::EngineNameOption(name) => {
                self.identity.name = Some(name.clone());
                DispatchOutcome::Identity
            }
            EngineLine::IdAuthor(author) => {
                self.identity.author = Some(author.clone());
                DispatchOutcome::Identity
            }
            EngineLine::UsiOk => {
                self.protocol_ok = true;
                DispatchOutcome::ProtocolOk
            }
            EngineLine::ReadyOk => {
                if !self.protocol_ok {
                    return DispatchOutcome::ReadyOk {
                        became_ready: false,
                    };
                }
                self.ready_ok = true;
                let became_ready = matches!(
                    self.lifecycle,
                    LifecycleState::Starting
                        | LifecycleState::AwaitingProtocolOk
                        | LifecycleState::AwaitingReadyOk
                );
                if became_ready {
                    self.lifecycle = LifecycleState::Ready;
                }
                DispatchOutcome::ReadyOk { became_ready }
            }
            EngineLine::BestMove { best_move, ponder } => {
                let ordinal = (self.bestmoves_seen < self.go_issued).then(|| {
                    self.bestmoves_seen += 1;
                    self.bestmoves_seen
                });
                DispatchOutcome::BestMove {
                    ordinal,
                    best_move: best_move.clone(),
                    ponder: ponder.clone(),
                }
            }
            EngineLine::Other => DispatchOutcome::Ignored,
        }
    }
}
