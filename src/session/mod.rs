//! Engine sessions.
//!
//! Each configured engine is driven by one actor task that owns every piece
//! of session state: the process handle, lifecycle, identity, the current
//! position, and all outstanding waiters. Callers hold a cheap, cloneable
//! [`EngineSession`] handle and talk to the actor over a bounded command
//! channel with a oneshot reply per request.
//!
//! The actor multiplexes three inputs:
//!
//! - caller commands,
//! - [`ProcessEvent`](crate::usi::ProcessEvent)s from the engine's stdio
//!   tasks and exit monitor, tagged with a process generation,
//! - timer expiries (startup probe, handshake phases, settle windows,
//!   think deadlines, quit grace), each carrying a correlation token.
//!
//! Stale events and stale timers are dropped by token comparison, so a
//! resolution can never be delivered twice or to the wrong caller.

mod actor;
mod handshake;
mod position;
pub mod state;
mod think;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

use crate::{AppError, Result};

pub use position::validate_position;
pub use state::{EngineIdentity, LifecycleState, Position};

/// Capacity of each session's command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Largest think budget accepted by [`EngineSession::think`]: 24 hours.
pub const MAX_THINK_MS: u64 = 86_400_000;

/// Longest delay any session timer is armed with; longer delays are clamped.
pub const MAX_TIMER_DELAY: Duration = Duration::from_millis(2 * MAX_THINK_MS);

/// Timing parameters for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    /// Per-phase handshake timeout.
    pub handshake_timeout: Duration,
    /// Startup probe window after spawn.
    pub startup_probe: Duration,
    /// Settle window after each `position` command.
    pub position_settle: Duration,
    /// Longest a think waits for settling to end.
    pub settle_wait_cap: Duration,
    /// Margin added to every think budget.
    pub think_grace: Duration,
    /// Time between `quit` and a forced kill.
    pub quit_grace: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            startup_probe: Duration::from_millis(500),
            position_settle: Duration::from_millis(500),
            settle_wait_cap: Duration::from_secs(1),
            think_grace: Duration::from_secs(1),
            quit_grace: Duration::from_secs(1),
        }
    }
}

/// Static configuration of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Session name, used in logs and health output.
    pub name: String,
    /// HTTP port the session is served on.
    pub port: u16,
    /// Engine path used when a connect request names none.
    pub engine_path: String,
    /// Extra engine arguments.
    pub engine_args: Vec<String>,
    /// Timing parameters.
    pub timings: SessionTimings,
}

/// Result of a successful connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    /// Resolved executable path of the running engine.
    pub engine_path: String,
    /// Whether the engine accepts input.
    pub engine_running: bool,
    /// True when a process was already present and nothing was spawned.
    pub already_running: bool,
}

/// Result of a handshake request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    /// Handshake completed (`usiok` and `readyok` observed).
    pub ready: bool,
    /// Engine name, when known.
    pub name: Option<String>,
    /// Engine author, when known.
    pub author: Option<String>,
}

/// Successful position request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionAck {
    /// Id assigned to the request.
    pub request_id: u64,
    /// Identical to the last command while settling; nothing was sent.
    pub duplicate: bool,
}

/// Failed position request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionFailure {
    /// Id assigned to the request; `None` if the session was unreachable.
    pub request_id: Option<u64>,
    /// Exact command text, when one was sent.
    pub command: Option<String>,
    /// Why it failed.
    pub error: AppError,
}

/// Outcome of a position request.
pub type PositionResult = std::result::Result<PositionAck, PositionFailure>;

/// Result of a completed think.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkOutcome {
    /// Chosen move (`resign` and `win` included).
    pub best_move: String,
    /// Expected reply, when reported.
    pub ponder: Option<String>,
    /// Position the think started from.
    pub position: Option<Position>,
    /// Time between `go` and `bestmove`.
    pub elapsed: Duration,
}

/// Point-in-time session status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHealth {
    /// A process handle is present.
    pub engine_running: bool,
    /// Handshake complete and the process is in `Ready` or `Thinking`.
    pub engine_ready: bool,
    /// Engine name, when known.
    pub engine_name: Option<String>,
    /// Engine author, when known.
    pub engine_author: Option<String>,
    /// The process accepts input.
    pub engine_alive: bool,
    /// Lifecycle status.
    pub lifecycle: LifecycleState,
    /// A position settle window is open.
    pub settling: bool,
    /// A think is outstanding.
    pub thinking: bool,
    /// Spawn time of the current process.
    pub started_at: Option<DateTime<Utc>>,
}

/// Request sent from a handle to its actor.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Connect {
        engine_path: Option<String>,
        reply: oneshot::Sender<Result<ConnectOutcome>>,
    },
    Handshake {
        reply: oneshot::Sender<Result<HandshakeOutcome>>,
    },
    NewGame {
        reply: oneshot::Sender<Result<()>>,
    },
    SetPosition {
        sfen: String,
        moves: Vec<String>,
        reply: oneshot::Sender<PositionResult>,
    },
    Think {
        time_limit_ms: u64,
        reply: oneshot::Sender<Result<ThinkOutcome>>,
    },
    Terminate {
        reply: oneshot::Sender<Result<()>>,
    },
    Health {
        reply: oneshot::Sender<SessionHealth>,
    },
}

/// Cloneable handle to one engine session actor.
#[derive(Debug, Clone)]
pub struct EngineSession {
    name: Arc<str>,
    port: u16,
    engine_path: Arc<str>,
    tx: mpsc::Sender<SessionCommand>,
}

impl EngineSession {
    /// Spawn the actor for `config`.
    ///
    /// The actor runs until `cancel` fires (or every handle is dropped),
    /// then shuts its engine down with `quit` and a forced kill after the
    /// grace period.
    #[must_use]
    pub fn spawn(config: SessionConfig, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let span = info_span!("engine_session", session = %config.name, port = config.port);
        let handle = Self {
            name: Arc::from(config.name.as_str()),
            port: config.port,
            engine_path: Arc::from(config.engine_path.as_str()),
            tx,
        };
        let actor = actor::SessionActor::new(config, cancel);
        let task = tokio::spawn(actor.run(rx).instrument(span));
        (handle, task)
    }

    /// Session name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// HTTP port the session is served on.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Engine path used when a connect request names none.
    #[must_use]
    pub fn default_engine_path(&self) -> &str {
        &self.engine_path
    }

    /// Spawn the engine unless one is already running.
    ///
    /// # Errors
    ///
    /// `StartupFailure` when the executable is missing, cannot be spawned,
    /// or exits within the startup probe window.
    pub async fn connect(&self, engine_path: Option<String>) -> Result<ConnectOutcome> {
        self.request(|reply| SessionCommand::Connect { engine_path, reply })
            .await?
    }

    /// Run (or join) the `usi`/`isready` handshake.
    ///
    /// # Errors
    ///
    /// `NotRunning`, `HandshakeTimeout`, or `ProcessCrash` when no engine
    /// name is known to fall back on.
    pub async fn handshake(&self) -> Result<HandshakeOutcome> {
        self.request(|reply| SessionCommand::Handshake { reply }).await?
    }

    /// Send `usinewgame`.
    ///
    /// # Errors
    ///
    /// `NotRunning`, `NotReady`, or `PipeBroken`.
    pub async fn new_game(&self) -> Result<()> {
        self.request(|reply| SessionCommand::NewGame { reply }).await?
    }

    /// Set the position to think on.
    ///
    /// Resolves once the settle window has elapsed (or immediately for a
    /// duplicate or a rejected request).
    ///
    /// # Errors
    ///
    /// A [`PositionFailure`] carrying the request id.
    pub async fn set_position(&self, sfen: String, moves: Vec<String>) -> PositionResult {
        match self
            .request(|reply| SessionCommand::SetPosition { sfen, moves, reply })
            .await
        {
            Ok(result) => result,
            Err(error) => Err(PositionFailure {
                request_id: None,
                command: None,
                error,
            }),
        }
    }

    /// Think for `time_limit_ms` and return the engine's move.
    ///
    /// # Errors
    ///
    /// `Validation` for a budget above [`MAX_THINK_MS`]; otherwise
    /// `NotRunning`, `NotReady`, `ThinkInProgress`, `ThinkTimeout`,
    /// `ProcessCrash`, or `PipeBroken`.
    pub async fn think(&self, time_limit_ms: u64) -> Result<ThinkOutcome> {
        self.request(|reply| SessionCommand::Think {
            time_limit_ms,
            reply,
        })
        .await?
    }

    /// Quit the engine and fully reinitialize the session.
    ///
    /// Resolves once the process is gone.
    ///
    /// # Errors
    ///
    /// Only `SessionClosed`.
    pub async fn terminate(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Terminate { reply }).await?
    }

    /// Snapshot of the session status.
    ///
    /// # Errors
    ///
    /// Only `SessionClosed`.
    pub async fn health(&self) -> Result<SessionHealth> {
        self.request(|reply| SessionCommand::Health { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| AppError::SessionClosed(format!("session {} has stopped", self.name)))?;
        rx.await.map_err(|_| {
            AppError::SessionClosed(format!("session {} dropped the request", self.name))
        })
    }
}
