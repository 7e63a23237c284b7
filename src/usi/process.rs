//! USI engine process supervisor.
//!
//! Spawns engine executables with:
//! - the working directory set to the executable's own directory, so an
//!   engine can find its evaluation files and shared libraries next to it;
//! - piped stdio wired into reader, writer, and stderr tasks;
//! - `kill_on_drop(true)` so a dropped handle never leaks a process;
//! - an exit monitor that owns the [`Child`] and reports its exit.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::usi::reader::{run_reader, run_stderr_logger};
use crate::usi::writer::run_writer;
use crate::usi::{ProcessEvent, ProcessEventKind, UsiCommand};
use crate::{AppError, Result};

/// Time allowed for the process to be reaped after a forced kill.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// How long the exit monitor waits for stdout to drain before reporting.
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

// ── Path resolution ──────────────────────────────────────────────────────────

/// Resolve an engine path to an absolute, normalised location.
///
/// Relative paths are resolved against the current working directory and
/// `.`/`..` components are folded lexically.
///
/// # Errors
///
/// - `AppError::StartupFailure("engine path is empty")`: blank input.
/// - `AppError::StartupFailure("engine executable not found: …")`: nothing
///   exists at the resolved path, or it is a directory.
pub fn resolve_engine_path(raw: &str) -> Result<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::StartupFailure("engine path is empty".into()));
    }

    let path = Path::new(raw);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|err| AppError::StartupFailure(format!("cannot read current dir: {err}")))?
            .join(path)
    };
    let normalized = normalize_lexically(&absolute);

    if !normalized.is_file() {
        return Err(AppError::StartupFailure(format!(
            "engine executable not found: {}",
            normalized.display()
        )));
    }

    Ok(normalized)
}

/// Fold `.` and `..` components without touching the file system.
#[must_use]
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

// ── Process handle ───────────────────────────────────────────────────────────

/// Live handle to one spawned engine process.
///
/// The [`Child`] itself lives in the exit monitor task; the handle keeps
/// the channels needed to talk to it and to observe its death.
#[derive(Debug)]
pub struct EngineProcess {
    generation: u64,
    pid: Option<u32>,
    path: PathBuf,
    started_at: DateTime<Utc>,
    cmd_tx: mpsc::UnboundedSender<String>,
    exited: CancellationToken,
    kill: CancellationToken,
    io_cancel: CancellationToken,
    pipe_broken: bool,
}

impl EngineProcess {
    /// Process incarnation number.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// OS process id, when known.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Resolved executable path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wall-clock spawn time.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether commands may still be sent.
    ///
    /// False once the process has been observed exiting, once the writer
    /// task has stopped accepting input, or after a failed write.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.exited.is_cancelled() && !self.cmd_tx.is_closed() && !self.pipe_broken
    }

    /// Whether a write to stdin has failed.
    #[must_use]
    pub fn pipe_broken(&self) -> bool {
        self.pipe_broken
    }

    /// Record that a write to stdin failed.
    pub fn mark_pipe_broken(&mut self) {
        self.pipe_broken = true;
    }

    /// Queue a command for the writer task. Never waits on the pipe.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PipeBroken` if the process is no longer alive or
    /// the writer task has gone away.
    pub fn send(&self, command: &UsiCommand) -> Result<()> {
        if !self.is_alive() {
            return Err(AppError::PipeBroken(format!(
                "engine not accepting input, dropped `{}`",
                command.kind()
            )));
        }
        let line = command.to_string();
        info!(generation = self.generation, command = %line, "-> engine");
        self.cmd_tx
            .send(line)
            .map_err(|_| AppError::PipeBroken("engine stdin writer has stopped".into()))
    }

    /// Force-kill the process. Idempotent.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Resolves once the exit monitor has observed the process exit.
    pub async fn wait_exited(&self) {
        self.exited.cancelled().await;
    }

    /// Send `quit`, wait up to `grace`, then kill if still running.
    pub async fn shutdown(&self, grace: Duration) {
        if self.send(&UsiCommand::Quit).is_err() {
            debug!(generation = self.generation, "quit not delivered, killing directly");
        }
        if tokio::time::timeout(grace, self.wait_exited()).await.is_err() {
            warn!(
                generation = self.generation,
                "engine did not exit within grace period, forcing kill"
            );
            self.kill();
            if tokio::time::timeout(KILL_REAP_TIMEOUT, self.wait_exited())
                .await
                .is_err()
            {
                warn!(generation = self.generation, "engine still not reaped after kill");
            }
        }
        self.io_cancel.cancel();
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        // Nobody can talk to the engine once the handle is gone.
        self.io_cancel.cancel();
        self.kill.cancel();
    }
}

// ── Spawner ──────────────────────────────────────────────────────────────────

/// Spawn configuration for one engine launch.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Absolute, normalised executable path (see [`resolve_engine_path`]).
    pub engine_path: PathBuf,
    /// Extra command-line arguments.
    pub engine_args: Vec<String>,
}

/// Spawn an engine and wire its stdio into background tasks.
///
/// Every task reports through `event_tx` tagged with `generation`.
///
/// # Errors
///
/// - `AppError::StartupFailure("failed to spawn engine: …")`: OS spawn failure.
/// - `AppError::StartupFailure("failed to capture engine …")`: a stdio pipe
///   was not created.
pub fn spawn_engine(
    config: &SpawnConfig,
    generation: u64,
    event_tx: mpsc::UnboundedSender<ProcessEvent>,
    parent_cancel: &CancellationToken,
) -> Result<EngineProcess> {
    let working_dir = config
        .engine_path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let mut cmd = Command::new(&config.engine_path);
    cmd.args(&config.engine_args)
        .current_dir(&working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::StartupFailure(format!("failed to spawn engine: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::StartupFailure("failed to capture engine stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::StartupFailure("failed to capture engine stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::StartupFailure("failed to capture engine stderr".into()))?;

    let pid = child.id();
    info!(
        generation,
        pid = pid.unwrap_or(0),
        path = %config.engine_path.display(),
        cwd = %working_dir.display(),
        "engine process spawned"
    );

    let io_cancel = parent_cancel.child_token();
    let exited = CancellationToken::new();
    let kill = CancellationToken::new();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    let reader = tokio::spawn(run_reader(
        generation,
        stdout,
        event_tx.clone(),
        io_cancel.clone(),
    ));
    tokio::spawn(run_stderr_logger(generation, stderr, io_cancel.clone()));
    tokio::spawn(run_writer(
        generation,
        stdin,
        cmd_rx,
        event_tx.clone(),
        io_cancel.clone(),
    ));
    drop(monitor_exit(
        generation,
        child,
        reader,
        event_tx,
        kill.clone(),
        exited.clone(),
    ));

    Ok(EngineProcess {
        generation,
        pid,
        path: config.engine_path.clone(),
        started_at: Utc::now(),
        cmd_tx,
        exited,
        kill,
        io_cancel,
        pipe_broken: false,
    })
}

// ── Exit monitor ─────────────────────────────────────────────────────────────

/// Spawn a background task that awaits child exit (or a kill request) and
/// emits [`ProcessEventKind::Exited`].
///
/// `exited` is cancelled as soon as the child is reaped so liveness checks
/// flip early. The event itself waits (bounded) for the stdout reader to
/// finish, so every line the engine printed before dying reaches the
/// session ahead of the exit.
#[must_use]
pub fn monitor_exit(
    generation: u64,
    mut child: Child,
    stdout_reader: JoinHandle<()>,
    event_tx: mpsc::UnboundedSender<ProcessEvent>,
    kill: CancellationToken,
    exited: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = tokio::select! {
            result = child.wait() => result,
            () = kill.cancelled() => {
                if let Err(err) = child.start_kill() {
                    warn!(generation, %err, "failed to kill engine process");
                }
                child.wait().await
            }
        };

        let (code, reason) = match result {
            Ok(status) => {
                let code = status.code();
                let reason = code.map_or_else(
                    || "process terminated by signal".to_owned(),
                    |c| format!("process exited with code {c}"),
                );
                (code, reason)
            }
            Err(err) => {
                warn!(generation, %err, "error waiting for engine process");
                (None, format!("wait error: {err}"))
            }
        };

        exited.cancel();
        info!(generation, ?code, reason = %reason, "engine process exited");

        if tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, stdout_reader)
            .await
            .is_err()
        {
            debug!(generation, "stdout still open after exit, reporting anyway");
        }

        let event = ProcessEvent {
            generation,
            kind: ProcessEventKind::Exited { code, reason },
        };
        if event_tx.send(event).is_err() {
            debug!(generation, "session gone before Exited could be delivered");
        }
    })
}
