//! USI engine stream handling.
//!
//! This module owns everything between a session and its engine
//! subprocess. Each spawned engine gets three background tasks talking to
//! its stdio plus an exit monitor, all reporting back to the owning
//! session through one [`ProcessEvent`] channel:
//!
//! - `codec`: newline framing for both directions.
//! - `command` / `response`: typed outbound commands and inbound lines.
//! - `reader`: stdout → [`ProcessEventKind::Line`], stderr → log.
//! - `writer`: serialised command strings → stdin.
//! - `process`: path resolution, spawning, liveness, termination.

pub mod codec;
pub mod command;
pub mod process;
pub mod reader;
pub mod response;
pub mod writer;

pub use command::UsiCommand;
pub use response::{parse_engine_line, EngineLine};

/// Event reported by an engine's background tasks to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    /// Process incarnation the event belongs to. Sessions drop events whose
    /// generation no longer matches their live process.
    pub generation: u64,
    /// What happened.
    pub kind: ProcessEventKind,
}

/// Payload of a [`ProcessEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEventKind {
    /// One decoded stdout line.
    Line(String),
    /// stdout reached EOF or failed; the exit event normally follows.
    StdoutClosed {
        /// Why the reader stopped.
        reason: String,
    },
    /// Writing to stdin failed.
    WriteFailed(String),
    /// The process has exited.
    Exited {
        /// Exit code; `None` when terminated by a signal or unknown.
        code: Option<i32>,
        /// Human-readable exit description.
        reason: String,
    },
}
