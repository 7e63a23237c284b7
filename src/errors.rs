//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Every variant carries a human-readable message. The enum is `Clone` so a
/// single failure (for example a crash observed mid-handshake) can be fanned
/// out to every caller waiting on the same outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Engine executable missing or the OS refused to spawn it.
    StartupFailure(String),
    /// `usiok` or `readyok` did not arrive in time and no identity is known.
    HandshakeTimeout(String),
    /// Engine process exited while a call depended on it.
    ProcessCrash(String),
    /// Write to the engine's stdin failed.
    PipeBroken(String),
    /// Structurally invalid caller input.
    Validation(String),
    /// No live engine process.
    NotRunning(String),
    /// Engine is running but the handshake has not completed.
    NotReady(String),
    /// A think request is already outstanding.
    ThinkInProgress(String),
    /// No `bestmove` arrived before the think deadline.
    ThinkTimeout(String),
    /// The session actor has shut down.
    SessionClosed(String),
    /// Malformed or oversized line on the engine stream.
    Protocol(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::StartupFailure(msg) => write!(f, "startup failure: {msg}"),
            Self::HandshakeTimeout(msg) => write!(f, "handshake timeout: {msg}"),
            Self::ProcessCrash(msg) => write!(f, "process crash: {msg}"),
            Self::PipeBroken(msg) => write!(f, "pipe broken: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::NotRunning(msg) => write!(f, "not running: {msg}"),
            Self::NotReady(msg) => write!(f, "not ready: {msg}"),
            Self::ThinkInProgress(msg) => write!(f, "think in progress: {msg}"),
            Self::ThinkTimeout(msg) => write!(f, "think timeout: {msg}"),
            Self::SessionClosed(msg) => write!(f, "session closed: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
