#![forbid(unsafe_code)]

//! HTTP bridge to locally spawned USI shogi engines.
//!
//! Each configured engine runs as an [`session::EngineSession`]: an actor
//! that owns the engine subprocess, runs the USI handshake, forwards
//! positions, and correlates every `go` with its `bestmove`. The
//! [`supervisor::Supervisor`] exposes each session on its own HTTP port.

pub mod config;
pub mod errors;
pub mod http;
pub mod session;
pub mod supervisor;
pub mod usi;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
