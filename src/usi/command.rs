//! Outbound USI commands (bridge → engine).

use std::fmt::{Display, Formatter};

/// A command written to the engine's stdin.
///
/// [`Display`] renders the exact wire text without the trailing newline;
/// the codec appends the delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsiCommand {
    /// Protocol negotiation; answered by `id …` lines and `usiok`.
    Usi,
    /// Readiness check; answered by `readyok`.
    IsReady,
    /// Start-of-game notification.
    UsiNewGame,
    /// Set the position to think on.
    Position {
        /// SFEN board encoding.
        sfen: String,
        /// Moves played from the SFEN position, in order.
        moves: Vec<String>,
    },
    /// Think for a fixed byoyomi; answered by `bestmove`.
    GoByoyomi {
        /// Whole seconds of thinking time.
        seconds: u64,
    },
    /// Ask the engine to exit.
    Quit,
}

impl UsiCommand {
    /// Build a `go byoyomi` command from a millisecond budget.
    #[must_use]
    pub fn go_for_millis(time_limit_ms: u64) -> Self {
        Self::GoByoyomi {
            seconds: byoyomi_seconds(time_limit_ms),
        }
    }

    /// Short name for log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Usi => "usi",
            Self::IsReady => "isready",
            Self::UsiNewGame => "usinewgame",
            Self::Position { .. } => "position",
            Self::GoByoyomi { .. } => "go",
            Self::Quit => "quit",
        }
    }
}

impl Display for UsiCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usi => f.write_str("usi"),
            Self::IsReady => f.write_str("isready"),
            Self::UsiNewGame => f.write_str("usinewgame"),
            Self::Position { sfen, moves } => {
                write!(f, "position sfen {sfen}")?;
                if !moves.is_empty() {
                    write!(f, " moves {}", moves.join(" "))?;
                }
                Ok(())
            }
            Self::GoByoyomi { seconds } => write!(f, "go byoyomi {seconds}"),
            Self::Quit => f.write_str("quit"),
        }
    }
}

/// Convert a millisecond think budget to whole byoyomi seconds.
///
/// Floors the value and never returns less than one second.
#[must_use]
pub fn byoyomi_seconds(time_limit_ms: u64) -> u64 {
    (time_limit_ms / 1000).max(1)
}
