//! Inbound USI lines (engine → bridge).
//!
//! # Recognised lines
//!
//! | Line                                               | Maps to                          |
//! |----------------------------------------------------|----------------------------------|
//! | `id name <x>`                                      | [`EngineLine::IdName`]           |
//! | `id author <x>`                                    | [`EngineLine::IdAuthor`]         |
//! | `option name Engine_Name type string default <x>`  | [`EngineLine::EngineNameOption`] |
//! | `usiok`                                            | [`EngineLine::UsiOk`]            |
//! | `readyok`                                          | [`EngineLine::ReadyOk`]          |
//! | `bestmove <move> [ponder <move>]`                  | [`EngineLine::BestMove`]         |
//! | *(any other)*                                      | [`EngineLine::Other`]            |
//!
//! Some engines (dlshogi builds among them) never print `id name` and only
//! advertise their name through a non-standard `Engine_Name` string option,
//! hence the fallback row.

use std::sync::OnceLock;

use regex::Regex;

/// Classified engine output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLine {
    /// `id name <name>`.
    IdName(String),
    /// `id author <author>`.
    IdAuthor(String),
    /// Name advertised through the `Engine_Name` option default.
    EngineNameOption(String),
    /// Protocol negotiation acknowledged.
    UsiOk,
    /// Readiness check acknowledged.
    ReadyOk,
    /// Search result.
    BestMove {
        /// First token after `bestmove` (may be `resign` or `win`).
        best_move: String,
        /// Move the engine expects in reply, when reported.
        ponder: Option<String>,
    },
    /// Anything the bridge does not act on (`info …`, other options, noise).
    Other,
}

/// Classify a single trimmed engine line.
///
/// Never fails: unknown or malformed lines become [`EngineLine::Other`].
#[must_use]
pub fn parse_engine_line(line: &str) -> EngineLine {
    if let Some(name) = line.strip_prefix("id name ") {
        return EngineLine::IdName(name.trim().to_owned());
    }
    if let Some(author) = line.strip_prefix("id author ") {
        return EngineLine::IdAuthor(author.trim().to_owned());
    }
    if line.starts_with("option name Engine_Name") {
        return parse_engine_name_option(line).map_or(EngineLine::Other, EngineLine::EngineNameOption);
    }
    match line {
        "usiok" => return EngineLine::UsiOk,
        "readyok" => return EngineLine::ReadyOk,
        _ => {}
    }
    if let Some(rest) = line.strip_prefix("bestmove ") {
        return parse_bestmove(rest);
    }
    EngineLine::Other
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn engine_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^option name Engine_Name\s+type string\s+default\s+(.+)$").ok())
        .as_ref()
}

fn parse_engine_name_option(line: &str) -> Option<String> {
    let captures = engine_name_pattern()?.captures(line)?;
    let name = captures.get(1)?.as_str().trim();
    (!name.is_empty()).then(|| name.to_owned())
}

fn parse_bestmove(rest: &str) -> EngineLine {
    let mut tokens = rest.split_whitespace();
    let Some(best_move) = tokens.next() else {
        return EngineLine::Other;
    };
    let ponder = match (tokens.next(), tokens.next()) {
        (Some("ponder"), Some(mv)) => Some(mv.to_owned()),
        _ => None,
    };
    EngineLine::BestMove {
        best_move: best_move.to_owned(),
        ponder,
    }
}
