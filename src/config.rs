//! Global configuration parsing, validation, and fallback defaults.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::session::{SessionConfig, SessionTimings};
use crate::{AppError, Result};

/// Environment variable consulted when no engine path is configured.
pub const ENGINE_PATH_ENV: &str = "ENGINE_PATH";

/// Engine path used when neither config nor environment provide one.
pub const FALLBACK_ENGINE_PATH: &str = "engine.exe";

/// Largest value accepted for any `timeouts.*_ms` key: one hour.
pub const MAX_TIMEOUT_MS: u64 = 3_600_000;

/// Configurable timing values (milliseconds) for engine interactions.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Per-phase handshake timeout (`usiok`, then `readyok`).
    #[serde(default = "default_handshake_ms")]
    pub handshake_ms: u64,
    /// Window after spawn during which an exit counts as a failed connect.
    #[serde(default = "default_startup_probe_ms")]
    pub startup_probe_ms: u64,
    /// Settle window after a `position` command.
    #[serde(default = "default_position_settle_ms")]
    pub position_settle_ms: u64,
    /// Longest a think waits for a settling position.
    #[serde(default = "default_settle_wait_cap_ms")]
    pub settle_wait_cap_ms: u64,
    /// Margin added to a think budget before the think times out.
    #[serde(default = "default_think_grace_ms")]
    pub think_grace_ms: u64,
    /// Time between `quit` and a forced kill.
    #[serde(default = "default_quit_grace_ms")]
    pub quit_grace_ms: u64,
    /// Delay before an `auto_connect` session spawns its engine.
    #[serde(default = "default_auto_connect_delay_ms")]
    pub auto_connect_delay_ms: u64,
}

fn default_handshake_ms() -> u64 {
    10_000
}

fn default_startup_probe_ms() -> u64 {
    500
}

fn default_position_settle_ms() -> u64 {
    500
}

fn default_settle_wait_cap_ms() -> u64 {
    1_000
}

fn default_think_grace_ms() -> u64 {
    1_000
}

fn default_quit_grace_ms() -> u64 {
    1_000
}

fn default_auto_connect_delay_ms() -> u64 {
    1_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_ms: default_handshake_ms(),
            startup_probe_ms: default_startup_probe_ms(),
            position_settle_ms: default_position_settle_ms(),
            settle_wait_cap_ms: default_settle_wait_cap_ms(),
            think_grace_ms: default_think_grace_ms(),
            quit_grace_ms: default_quit_grace_ms(),
            auto_connect_delay_ms: default_auto_connect_delay_ms(),
        }
    }
}

impl TimeoutConfig {
    /// Convert to the session's timing parameters.
    #[must_use]
    pub fn timings(&self) -> SessionTimings {
        SessionTimings {
            handshake_timeout: Duration::from_millis(self.handshake_ms),
            startup_probe: Duration::from_millis(self.startup_probe_ms),
            position_settle: Duration::from_millis(self.position_settle_ms),
            settle_wait_cap: Duration::from_millis(self.settle_wait_cap_ms),
            think_grace: Duration::from_millis(self.think_grace_ms),
            quit_grace: Duration::from_millis(self.quit_grace_ms),
        }
    }

    fn entries(&self) -> [(&'static str, u64); 7] {
        [
            ("handshake_ms", self.handshake_ms),
            ("startup_probe_ms", self.startup_probe_ms),
            ("position_settle_ms", self.position_settle_ms),
            ("settle_wait_cap_ms", self.settle_wait_cap_ms),
            ("think_grace_ms", self.think_grace_ms),
            ("quit_grace_ms", self.quit_grace_ms),
            ("auto_connect_delay_ms", self.auto_connect_delay_ms),
        ]
    }

    /// Delay before auto-connecting.
    #[must_use]
    pub fn auto_connect_delay(&self) -> Duration {
        Duration::from_millis(self.auto_connect_delay_ms)
    }
}

/// One bridged engine: a session name, an HTTP port, and an engine.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerDefinition {
    /// Session name, unique across the config.
    pub name: String,
    /// HTTP port, unique across the config.
    pub port: u16,
    /// Engine executable used when a connect request names none.
    #[serde(default)]
    pub engine_path: Option<String>,
    /// Spawn the engine shortly after startup.
    #[serde(default)]
    pub auto_connect: bool,
    /// Extra arguments passed to the engine executable.
    #[serde(default)]
    pub engine_args: Vec<String>,
}

impl ServerDefinition {
    /// The single session used when no usable config exists.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            name: "default".into(),
            port: 8080,
            engine_path: None,
            auto_connect: false,
            engine_args: Vec::new(),
        }
    }

    /// Effective default engine path: configured value, else
    /// `ENGINE_PATH`, else `engine.exe`.
    #[must_use]
    pub fn default_engine_path(&self) -> String {
        self.engine_path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| env::var(ENGINE_PATH_ENV).ok().filter(|p| !p.trim().is_empty()))
            .unwrap_or_else(|| FALLBACK_ENGINE_PATH.to_owned())
    }
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Global configuration parsed from the servers TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Address every HTTP listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Timing configuration shared by every session.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Ordered list of bridged engines.
    #[serde(default)]
    pub servers: Vec<ServerDefinition>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            timeouts: TimeoutConfig::default(),
            servers: vec![ServerDefinition::fallback()],
        }
    }
}

impl GlobalConfig {
    /// Load configuration, falling back to a single default session.
    ///
    /// A missing, unreadable, or unparsable file is logged and replaced by
    /// [`GlobalConfig::default`]. A file that parses but fails validation is
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if validation fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path.display(), %err, "config not readable, using default session");
                return Ok(Self::default());
            }
        };

        match toml::from_str::<Self>(&raw) {
            Ok(mut config) => {
                config.validate()?;
                Ok(config)
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "config not parsable, using default session");
                Ok(Self::default())
            }
        }
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the session configuration for one server definition.
    #[must_use]
    pub fn session_config(&self, server: &ServerDefinition) -> SessionConfig {
        SessionConfig {
            name: server.name.clone(),
            port: server.port,
            engine_path: server.default_engine_path(),
            engine_args: server.engine_args.clone(),
            timings: self.timeouts.timings(),
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.servers.is_empty() {
            warn!("config lists no servers, using default session");
            self.servers.push(ServerDefinition::fallback());
        }

        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() {
                return Err(AppError::Config("server name must not be empty".into()));
            }
            if !names.insert(server.name.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate server name: {}",
                    server.name
                )));
            }
            if !ports.insert(server.port) {
                return Err(AppError::Config(format!(
                    "duplicate server port: {}",
                    server.port
                )));
            }
        }

        if self.timeouts.handshake_ms == 0 {
            return Err(AppError::Config(
                "timeouts.handshake_ms must be greater than zero".into(),
            ));
        }
        for (key, value) in self.timeouts.entries() {
            if value > MAX_TIMEOUT_MS {
                return Err(AppError::Config(format!(
                    "timeouts.{key} must be at most {MAX_TIMEOUT_MS} ms, got {value}"
                )));
            }
        }

        Ok(())
    }
}
