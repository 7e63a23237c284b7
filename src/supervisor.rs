//! Session supervisor: one engine session and one HTTP listener per
//! configured server.
//!
//! All listeners are bound before anything is spawned, so a port conflict
//! aborts startup cleanly. Shutdown stops the listeners first, then
//! cancels the sessions, each of which quits (and if needed kills) its
//! engine.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::http::{self, HttpState};
use crate::session::EngineSession;
use crate::{AppError, Result};

/// Running set of sessions keyed by name.
#[derive(Debug)]
pub struct Supervisor {
    sessions: BTreeMap<String, EngineSession>,
    addrs: BTreeMap<String, SocketAddr>,
    http_cancel: CancellationToken,
    session_cancel: CancellationToken,
    http_tasks: Vec<JoinHandle<()>>,
    session_tasks: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Bind every listener, then start every session and its HTTP server.
    ///
    /// A port of `0` binds an ephemeral port; the session reports the port
    /// actually bound.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if any listener fails to bind.
    pub async fn start(config: &GlobalConfig) -> Result<Self> {
        let mut bound = Vec::with_capacity(config.servers.len());
        for server in &config.servers {
            let addr = SocketAddr::new(config.bind_address, server.port);
            let listener = TcpListener::bind(addr).await.map_err(|err| {
                AppError::Config(format!(
                    "failed to bind {addr} for server {}: {err}",
                    server.name
                ))
            })?;
            let local = listener
                .local_addr()
                .map_err(|err| AppError::Config(format!("failed to read bound address: {err}")))?;
            bound.push((server, listener, local));
        }

        let http_cancel = CancellationToken::new();
        let session_cancel = CancellationToken::new();
        let mut supervisor = Self {
            sessions: BTreeMap::new(),
            addrs: BTreeMap::new(),
            http_cancel,
            session_cancel,
            http_tasks: Vec::new(),
            session_tasks: Vec::new(),
        };

        for (server, listener, local) in bound {
            let mut session_config = config.session_config(server);
            session_config.port = local.port();
            let (session, task) =
                EngineSession::spawn(session_config, supervisor.session_cancel.clone());
            supervisor.session_tasks.push(task);

            let state = HttpState::for_session(session.clone());
            let cancel = supervisor.http_cancel.clone();
            let span = info_span!("http", server = %server.name, port = local.port());
            supervisor.http_tasks.push(tokio::spawn(
                async move {
                    if let Err(err) = http::serve(listener, state, cancel).await {
                        error!(%err, "http listener failed");
                    }
                }
                .instrument(span),
            ));

            if server.auto_connect {
                supervisor.http_tasks.push(spawn_auto_connect(
                    session.clone(),
                    config.timeouts.auto_connect_delay(),
                    supervisor.http_cancel.clone(),
                ));
            }

            info!(server = %server.name, %local, engine_path = %session.default_engine_path(), "server configured");
            supervisor.addrs.insert(server.name.clone(), local);
            supervisor.sessions.insert(server.name.clone(), session);
        }

        Ok(supervisor)
    }

    /// Session registered under `name`.
    #[must_use]
    pub fn session(&self, name: &str) -> Option<&EngineSession> {
        self.sessions.get(name)
    }

    /// All sessions, ordered by name.
    pub fn sessions(&self) -> impl Iterator<Item = &EngineSession> {
        self.sessions.values()
    }

    /// Bound HTTP address of the session registered under `name`.
    #[must_use]
    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.addrs.get(name).copied()
    }

    /// Stop the listeners, then the sessions and their engines.
    pub async fn shutdown(self) {
        info!(sessions = self.sessions.len(), "supervisor shutting down");
        self.http_cancel.cancel();
        for task in self.http_tasks {
            if let Err(err) = task.await {
                warn!(%err, "http task ended abnormally");
            }
        }

        self.session_cancel.cancel();
        for task in self.session_tasks {
            if let Err(err) = task.await {
                warn!(%err, "session task ended abnormally");
            }
        }
        info!("supervisor stopped");
    }
}

fn spawn_auto_connect(
    session: EngineSession,
    delay: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let span = info_span!("auto_connect", server = %session.name());
    tokio::spawn(
        async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            match session.health().await {
                Ok(health) if health.engine_running => {
                    info!("engine already running, skipping auto-connect");
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(%err, "session unavailable, skipping auto-connect");
                    return;
                }
            }

            match session.connect(None).await {
                Ok(outcome) => info!(engine_path = %outcome.engine_path, "auto-connect succeeded"),
                Err(err) => warn!(%err, "auto-connect failed"),
            }
        }
        .instrument(span),
    )
}
