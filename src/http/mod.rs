//! HTTP surface for one engine session.
//!
//! Every configured session gets its own listener serving the router built
//! by [`router`]. Bodies are JSON with camelCase keys; a missing or empty
//! body counts as `{}`. CORS is open to every origin.

mod handlers;

use std::sync::Arc;

use axum::extract::Request;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::session::EngineSession;
use crate::{AppError, Result};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct HttpState {
    /// Session served by this listener.
    pub session: EngineSession,
    /// Name reported by `/health`.
    pub server_name: Arc<str>,
    /// Port reported by `/health`.
    pub port: u16,
}

impl HttpState {
    /// State for `session`, reporting the session's own name and port.
    #[must_use]
    pub fn for_session(session: EngineSession) -> Self {
        Self {
            server_name: Arc::from(session.name()),
            port: session.port(),
            session,
        }
    }
}

/// Error response: a status code plus a JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    /// Custom status and body.
    #[must_use]
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    /// `400` for validation failures, `500` for everything else.
    #[must_use]
    pub fn status_for(err: &AppError) -> StatusCode {
        match err {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self {
            status: Self::status_for(&err),
            body: json!({ "error": err.to_string() }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Build the router for one session.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/usi/connect", post(handlers::connect))
        .route("/usi/usi", post(handlers::usi))
        .route("/usi/usinewgame", post(handlers::new_game))
        .route("/usi/position", post(handlers::position))
        .route("/usi/go", post(handlers::go))
        .route("/usi/quit", post(handlers::quit))
        .route("/health", get(handlers::health))
        .fallback(not_found)
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Serve `state` on an already bound listener until `cancel` fires.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails while running.
pub async fn serve(listener: TcpListener, state: HttpState, cancel: CancellationToken) -> Result<()> {
    let addr = listener
        .local_addr()
        .map_err(|err| AppError::Io(format!("listener has no local address: {err}")))?;
    let server_name = Arc::clone(&state.server_name);
    info!(%addr, server = %server_name, "http listener started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("http server error on {addr}: {err}")))?;

    info!(%addr, server = %server_name, "http listener stopped");
    Ok(())
}

/// Parse a JSON body, treating an empty body as `T::default()`.
///
/// # Errors
///
/// `AppError::Validation` for malformed JSON.
pub fn parse_body<T>(body: &[u8]) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| AppError::Validation(format!("invalid JSON body: {err}")))
}

async fn cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(response.headers_mut());
        return response;
    }
    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
}

async fn not_found(method: Method, uri: Uri) -> ApiError {
    warn!(%method, path = uri.path(), "no such endpoint");
    ApiError::new(
        StatusCode::NOT_FOUND,
        json!({
            "error": "Not found",
            "message": format!("{method} {} is not a known endpoint", uri.path()),
        }),
    )
}
