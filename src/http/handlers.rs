//! Endpoint handlers.

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::{parse_body, ApiError, HttpState};

/// Think budget used when a `go` request names none.
const DEFAULT_TIME_LIMIT_MS: u64 = 5_000;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct ConnectRequest {
    engine_path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ConnectResponse {
    connected: bool,
    message: &'static str,
    engine_path: String,
    engine_running: bool,
}

pub(super) async fn connect(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<Json<ConnectResponse>, ApiError> {
    let request: ConnectRequest = parse_body(&body)?;
    let engine_path = request
        .engine_path
        .clone()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| state.session.default_engine_path().to_owned());

    match state.session.connect(request.engine_path).await {
        Ok(outcome) => Ok(Json(ConnectResponse {
            connected: true,
            message: if outcome.already_running {
                "Engine already running"
            } else {
                "Engine connected"
            },
            engine_path: outcome.engine_path,
            engine_running: outcome.engine_running,
        })),
        Err(err) => {
            warn!(error = %err, engine_path = %engine_path, "connect failed");
            Err(ApiError::new(
                ApiError::status_for(&err),
                json!({
                    "connected": false,
                    "error": err.to_string(),
                    "enginePath": engine_path,
                }),
            ))
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct UsiResponse {
    ready: bool,
    name: Option<String>,
    author: Option<String>,
}

pub(super) async fn usi(State(state): State<HttpState>) -> Result<Json<UsiResponse>, ApiError> {
    let outcome = state.session.handshake().await.inspect_err(|err| {
        warn!(error = %err, "handshake failed");
    })?;
    Ok(Json(UsiResponse {
        ready: outcome.ready,
        name: outcome.name,
        author: outcome.author,
    }))
}

#[derive(Debug, Serialize)]
pub(super) struct SimpleResponse {
    success: bool,
    message: &'static str,
}

pub(super) async fn new_game(
    State(state): State<HttpState>,
) -> Result<Json<SimpleResponse>, ApiError> {
    state.session.new_game().await.inspect_err(|err| {
        warn!(error = %err, "usinewgame failed");
    })?;
    Ok(Json(SimpleResponse {
        success: true,
        message: "New game started",
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct PositionRequest {
    sfen: String,
    moves: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PositionResponse {
    success: bool,
    message: &'static str,
    request_id: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    duplicate: bool,
}

pub(super) async fn position(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<Json<PositionResponse>, ApiError> {
    let request: PositionRequest = parse_body(&body)?;
    let moves = request.moves.unwrap_or_default();

    match state.session.set_position(request.sfen, moves).await {
        Ok(ack) => Ok(Json(PositionResponse {
            success: true,
            message: if ack.duplicate {
                "Duplicate position ignored"
            } else {
                "Position set"
            },
            request_id: ack.request_id,
            duplicate: ack.duplicate,
        })),
        Err(failure) => {
            warn!(
                request_id = ?failure.request_id,
                error = %failure.error,
                "position failed"
            );
            let mut body = json!({
                "error": failure.error.to_string(),
                "requestId": failure.request_id,
            });
            if let Some(command) = failure.command {
                body["command"] = json!(command);
            }
            Err(ApiError::new(ApiError::status_for(&failure.error), body))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct GoRequest {
    time_limit: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GoResponse {
    bestmove: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ponder: Option<String>,
    position: Option<String>,
    moves: Vec<String>,
    elapsed_ms: u64,
}

pub(super) async fn go(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<Json<GoResponse>, ApiError> {
    let request: GoRequest = parse_body(&body)?;
    let time_limit = request.time_limit.unwrap_or(DEFAULT_TIME_LIMIT_MS);

    let outcome = state.session.think(time_limit).await.inspect_err(|err| {
        warn!(error = %err, time_limit, "go failed");
    })?;
    let (position, moves) = outcome
        .position
        .map_or((None, Vec::new()), |p| (Some(p.sfen), p.moves));
    Ok(Json(GoResponse {
        bestmove: outcome.best_move,
        ponder: outcome.ponder,
        position,
        moves,
        elapsed_ms: u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
    }))
}

pub(super) async fn quit(State(state): State<HttpState>) -> Result<Json<SimpleResponse>, ApiError> {
    state.session.terminate().await?;
    Ok(Json(SimpleResponse {
        success: true,
        message: "Engine terminated",
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct HealthResponse {
    status: &'static str,
    server_name: String,
    port: u16,
    engine_running: bool,
    engine_ready: bool,
    engine_name: Option<String>,
    engine_author: Option<String>,
    engine_alive: bool,
    lifecycle: &'static str,
    settling: bool,
    thinking: bool,
    started_at: Option<DateTime<Utc>>,
}

pub(super) async fn health(
    State(state): State<HttpState>,
) -> Result<Json<HealthResponse>, ApiError> {
    let health = state.session.health().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        server_name: state.server_name.to_string(),
        port: state.port,
        engine_running: health.engine_running,
        engine_ready: health.engine_ready,
        engine_name: health.engine_name,
        engine_author: health.engine_author,
        engine_alive: health.engine_alive,
        lifecycle: health.lifecycle.as_str(),
        settling: health.settling,
        thinking: health.thinking,
        started_at: health.started_at,
    }))
}
