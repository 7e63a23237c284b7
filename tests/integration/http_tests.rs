//! HTTP surface tests: a real supervisor on an ephemeral port, driven with
//! `reqwest`.

use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use usi_bridge::supervisor::Supervisor;
use usi_bridge::GlobalConfig;

use super::test_helpers::{mock_engine, STARTPOS};

struct Bridge {
    supervisor: Supervisor,
    base: String,
    client: reqwest::Client,
    _dir: tempfile::TempDir,
}

impl Bridge {
    async fn start() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("engine.log");
        let raw = format!(
            r#"
[timeouts]
handshake_ms = 2000
startup_probe_ms = 100
position_settle_ms = 100

[[servers]]
name = "alpha"
port = 0
engine_path = '{engine}'
engine_args = ["--log-file", '{log}']
"#,
            engine = mock_engine(),
            log = log.display(),
        );
        let config = GlobalConfig::from_toml_str(&raw).expect("config");
        let supervisor = Supervisor::start(&config).await.expect("supervisor");
        let addr = supervisor.local_addr("alpha").expect("bound address");
        Self {
            supervisor,
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            _dir: dir,
        }
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .expect("request");
        let status = response.status();
        (status, response.json().await.expect("json body"))
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .expect("request");
        let status = response.status();
        (status, response.json().await.expect("json body"))
    }
}

#[tokio::test]
async fn health_reports_an_idle_session() {
    let bridge = Bridge::start().await;
    let port = bridge.supervisor.local_addr("alpha").expect("addr").port();

    let (status, body) = bridge.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["serverName"], "alpha");
    assert_eq!(body["port"], json!(port));
    assert_eq!(body["engineRunning"], false);
    assert_eq!(body["engineReady"], false);
    assert_eq!(body["lifecycle"], "disconnected");
    assert!(body["engineName"].is_null());

    bridge.supervisor.shutdown().await;
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let bridge = Bridge::start().await;

    let (status, body) = bridge.get("/usi/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not found");
    assert!(body["message"].as_str().is_some_and(|m| m.contains("/usi/nope")));

    bridge.supervisor.shutdown().await;
}

#[tokio::test]
async fn preflight_is_answered_with_cors_headers() {
    let bridge = Bridge::start().await;

    let response = bridge
        .client
        .request(Method::OPTIONS, format!("{}/usi/go", bridge.base))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let headers = response.headers();
    assert_eq!(
        headers
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    assert_eq!(
        headers
            .get("access-control-allow-methods")
            .and_then(|v| v.to_str().ok()),
        Some("GET, POST, OPTIONS")
    );

    bridge.supervisor.shutdown().await;
}

#[tokio::test]
async fn error_statuses_follow_the_failure_kind() {
    let bridge = Bridge::start().await;

    let (status, body) = bridge.post("/usi/position", json!({ "sfen": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["requestId"].is_u64());
    assert!(body["error"].as_str().is_some_and(|e| e.contains("sfen")));

    let (status, body) = bridge.post("/usi/go", json!({ "timeLimit": 100 })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());

    let (status, body) = bridge
        .post("/usi/go", json!({ "timeLimit": 100_000_000_000_u64 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some_and(|e| e.contains("time limit")));
    let (status, _) = bridge.get("/health").await;
    assert_eq!(status, StatusCode::OK);

    let response = bridge
        .client
        .post(format!("{}/usi/position", bridge.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, body) = bridge
        .post("/usi/connect", json!({ "enginePath": "/definitely/not/here/engine" }))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["connected"], false);
    assert_eq!(body["enginePath"], "/definitely/not/here/engine");

    bridge.supervisor.shutdown().await;
}

#[tokio::test]
async fn full_game_flow_over_http() {
    let bridge = Bridge::start().await;

    let (status, body) = bridge.post("/usi/connect", json!({})).await;
    assert_eq!(status, StatusCode::OK, "connect: {body}");
    assert_eq!(body["connected"], true);
    assert_eq!(body["message"], "Engine connected");
    assert_eq!(body["engineRunning"], true);

    let (status, body) = bridge.post("/usi/usi", json!({})).await;
    assert_eq!(status, StatusCode::OK, "usi: {body}");
    assert_eq!(body["ready"], true);
    assert_eq!(body["name"], "MockEngine");
    assert_eq!(body["author"], "usi-bridge");

    let (status, body) = bridge.post("/usi/usinewgame", json!({})).await;
    assert_eq!(status, StatusCode::OK, "usinewgame: {body}");
    assert_eq!(body["success"], true);

    let (status, body) = bridge
        .post(
            "/usi/position",
            json!({ "sfen": STARTPOS, "moves": ["7g7f", "3c3d"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "position: {body}");
    assert_eq!(body["success"], true);
    assert!(body["requestId"].is_u64());
    assert!(body.get("duplicate").is_none());

    let (status, body) = bridge.post("/usi/go", json!({ "timeLimit": 1000 })).await;
    assert_eq!(status, StatusCode::OK, "go: {body}");
    assert_eq!(body["bestmove"], "7g7f");
    assert_eq!(body["position"], STARTPOS);
    assert_eq!(body["moves"], json!(["7g7f", "3c3d"]));
    assert!(body["elapsedMs"].is_u64());
    assert!(body.get("ponder").is_none());

    let (_, health) = bridge.get("/health").await;
    assert_eq!(health["engineReady"], true);
    assert_eq!(health["lifecycle"], "ready");
    assert_eq!(health["engineName"], "MockEngine");

    let (status, body) = bridge.post("/usi/quit", json!({})).await;
    assert_eq!(status, StatusCode::OK, "quit: {body}");
    assert_eq!(body["message"], "Engine terminated");

    let (_, health) = bridge.get("/health").await;
    assert_eq!(health["engineRunning"], false);
    assert!(health["engineName"].is_null());

    bridge.supervisor.shutdown().await;
}

#[tokio::test]
async fn empty_body_counts_as_empty_object() {
    let bridge = Bridge::start().await;

    let response = bridge
        .client
        .post(format!("{}/usi/connect", bridge.base))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = bridge.post("/usi/connect", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Engine already running");

    bridge.supervisor.shutdown().await;
}
