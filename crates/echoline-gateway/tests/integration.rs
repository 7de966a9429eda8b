//! Gateway integration tests — boot a real gateway and hit it over HTTP.
//!
//! Run with: `cargo test -p echoline-gateway --test integration`

use std::sync::Arc;

use echoline_core::config::Config;
use echoline_gateway::server::start_gateway;
use echoline_gateway::state::GatewayState;

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_test_gateway(config: Config) -> (Arc<GatewayState>, u16) {
    let port = find_free_port();
    let state = Arc::new(GatewayState::new(config));

    let state_clone = state.clone();
    tokio::spawn(async move {
        let _ = start_gateway(state_clone, port).await;
    });

    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health")).await.is_ok() {
            break;
        }
    }

    (state, port)
}

#[tokio::test]
async fn health_endpoint_reports_zero_sessions_before_any_start() {
    let (_state, port) = start_test_gateway(Config::default()).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .expect("health request failed");

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn start_session_without_components_configured_is_rejected() {
    // A bare default config has no vad/asr/slm/tts endpoints, so the
    // gateway must refuse rather than hand back a session nothing can serve.
    let (_state, port) = start_test_gateway(Config::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/start_session"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .expect("start_session request failed");

    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn mute_for_unknown_session_is_not_found() {
    let (_state, port) = start_test_gateway(Config::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/mute"))
        .json(&serde_json::json!({ "session_id": "does-not-exist" }))
        .send()
        .await
        .expect("mute request failed");

    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}
