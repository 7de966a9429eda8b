//! Axum HTTP/WebSocket server: session lifecycle routes plus the duplex
//! audio and push-only event channels.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use echoline_core::config::VadConfig;
use echoline_core::wire::{MuteRequest, MuteResponse, StartSessionRequest, StartSessionResponse};
use echoline_orchestrator::audio_channel::run_audio_socket;
use echoline_orchestrator::event_channel::run_event_socket;
use echoline_orchestrator::orchestrator;
use echoline_orchestrator::session::{Session, SessionComponents};
use serde_json::json;
use tracing::{info, warn};

use crate::state::{new_session_id, GatewayState};

pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state
        .config
        .gateway
        .as_ref()
        .and_then(|g| g.bind.clone())
        .unwrap_or_else(|| "0.0.0.0".to_string());

    let app = Router::new()
        .route("/start_session", post(start_session_handler))
        .route("/mute", post(mute_handler))
        .route("/ws/agent/audio/{session_id}", get(audio_ws_handler))
        .route("/ws/agent/event/{session_id}", get(event_ws_handler))
        .route("/health", get(health_handler))
        .with_state(state.clone());

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn start_session_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<StartSessionRequest>,
) -> impl IntoResponse {
    let config = &state.config;

    let Some(asr) = config.asr.clone() else {
        return (axum::http::StatusCode::SERVICE_UNAVAILABLE, "asr not configured").into_response();
    };
    let Some(slm) = config.slm.clone() else {
        return (axum::http::StatusCode::SERVICE_UNAVAILABLE, "slm not configured").into_response();
    };
    let Some(tts) = config.tts.clone() else {
        return (axum::http::StatusCode::SERVICE_UNAVAILABLE, "tts not configured").into_response();
    };
    let vad_config: VadConfig = match &config.vad {
        Some(v) => v.clone(),
        None => {
            return (axum::http::StatusCode::SERVICE_UNAVAILABLE, "vad not configured").into_response();
        }
    };

    let components = SessionComponents {
        asr,
        slm,
        tts,
        tts_control: config.tts_control.clone(),
        diar_control: config.diar_control.clone(),
    };

    let session_id = new_session_id();

    let session = match Session::new(
        session_id.clone(),
        components,
        &vad_config,
        req.sample_rate,
        req.num_channels,
        config.chunk_ms(),
    )
    .await
    {
        Ok(s) => Arc::new(s),
        Err(err) => {
            warn!(?err, "failed to start session");
            return (
                axum::http::StatusCode::BAD_GATEWAY,
                format!("failed to start session: {err}"),
            )
                .into_response();
        }
    };

    state.insert(session.clone()).await;
    orchestrator::listen(session);

    Json(StartSessionResponse { session_id }).into_response()
}

async fn mute_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<MuteRequest>,
) -> impl IntoResponse {
    match state.get(&req.session_id).await {
        Some(session) => {
            session.mute_user();
            Json(MuteResponse::default()).into_response()
        }
        None => (axum::http::StatusCode::NOT_FOUND, "unknown session").into_response(),
    }
}

async fn audio_ws_handler(
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    if let Some(limiter) = &state.rate_limiter {
        if !limiter.check(addr.ip()) {
            return axum::http::StatusCode::TOO_MANY_REQUESTS.into_response();
        }
    }

    let Some(session) = state.get(&session_id).await else {
        return (axum::http::StatusCode::NOT_FOUND, "unknown session").into_response();
    };

    ws.on_upgrade(move |socket| async move {
        let (egress, closed) = run_audio_socket(socket, session.ingress_tx.clone()).await;
        *session.audio_egress.write().await = Some(egress);
        let _ = closed.await;
        state.remove(&session_id).await;
    })
    .into_response()
}

async fn event_ws_handler(
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let Some(session) = state.get(&session_id).await else {
        return (axum::http::StatusCode::NOT_FOUND, "unknown session").into_response();
    };

    ws.on_upgrade(move |socket| async move {
        let egress = run_event_socket(socket).await;
        *session.event_egress.write().await = Some(egress);
    })
    .into_response()
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let sessions = state.session_count().await;

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "sessions": sessions,
    }))
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl+c handler");
    info!("shutdown signal received");
}
