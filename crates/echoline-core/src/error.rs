use thiserror::Error;

/// Error taxonomy for the dialogue core.
///
/// Maps onto the failure classes the orchestrator distinguishes: transient
/// remote faults, client disconnects, protocol invariant violations, and
/// programming errors. Cancellation is not represented here — it is a
/// first-class signal carried by `tokio_util::sync::CancellationToken`, not
/// an error.
#[derive(Debug, Error)]
pub enum EcholineError {
    #[error("config error: {0}")]
    Config(String),

    /// HTTP non-2xx, websocket reset, or a malformed frame from a remote
    /// component (VAD/ASR/SLM/TTS/control). The current response is
    /// abandoned; the session survives.
    #[error("remote component fault ({component}): {message}")]
    RemoteFault { component: &'static str, message: String },

    /// The ingress websocket closed. The session must be destroyed.
    #[error("client disconnected")]
    ClientDisconnect,

    /// Unknown event type, a missing required field, or a write attempted
    /// before the channel reached `ready`. Fatal to the current response,
    /// not to the session.
    #[error("protocol invariant violated: {0}")]
    Protocol(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EcholineError>;
