//! Gateway shared state: the process-wide session registry.
//!
//! Mirrors the reference implementation's single in-memory session
//! dictionary, keyed by the opaque hex session id minted at `start_session`.

use std::collections::HashMap;
use std::sync::Arc;

use echoline_core::config::Config;
use echoline_orchestrator::session::Session;
use rand::Rng;
use tokio::sync::RwLock;

use crate::rate_limit::RateLimiter;

/// Shared gateway state accessible from every handler.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub sessions: RwLock<HashMap<String, Arc<Session>>>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

impl GatewayState {
    pub fn new(config: Config) -> Self {
        let rate_limiter = config
            .gateway
            .as_ref()
            .and_then(|g| g.rate_limit.as_ref())
            .map(|rl| Arc::new(RateLimiter::new(rl.max_connections_per_ip)));

        Self {
            config: Arc::new(config),
            sessions: RwLock::new(HashMap::new()),
            rate_limiter,
        }
    }

    pub async fn insert(&self, session: Arc<Session>) {
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session);
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Removes and tears down a session: cancels its background tasks and
    /// the remote VAD connection. Called on websocket disconnect.
    pub async fn remove(&self, session_id: &str) {
        if let Some(session) = self.sessions.write().await.remove(session_id) {
            session.destroy().await;
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Mint an opaque hex session id.
pub fn new_session_id() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_32_hex_chars() {
        let id = new_session_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
    }
}
