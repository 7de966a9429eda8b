//! Push-only event channel over the `/ws/agent/event/{session_id}` socket.
//!
//! Carries `agent_status_changed` and `set_avatar` events using the shared
//! [`EventFrame`] wire envelope. The client never sends meaningful data on
//! this socket; inbound messages are drained and discarded so the
//! connection stays alive through proxies that expect bidirectional
//! traffic.

use axum::extract::ws::{Message, WebSocket};
use echoline_core::wire::{AgentStatus, EventFrame};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Clone)]
pub struct EventEgress {
    tx: mpsc::UnboundedSender<EventFrame>,
}

impl EventEgress {
    pub fn agent_status_changed(&self, status: AgentStatus, timestamp_ms: i64) {
        let _ = self
            .tx
            .send(EventFrame::agent_status_changed(status, timestamp_ms));
    }

    pub fn set_avatar(&self, avatar: &str) {
        let _ = self.tx.send(EventFrame::set_avatar(avatar));
    }
}

pub async fn run_event_socket(socket: WebSocket) -> EventEgress {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<EventFrame>();

    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let payload = match serde_json::to_string(&frame) {
                Ok(p) => p,
                Err(err) => {
                    debug!(?err, "failed to encode event frame");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
        debug!("event socket read loop exited");
    });

    EventEgress { tx }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_status_changed_serializes_to_expected_shape() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let egress = EventEgress { tx };
        egress.agent_status_changed(AgentStatus::Thinking, 1000);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event, "agent_status_changed");
        assert_eq!(frame.data["status"], "thinking");
        assert_eq!(frame.data["timestamp"], 1000);
    }

    #[test]
    fn set_avatar_serializes_to_expected_shape() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let egress = EventEgress { tx };
        egress.set_avatar("luna");
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event, "set_avatar");
        assert_eq!(frame.data["avatar"], "luna");
    }
}
