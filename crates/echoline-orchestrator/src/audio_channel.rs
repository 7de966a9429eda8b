//! Duplex audio channel over the `/ws/agent/audio/{session_id}` socket.
//!
//! Inbound frames are raw binary PCM16; outbound frames use the shared
//! [`DataFrame`] wire envelope (base64 payload, `data_type`, optional
//! `timestamp`), matching the split-socket-plus-forwarding-task idiom used
//! elsewhere for duplex websocket channels.

use axum::extract::ws::{Message, WebSocket};
use base64::Engine;
use echoline_core::wire::DataFrame;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Handle held by the orchestrator to push agent audio out to the client.
#[derive(Clone)]
pub struct AudioEgress {
    tx: mpsc::UnboundedSender<DataFrame>,
}

impl AudioEgress {
    /// Queue a PCM16 chunk for delivery, tagged with the response's
    /// millisecond timestamp so the client can discard stale audio after a
    /// barge-in.
    pub fn send_audio(&self, pcm: &[u8], timestamp_ms: i64) -> bool {
        let frame = DataFrame::bytes(
            base64::engine::general_purpose::STANDARD.encode(pcm),
            Some(timestamp_ms),
        );
        self.tx.send(frame).is_ok()
    }

    /// Queue a text frame, e.g. an ASR transcript echoed back to the client.
    pub fn send_text(&self, text: &str, text_type: Option<&str>) -> bool {
        self.tx
            .send(DataFrame::text(text.to_string(), text_type))
            .is_ok()
    }
}

/// Drives one audio websocket connection to completion.
///
/// Splits the socket into a read half (forwarded to `audio_in` as raw PCM
/// bytes) and a write half fed by an internal mpsc queue of `DataFrame`s.
/// Returns the egress handle immediately and a `closed` receiver that fires
/// once the read loop exits, so callers can tear the session down on
/// disconnect without blocking on the socket themselves.
pub async fn run_audio_socket(
    socket: WebSocket,
    audio_in: mpsc::UnboundedSender<Vec<u8>>,
) -> (AudioEgress, tokio::sync::oneshot::Receiver<()>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<DataFrame>();
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let payload = match serde_json::to_string(&frame) {
                Ok(p) => p,
                Err(err) => {
                    warn!(?err, "failed to encode outbound audio frame");
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
            let pcm = match msg {
                Message::Binary(bytes) => bytes.to_vec(),
                Message::Close(_) => break,
                _ => continue,
            };
            if audio_in.send(pcm).is_err() {
                break;
            }
        }
        debug!("audio socket read loop exited");
        let _ = closed_tx.send(());
    });

    (AudioEgress { tx: out_tx }, closed_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_audio_builds_a_bytes_data_frame() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let egress = AudioEgress { tx };
        egress.send_audio(&[1, 2, 3, 4], 42);
        let frame = rx.try_recv().unwrap();
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["data_type"], "bytes");
        assert_eq!(value["timestamp"], 42);
        let pcm = base64::engine::general_purpose::STANDARD
            .decode(value["data"].as_str().unwrap())
            .unwrap();
        assert_eq!(pcm, vec![1, 2, 3, 4]);
    }

    #[test]
    fn send_text_builds_a_text_data_frame_without_timestamp() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let egress = AudioEgress { tx };
        egress.send_text("hello", Some("asr"));
        let frame = rx.try_recv().unwrap();
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["data_type"], "text");
        assert_eq!(value["text_type"], "asr");
        assert!(value.get("timestamp").is_none());
    }
}
