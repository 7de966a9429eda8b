//! Remote voice-activity-detection client.
//!
//! Speaks a tiny JSON protocol over a websocket: every PCM16 chunk sent in is
//! answered, eventually, with `{"start": <sample>, "end": <sample>, "current":
//! <sample>}` frames describing the speech region the remote detector has
//! found so far. `start > end` means the user is currently mid-utterance;
//! `start <= end` means the last utterance just closed at `[start, end)`.

use echoline_core::config::VadConfig;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// An event surfaced by the remote detector.
#[derive(Debug, Clone)]
pub enum VadEvent {
    /// The user has been speaking long enough, mid-response, to count as a
    /// barge-in: the current TTS playback should be cancelled.
    Interrupt,
    /// A completed utterance: raw PCM16 bytes spanning `[start - left_pad,
    /// end)` of everything sent so far.
    Utterance(Vec<u8>),
}

#[derive(Debug, Deserialize)]
struct VadMessage {
    start: Option<i64>,
    end: Option<i64>,
    current: Option<i64>,
}

pub struct VadHandle {
    pub audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    pub cancel: CancellationToken,
}

/// Connect to the remote VAD and spawn the background task that feeds it
/// audio and turns its replies into [`VadEvent`]s.
pub async fn connect(config: &VadConfig) -> anyhow::Result<(VadHandle, mpsc::UnboundedReceiver<VadEvent>)> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(&config.url).await?;

    let (audio_tx, audio_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<VadEvent>();
    let cancel = CancellationToken::new();

    let left_pad_samples = config.left_pad_ms as i64 * 16;
    let voiced_samples_to_interrupt = config.voiced_ms_to_interrupt as i64 * 16;

    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        run(ws_stream, audio_rx, event_tx, task_cancel, left_pad_samples, voiced_samples_to_interrupt).await;
    });

    Ok((VadHandle { audio_tx, cancel }, event_rx))
}

async fn run(
    mut ws: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    mut audio_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    event_tx: mpsc::UnboundedSender<VadEvent>,
    cancel: CancellationToken,
    left_pad_samples: i64,
    voiced_samples_to_interrupt: i64,
) {
    let mut data: Vec<u8> = Vec::new();
    let mut start: i64 = 0;
    let mut end: i64 = 0;
    let mut current: i64 = -1;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = audio_rx.recv() => {
                match chunk {
                    Some(chunk) => {
                        data.extend_from_slice(&chunk);
                        if ws.send(Message::Binary(chunk.into())).await.is_err() {
                            warn!("vad websocket send failed, stopping");
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let parsed: VadMessage = match serde_json::from_str(&text) {
                            Ok(p) => p,
                            Err(e) => {
                                debug!(%e, "unparseable vad message, ignoring");
                                continue;
                            }
                        };
                        let new_start = parsed.start.unwrap_or(start);
                        let new_end = parsed.end.unwrap_or(end);
                        current = parsed.current.unwrap_or(current);

                        if new_start > new_end {
                            if new_end != 0 && current - new_start > voiced_samples_to_interrupt {
                                if event_tx.send(VadEvent::Interrupt).is_err() {
                                    break;
                                }
                            }
                        } else if (new_start, new_end) != (start, end) {
                            let from = (new_start - left_pad_samples).max(0) as usize * 2;
                            let to = (new_end as usize * 2).min(data.len());
                            let utterance = if from < to { data[from..to].to_vec() } else { Vec::new() };
                            if event_tx.send(VadEvent::Utterance(utterance)).is_err() {
                                break;
                            }
                        }

                        start = new_start;
                        end = new_end;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(%e, "vad websocket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}
