//! The dialogue state machine: ingress pump, VAD-driven response dispatch,
//! and the per-utterance response pipeline (ASR/SLM/control fanout → TTS →
//! paced egress).

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};

use echoline_core::config::ControlLlmConfig;
use echoline_core::history::{audio_id_of, Message};
use echoline_core::wire::AgentStatus;
use echoline_media::control::{self, ControlBundle};
use echoline_media::vad::VadEvent;
use echoline_media::{asr, slm, tts};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::paced_egress::Tick;
use crate::session::Session;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Starts the three concurrent activities that run for the life of a
/// session: the ingress pump (raw PCM → resampled → VAD), the paced-egress
/// ticker, and the VAD-driven response dispatcher.
pub fn listen(session: Arc<Session>) {
    let ingress_rx = session
        .take_ingress_rx()
        .expect("listen() called more than once for this session");
    let vad_events = session
        .take_vad_events()
        .expect("listen() called more than once for this session");

    let pump_session = session.clone();
    session.tasks.spawn(async move {
        ingress_pump(pump_session, ingress_rx).await;
    });

    let ticker_session = session.clone();
    session.tasks.spawn(async move {
        run_paced_ticker(ticker_session).await;
    });

    session.tasks.spawn(async move {
        response_dispatch(session, vad_events).await;
    });
}

async fn ingress_pump(session: Arc<Session>, mut ingress_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    loop {
        tokio::select! {
            _ = session.cancel_session.cancelled() => break,
            chunk = ingress_rx.recv() => {
                match chunk {
                    Some(chunk) => {
                        let resampled = session.resample(&chunk);
                        if !resampled.is_empty() && session.vad.audio_tx.send(resampled).is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

async fn run_paced_ticker(session: Arc<Session>) {
    let mut ticker = session.paced.lock().unwrap().ticker();
    loop {
        tokio::select! {
            _ = session.cancel_session.cancelled() => break,
            _ = ticker.tick() => {
                let tick = session.paced.lock().unwrap().tick();
                match tick {
                    Tick::Chunk(pcm) => {
                        let timestamp = session.response_timestamp();
                        if let Some(egress) = session.audio_egress.read().await.as_ref() {
                            egress.send_audio(&pcm, timestamp);
                        }
                    }
                    Tick::Flushed => {
                        session.emit_status(AgentStatus::Listening, now_ms()).await;
                    }
                    Tick::Idle => {}
                }
            }
        }
    }
}

async fn response_dispatch(session: Arc<Session>, mut vad_events: mpsc::UnboundedReceiver<VadEvent>) {
    loop {
        tokio::select! {
            _ = session.cancel_session.cancelled() => break,
            event = vad_events.recv() => {
                match event {
                    Some(VadEvent::Interrupt) => {
                        if session.agent_status() != AgentStatus::Listening {
                            session.user_is_speaking.store(true, Ordering::SeqCst);
                            // Cancel and await the in-flight response's finalisation
                            // before clearing paced egress, so its stale flush can
                            // never land after audio belonging to a later response.
                            if let Some((token, handle)) = session.take_current_response() {
                                token.cancel();
                                let _ = handle.await;
                            }
                            session.clear_paced();
                            session.emit_status(AgentStatus::Listening, now_ms()).await;
                        }
                    }
                    Some(VadEvent::Utterance(utterance)) => {
                        session.user_is_speaking.store(false, Ordering::SeqCst);
                        // Per the at-most-one-active-response invariant: cancel and
                        // await the previous response's finalisation before the
                        // next one is spawned, never running both concurrently.
                        if let Some((prev_token, prev_handle)) = session.take_current_response() {
                            prev_token.cancel();
                            let _ = prev_handle.await;
                        }
                        let token = CancellationToken::new();
                        let resp_session = session.clone();
                        let task_token = token.clone();
                        let handle = session.tasks.spawn(async move {
                            run_response(resp_session, utterance, task_token).await;
                        });
                        session.set_current_response(token, handle);
                    }
                    None => break,
                }
            }
        }
    }
}

async fn fetch_control_or_default(config: Option<&ControlLlmConfig>, transcript: &str) -> ControlBundle {
    match config {
        Some(cfg) => control::fetch_control_bundle(transcript, cfg).await.unwrap_or_else(|err| {
            warn!(?err, "control llm request failed, using defaults");
            ControlBundle::default()
        }),
        None => ControlBundle::default(),
    }
}

/// Runs one turn: ASR + SLM + control fanout, then streams TTS audio through
/// the paced egress, cancellable at any point via `cancel`.
async fn run_response(session: Arc<Session>, utterance: Vec<u8>, cancel: CancellationToken) {
    let response_timestamp = now_ms();
    session.emit_status(AgentStatus::Thinking, response_timestamp).await;

    let audio_id = audio_id_of(&utterance);
    let diar_map = session.diar_map_for(&utterance, &audio_id).await;
    let history_snapshot = session.history.lock().unwrap().snapshot();

    let asr_fut = asr::transcribe(&utterance, &session.components.asr);
    let slm_fut = slm::stream_response(
        &history_snapshot,
        &utterance,
        &audio_id,
        &diar_map,
        &session.components.slm,
    );

    let (transcript_result, slm_result) = tokio::select! {
        _ = cancel.cancelled() => {
            info!(response_timestamp, "response cancelled before asr/slm completed");
            session.emit_status(AgentStatus::Listening, now_ms()).await;
            return;
        }
        res = futures::future::join(asr_fut, slm_fut) => res,
    };

    let transcript = match transcript_result {
        Ok(t) => t,
        Err(err) => {
            warn!(?err, "asr failed, abandoning this turn");
            session.emit_status(AgentStatus::Listening, now_ms()).await;
            return;
        }
    };

    session
        .history
        .lock()
        .unwrap()
        .append(Message::user(utterance.clone(), transcript.clone()));

    let mut slm_stream = match slm_result {
        Ok(s) => Box::pin(s),
        Err(err) => {
            warn!(?err, "slm stream failed to start, abandoning this turn");
            session.emit_status(AgentStatus::Listening, now_ms()).await;
            return;
        }
    };

    let tts_control_fut = fetch_control_or_default(session.components.tts_control.as_ref(), &transcript);
    let diar_control_fut = fetch_control_or_default(session.components.diar_control.as_ref(), &transcript);

    let (tts_control, diar_control) = tokio::select! {
        _ = cancel.cancelled() => {
            session.emit_status(AgentStatus::Listening, now_ms()).await;
            return;
        }
        res = futures::future::join(tts_control_fut, diar_control_fut) => res,
    };

    if session.user_is_speaking.load(Ordering::SeqCst) || !diar_control.response {
        session.emit_status(AgentStatus::Listening, now_ms()).await;
        return;
    }

    session.maybe_set_avatar(&tts_control.timbre).await;
    session.set_response_timestamp(response_timestamp);

    let ref_audio = asr::pcm_to_wav(&utterance, 16000, 1, 16);
    let ref_text = transcript.clone();
    let tts_config = session.components.tts.clone();
    let session_id = session.session_id.clone();
    let response_id = response_timestamp.to_string();

    let (pcm_tx, mut pcm_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let full_text = Arc::new(StdMutex::new(String::new()));

    let producer_cancel = cancel.clone();
    let producer_full_text = full_text.clone();
    let tts_task = tokio::spawn(async move {
        let mut segmenter = tts::TtsSegmenter::new();
        loop {
            tokio::select! {
                _ = producer_cancel.cancelled() => break,
                delta = slm_stream.next() => {
                    match delta {
                        Some(Ok(text)) => {
                            producer_full_text.lock().unwrap().push_str(&text);
                            if let Some(segment) = segmenter.push(&text) {
                                if let Err(err) = tts::stream_segment(
                                    &segment, &ref_audio, &ref_text, &tts_control,
                                    &session_id, &response_id, &tts_config, &pcm_tx,
                                ).await {
                                    warn!(?err, "tts segment failed");
                                }
                            }
                        }
                        Some(Err(err)) => {
                            warn!(?err, "slm stream error mid-response");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
        if !producer_cancel.is_cancelled() {
            if let Some(remainder) = segmenter.flush() {
                if let Err(err) = tts::stream_segment(
                    &remainder, &ref_audio, &ref_text, &tts_control,
                    &session_id, &response_id, &tts_config, &pcm_tx,
                ).await {
                    warn!(?err, "final tts segment failed");
                }
            }
        }
    });

    let mut speaking_announced = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = pcm_rx.recv() => {
                match chunk {
                    Some(pcm) => {
                        if session.user_is_speaking.load(Ordering::SeqCst) {
                            break;
                        }
                        if !speaking_announced {
                            session.emit_status(AgentStatus::Speaking, response_timestamp).await;
                            speaking_announced = true;
                        }
                        session.paced.lock().unwrap().write(&pcm);
                    }
                    None => break,
                }
            }
        }
    }

    if cancel.is_cancelled() {
        tts_task.abort();
        info!(response_timestamp, "response cancelled mid-speech");
    } else {
        let _ = tts_task.await;
    }

    let final_text = full_text.lock().unwrap().clone();
    if !final_text.is_empty() {
        session.history.lock().unwrap().append(Message::assistant(final_text));
    }
    session.paced.lock().unwrap().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_plausible_and_monotonic() {
        let a = now_ms();
        let b = now_ms();
        assert!(a > 1_700_000_000_000);
        assert!(b >= a);
    }

    #[tokio::test]
    async fn fetch_control_or_default_falls_back_with_no_config() {
        let bundle = fetch_control_or_default(None, "hello").await;
        assert_eq!(bundle, ControlBundle::default());
    }

    #[tokio::test]
    async fn fetch_control_or_default_falls_back_on_request_failure() {
        // A config pointing nowhere must still resolve to defaults, never panic
        // or propagate the transport error into the response pipeline.
        let cfg = ControlLlmConfig {
            base_url: "http://127.0.0.1:1".into(),
            model: "unused".into(),
            api_key: None,
            api_key_env: None,
            timeout_secs: 1,
        };
        let bundle = fetch_control_or_default(Some(&cfg), "hello").await;
        assert_eq!(bundle, ControlBundle::default());
    }
}
