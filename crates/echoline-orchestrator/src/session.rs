//! Per-session state: history, component configs, channel handles, and the
//! task bookkeeping the orchestrator drives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use echoline_core::config::{AsrConfig, ControlLlmConfig, SlmConfig, TtsConfig};
use echoline_core::history::History;
use echoline_core::wire::AgentStatus;
use echoline_media::resampler::StreamingResampler;
use echoline_media::vad::{connect as vad_connect, VadEvent, VadHandle};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audio_channel::AudioEgress;
use crate::event_channel::EventEgress;
use crate::paced_egress::PacedEgress;
use crate::task_registry::TaskRegistry;

/// The component endpoints one session was configured with. `tts_control`
/// gates voice/emotion/speed; `diar_control` gates whether to respond at
/// all; `asr`/`slm`/`tts` are required.
pub struct SessionComponents {
    pub asr: AsrConfig,
    pub slm: SlmConfig,
    pub tts: TtsConfig,
    pub tts_control: Option<ControlLlmConfig>,
    pub diar_control: Option<ControlLlmConfig>,
}

pub struct Session {
    pub session_id: String,
    pub components: SessionComponents,

    pub history: StdMutex<History>,
    pub agent_status: StdMutex<AgentStatus>,
    pub user_is_speaking: AtomicBool,
    last_avatar: StdMutex<Option<String>>,

    /// Raw inbound PCM pushed by the audio websocket's read loop, and by
    /// `mute_user()`. Drained by the orchestrator's ingress pump, which
    /// resamples and forwards to the VAD.
    pub ingress_tx: mpsc::UnboundedSender<Vec<u8>>,
    ingress_rx: StdMutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    resampler: Option<StdMutex<StreamingResampler>>,

    pub vad: VadHandle,
    vad_events: StdMutex<Option<mpsc::UnboundedReceiver<VadEvent>>>,

    pub audio_egress: RwLock<Option<AudioEgress>>,
    pub event_egress: RwLock<Option<EventEgress>>,

    pub paced: StdMutex<PacedEgress>,
    pub tasks: TaskRegistry,
    /// Cancellation handle and join handle for the single in-flight
    /// response, distinct from the task registry's bulk-cancel-everything
    /// `destroy()`. The join handle lets a superseding caller await the
    /// previous response's finalisation (history append, paced-egress
    /// flush) before starting the next one, per the invariant that at most
    /// one response is ever active.
    pub current_response: StdMutex<Option<(CancellationToken, JoinHandle<()>)>>,
    pub cancel_session: CancellationToken,
    /// `response_timestamp` of whatever turn is currently being spoken, so
    /// the paced-egress ticker can stamp outbound audio frames with it.
    response_timestamp: StdMutex<i64>,

    pub sample_rate: u32,
}

impl Session {
    pub async fn new(
        session_id: String,
        components: SessionComponents,
        vad_config: &echoline_core::config::VadConfig,
        user_sample_rate: u32,
        user_channels: u16,
        chunk_ms: u64,
    ) -> anyhow::Result<Self> {
        let (vad, vad_events) = vad_connect(vad_config).await?;
        let (ingress_tx, ingress_rx) = mpsc::unbounded_channel();

        let resampler = if user_sample_rate != 16_000 || user_channels != 1 {
            Some(StdMutex::new(StreamingResampler::new(
                user_sample_rate,
                16_000,
                user_channels as usize,
                1,
                100,
            )))
        } else {
            None
        };

        Ok(Self {
            session_id,
            components,
            history: StdMutex::new(History::new()),
            agent_status: StdMutex::new(AgentStatus::Listening),
            user_is_speaking: AtomicBool::new(false),
            last_avatar: StdMutex::new(None),
            ingress_tx,
            ingress_rx: StdMutex::new(Some(ingress_rx)),
            resampler,
            vad,
            vad_events: StdMutex::new(Some(vad_events)),
            audio_egress: RwLock::new(None),
            event_egress: RwLock::new(None),
            paced: StdMutex::new(PacedEgress::new(chunk_ms, 16_000, 1)),
            tasks: TaskRegistry::new(),
            current_response: StdMutex::new(None),
            cancel_session: CancellationToken::new(),
            response_timestamp: StdMutex::new(0),
            sample_rate: user_sample_rate,
        })
    }

    /// Takes the ingress receiver; the orchestrator's ingress pump owns it
    /// for the session's lifetime. Only callable once.
    pub fn take_ingress_rx(&self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.ingress_rx.lock().unwrap().take()
    }

    pub fn take_vad_events(&self) -> Option<mpsc::UnboundedReceiver<VadEvent>> {
        self.vad_events.lock().unwrap().take()
    }

    pub fn resample(&self, chunk: &[u8]) -> Vec<u8> {
        match &self.resampler {
            Some(r) => r.lock().unwrap().push(chunk, false),
            None => chunk.to_vec(),
        }
    }

    /// Forces the VAD to finalize whatever utterance is in progress by
    /// injecting a frame of real silence. The Python original injected the
    /// literal ASCII bytes of the string "0x00" here, which is not actual
    /// silence; this pushes genuine zero-valued PCM16 samples instead.
    pub fn mute_user(&self) {
        let _ = self.ingress_tx.send(vec![0u8; self.sample_rate as usize]);
    }

    pub fn agent_status(&self) -> AgentStatus {
        *self.agent_status.lock().unwrap()
    }

    pub fn set_agent_status(&self, status: AgentStatus) {
        *self.agent_status.lock().unwrap() = status;
    }

    /// Emits `set_avatar` only when the avatar actually changed this turn.
    pub async fn maybe_set_avatar(&self, avatar: &str) {
        let changed = {
            let mut last = self.last_avatar.lock().unwrap();
            let changed = last.as_deref() != Some(avatar);
            *last = Some(avatar.to_string());
            changed
        };
        if changed && avatar != "default" {
            if let Some(egress) = self.event_egress.read().await.as_ref() {
                egress.set_avatar(avatar);
            }
        }
    }

    pub async fn emit_status(&self, status: AgentStatus, timestamp_ms: i64) {
        self.set_agent_status(status);
        if let Some(egress) = self.event_egress.read().await.as_ref() {
            egress.agent_status_changed(status, timestamp_ms);
        }
    }

    /// Takes the in-flight response's cancellation token and join handle, if
    /// any, leaving the slot empty. The caller must cancel the token and
    /// await the handle before the slot is next written, so that a
    /// superseding response never starts until the previous one has
    /// actually finished finalising (history append, paced-egress flush).
    pub fn take_current_response(&self) -> Option<(CancellationToken, JoinHandle<()>)> {
        self.current_response.lock().unwrap().take()
    }

    /// Records the now-current response's cancellation token and join
    /// handle. Must only be called with an empty slot (i.e. after
    /// `take_current_response` has retired whatever ran before).
    pub fn set_current_response(&self, token: CancellationToken, handle: JoinHandle<()>) {
        *self.current_response.lock().unwrap() = Some((token, handle));
    }

    pub fn clear_paced(&self) {
        self.paced.lock().unwrap().clear();
    }

    pub fn response_timestamp(&self) -> i64 {
        *self.response_timestamp.lock().unwrap()
    }

    pub fn set_response_timestamp(&self, timestamp_ms: i64) {
        *self.response_timestamp.lock().unwrap() = timestamp_ms;
    }

    pub async fn diar_map_for(&self, audio: &[u8], audio_id: &str) -> HashMap<String, String> {
        let Some(diar_config) = &self.components.slm.diar else {
            return HashMap::new();
        };
        match echoline_media::control::diarize(audio, audio_id, diar_config).await {
            Ok(map) => map,
            Err(err) => {
                tracing::warn!(?err, "diarization request failed, proceeding without speaker labels");
                HashMap::new()
            }
        }
    }

    pub async fn destroy(&self) {
        self.cancel_session.cancel();
        self.vad.cancel.cancel();
        if let Some((token, _handle)) = self.current_response.lock().unwrap().take() {
            token.cancel();
        }
        self.tasks.destroy().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn components() -> SessionComponents {
        SessionComponents {
            asr: AsrConfig {
                url: "http://asr.example/transcribe".into(),
                api_key: None,
                api_key_env: None,
                timeout_secs: 5,
            },
            slm: SlmConfig {
                base_url: "http://slm.example".into(),
                model: "slm-1".into(),
                api_key: Some("k".into()),
                api_key_env: None,
                system_prompt: None,
                use_text_history: false,
                timeout_secs: 5,
                diar: None,
            },
            tts: TtsConfig {
                url: "http://tts.example/synthesize".into(),
                api_key: None,
                api_key_env: None,
                timeout_secs: 5,
            },
            tts_control: None,
            diar_control: None,
        }
    }

    #[test]
    fn mute_user_pushes_real_zero_bytes_not_the_ascii_literal() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let sample_rate = 16_000usize;
        let _ = tx.send(vec![0u8; sample_rate]);
        let pushed = rx.try_recv().unwrap();
        assert_eq!(pushed.len(), sample_rate);
        assert!(pushed.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn take_then_set_current_response_cancels_and_awaits_the_previous_task() {
        // Exercise the cancellation-then-await bookkeeping directly without a
        // live VAD connection: mirror `take_current_response` /
        // `set_current_response` on a bare slot.
        let slot: StdMutex<Option<(CancellationToken, JoinHandle<()>)>> = StdMutex::new(None);
        let first_token = CancellationToken::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let first_token_clone = first_token.clone();
        let first_handle = tokio::spawn(async move {
            first_token_clone.cancelled().await;
            ran_clone.store(true, Ordering::SeqCst);
        });
        *slot.lock().unwrap() = Some((first_token.clone(), first_handle));

        // Superseding must cancel the old token and await its task before the
        // slot can hold the new one.
        if let Some((prev_token, prev_handle)) = slot.lock().unwrap().take() {
            prev_token.cancel();
            prev_handle.await.unwrap();
        }

        let second_token = CancellationToken::new();
        let second_handle = tokio::spawn(async {});
        *slot.lock().unwrap() = Some((second_token.clone(), second_handle));

        assert!(first_token.is_cancelled());
        assert!(ran.load(Ordering::SeqCst));
        assert!(!second_token.is_cancelled());
    }

    #[test]
    fn components_builder_is_well_formed() {
        let c = components();
        assert_eq!(c.asr.url, "http://asr.example/transcribe");
    }
}
