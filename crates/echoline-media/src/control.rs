//! Control-LLM clients: the non-streaming "fix the parameters" endpoint that
//! decides per-response voice/emotion/response-gating, and the diarisation
//! endpoint that maps utterance audio ids to speaker labels.

use std::collections::HashMap;

use echoline_core::config::ControlLlmConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Normalized control parameters for one response turn. Unknown keys in the
/// control-LLM's raw JSON are dropped; missing keys fall back to these
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlBundle {
    #[serde(default)]
    pub diarization: bool,
    #[serde(default = "default_response")]
    pub response: bool,
    #[serde(default = "default_emotion")]
    pub emotion: String,
    #[serde(default = "default_speed")]
    pub speed: String,
    #[serde(default = "default_timbre")]
    pub timbre: String,
}

fn default_response() -> bool {
    true
}

fn default_emotion() -> String {
    "default".into()
}

fn default_speed() -> String {
    "default".into()
}

fn default_timbre() -> String {
    "default".into()
}

impl Default for ControlBundle {
    fn default() -> Self {
        Self {
            diarization: false,
            response: default_response(),
            emotion: default_emotion(),
            speed: default_speed(),
            timbre: default_timbre(),
        }
    }
}

/// Baseline for a control-LLM's response once it's known to be configured.
/// Every field matches [`ControlBundle::default`] except `response`, which
/// fails closed: a configured LLM that omits the key means "don't respond",
/// not "respond". This mirrors the original's `fix_control`, which always
/// injects `response: None` for an omitted key rather than `True` — the
/// `True`-ish fallback only applies when no control LLM is configured at
/// all (`fetch_control_or_default(None, _)`, which never calls this).
fn configured_baseline() -> ControlBundle {
    ControlBundle {
        response: false,
        ..ControlBundle::default()
    }
}

/// Coerce an arbitrary JSON value (as produced by a control-LLM that may not
/// respect the schema) into a fixed-shape [`ControlBundle`], keeping only
/// recognized keys and falling back to [`configured_baseline`] for the rest.
pub fn normalize_control(raw: &serde_json::Value) -> ControlBundle {
    let mut bundle = configured_baseline();

    let Some(obj) = raw.as_object() else {
        return bundle;
    };

    if let Some(v) = obj.get("diarization").and_then(|v| v.as_bool()) {
        bundle.diarization = v;
    }
    if let Some(v) = obj.get("response").and_then(|v| v.as_bool()) {
        bundle.response = v;
    }
    if let Some(v) = obj.get("emotion").and_then(|v| v.as_str()) {
        bundle.emotion = v.to_string();
    }
    if let Some(v) = obj.get("speed").and_then(|v| v.as_str()) {
        bundle.speed = v.to_string();
    }
    if let Some(v) = obj.get("timbre").and_then(|v| v.as_str()) {
        bundle.timbre = v.to_string();
    }

    bundle
}

/// Ask the control-LLM to decide this turn's voice/emotion/response-gating
/// parameters from the user's transcript.
pub async fn fetch_control_bundle(transcript: &str, config: &ControlLlmConfig) -> anyhow::Result<ControlBundle> {
    let api_key = config.resolve_api_key();

    debug!(model = %config.model, "requesting control bundle");

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_secs))
        .build()?;

    let mut req = client
        .post(format!("{}/chat/completions", config.base_url.trim_end_matches('/')))
        .json(&serde_json::json!({
            "model": config.model,
            "messages": [{ "role": "user", "content": transcript }],
            "stream": false,
        }));
    if let Some(api_key) = api_key {
        req = req.header("Authorization", format!("Bearer {api_key}"));
    }

    let resp = req.send().await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("control-llm error {status}: {body}");
    }

    #[derive(Deserialize)]
    struct Completion {
        choices: Vec<Choice>,
    }
    #[derive(Deserialize)]
    struct Choice {
        message: ChoiceMessage,
    }
    #[derive(Deserialize)]
    struct ChoiceMessage {
        content: String,
    }

    let completion: Completion = resp.json().await?;
    let content = completion
        .choices
        .first()
        .map(|c| c.message.content.as_str())
        .unwrap_or("{}");

    let raw: serde_json::Value = serde_json::from_str(content).unwrap_or(serde_json::json!({}));
    Ok(normalize_control(&raw))
}

/// Ask the diarisation service which speaker said which utterance, keyed by
/// `audio_id`.
pub async fn diarize(audio: &[u8], audio_id: &str, config: &ControlLlmConfig) -> anyhow::Result<HashMap<String, String>> {
    let wav = crate::asr::pcm_to_wav(audio, 16000, 1, 16);
    let params = serde_json::json!({ "sent_id": audio_id });

    let part = reqwest::multipart::Part::bytes(wav)
        .file_name("audio.wav")
        .mime_str("audio/wav")?;
    let form = reqwest::multipart::Form::new()
        .text("params", params.to_string())
        .part("new_audio", part);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_secs))
        .build()?;

    let mut req = client.post(&config.base_url).multipart(form);
    if let Some(api_key) = config.resolve_api_key() {
        req = req.header("Authorization", format!("Bearer {api_key}"));
    }

    let resp = req.send().await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("diar error {status}: {body}");
    }

    Ok(resp.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_applies_defaults_for_missing_keys() {
        let raw = serde_json::json!({ "emotion": "happy" });
        let bundle = normalize_control(&raw);
        assert_eq!(bundle.emotion, "happy");
        // A configured control LLM that omits "response" fails closed.
        assert!(!bundle.response);
        assert_eq!(bundle.speed, "default");
    }

    #[test]
    fn normalize_drops_unknown_keys() {
        let raw = serde_json::json!({ "emotion": "sad", "bogus_field": 123 });
        let bundle = normalize_control(&raw);
        assert_eq!(bundle.emotion, "sad");
    }

    #[test]
    fn normalize_non_object_falls_back_to_configured_baseline() {
        let raw = serde_json::json!("not an object");
        let bundle = normalize_control(&raw);
        assert_eq!(bundle, configured_baseline());
    }

    #[test]
    fn normalize_ignores_wrong_typed_values() {
        let raw = serde_json::json!({ "response": "not-a-bool", "speed": 42 });
        let bundle = normalize_control(&raw);
        assert!(!bundle.response);
        assert_eq!(bundle.speed, "default");
    }

    #[test]
    fn normalize_honors_explicit_response_true() {
        let raw = serde_json::json!({ "response": true });
        let bundle = normalize_control(&raw);
        assert!(bundle.response);
    }

    #[test]
    fn unconfigured_default_still_responds() {
        assert!(ControlBundle::default().response);
    }
}
