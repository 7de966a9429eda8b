//! Speech-aware language model client — an OpenAI-compatible chat completions
//! endpoint extended with `input_audio` content parts, streamed over SSE.

use std::collections::HashMap;

use echoline_core::config::SlmConfig;
use echoline_core::history::Message;
use futures::Stream;
use serde::Deserialize;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::sse::parse_sse_stream;

/// Render one history message into the OpenAI-style content it contributes.
/// `diar_map` maps `audio_id -> speaker label`; a hit prepends a
/// `[说话人 N] ` text part (or plain-text prefix in text-history mode).
fn message_to_json(
    message: &Message,
    diar_map: &HashMap<String, String>,
    use_text_history: bool,
) -> serde_json::Value {
    match message {
        Message::User { audio_bytes, audio_id, transcript } => {
            let speaker_prefix = diar_map.get(audio_id).map(|label| format!("[说话人 {label}] "));
            if use_text_history {
                let content = match &speaker_prefix {
                    Some(prefix) => format!("{prefix}{transcript}"),
                    None => transcript.clone(),
                };
                serde_json::json!({ "role": "user", "content": content })
            } else {
                let wav = crate::asr::pcm_to_wav(audio_bytes, 16000, 1, 16);
                let audio_b64 = base64_encode(&wav);
                let mut content = Vec::new();
                if let Some(prefix) = &speaker_prefix {
                    content.push(serde_json::json!({ "type": "text", "text": prefix }));
                }
                content.push(serde_json::json!({
                    "type": "input_audio",
                    "input_audio": { "data": audio_b64, "format": "wav" },
                    "id": audio_id,
                    "transcript": transcript,
                }));
                serde_json::json!({ "role": "user", "content": content })
            }
        }
        Message::Assistant { text } => {
            serde_json::json!({ "role": "assistant", "content": text })
        }
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Build the final `input_audio` turn for the utterance currently being
/// answered, optionally prefixed with a diarisation speaker tag.
fn final_turn_json(audio: &[u8], audio_id: &str, speaker_label: Option<&str>) -> serde_json::Value {
    let speaker_prefix = speaker_label.map(|label| format!("[说话人 {label}] "));
    let speaker_prefix = speaker_prefix.as_deref();
    let wav = crate::asr::pcm_to_wav(audio, 16000, 1, 16);
    let audio_b64 = base64_encode(&wav);
    let mut content = Vec::new();
    if let Some(prefix) = speaker_prefix {
        content.push(serde_json::json!({ "type": "text", "text": prefix }));
    }
    content.push(serde_json::json!({
        "type": "input_audio",
        "input_audio": { "data": audio_b64, "format": "wav" },
        "id": audio_id,
    }));
    serde_json::json!({ "role": "user", "content": content })
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Stream a response to the conversation so far, appending the new utterance
/// (and an optional diarisation speaker tag) as the final turn.
pub async fn stream_response(
    history: &[Message],
    new_audio: &[u8],
    new_audio_id: &str,
    diar_map: &HashMap<String, String>,
    config: &SlmConfig,
) -> anyhow::Result<impl Stream<Item = anyhow::Result<String>>> {
    let api_key = config
        .resolve_api_key()
        .ok_or_else(|| anyhow::anyhow!("no slm api key configured"))?;

    let mut messages: Vec<serde_json::Value> = Vec::new();
    if let Some(system_prompt) = &config.system_prompt {
        messages.push(serde_json::json!({ "role": "system", "content": system_prompt }));
    }
    for message in history {
        messages.push(message_to_json(message, diar_map, config.use_text_history));
    }
    messages.push(final_turn_json(
        new_audio,
        new_audio_id,
        diar_map.get(new_audio_id).map(String::as_str),
    ));

    debug!(model = %config.model, base_url = %config.base_url, "streaming slm response");

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_secs))
        .build()?;

    let resp = client
        .post(format!("{}/chat/completions", config.base_url.trim_end_matches('/')))
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&serde_json::json!({
            "model": config.model,
            "messages": messages,
            "stream": true,
        }))
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("slm error {status}: {body}");
    }

    let sse_stream = parse_sse_stream(resp);

    let text_stream = futures::stream::unfold(Box::pin(sse_stream), |mut sse| async move {
        loop {
            match sse.next().await {
                Some(Ok(event)) => {
                    let data = event.data.trim();
                    if data == "[DONE]" {
                        return None;
                    }
                    let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
                        Ok(c) => c,
                        Err(_) => continue,
                    };
                    if let Some(content) = chunk.choices.first().and_then(|c| c.delta.content.clone()) {
                        if !content.is_empty() {
                            return Some((Ok(content), sse));
                        }
                    }
                    continue;
                }
                Some(Err(e)) => return Some((Err(e), sse)),
                None => return None,
            }
        }
    });

    Ok(text_stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_history_mode_omits_audio() {
        let msg = Message::user(vec![1, 2, 3], "hello".into());
        let json = message_to_json(&msg, &HashMap::new(), true);
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn text_history_mode_prepends_speaker_label() {
        let msg = Message::user(vec![1, 2, 3], "hello".into());
        let audio_id = echoline_core::history::audio_id_of(&[1, 2, 3]);
        let diar_map = HashMap::from([(audio_id, "1".to_string())]);
        let json = message_to_json(&msg, &diar_map, true);
        assert_eq!(json["content"], "[说话人 1] hello");
    }

    #[test]
    fn audio_history_mode_embeds_wav_base64() {
        let msg = Message::user(vec![1, 2, 3, 4], "hello".into());
        let json = message_to_json(&msg, &HashMap::new(), false);
        assert_eq!(json["content"][0]["type"], "input_audio");
        assert!(json["content"][0]["input_audio"]["data"].as_str().unwrap().len() > 0);
        assert_eq!(json["content"][0]["transcript"], "hello");
    }

    #[test]
    fn final_turn_includes_speaker_prefix_when_present() {
        let turn = final_turn_json(&[0, 1], "abc123", Some("2"));
        assert_eq!(turn["content"][0]["type"], "text");
        assert_eq!(turn["content"][0]["text"], "[说话人 2] ");
        assert_eq!(turn["content"][1]["type"], "input_audio");
    }

    #[test]
    fn final_turn_without_speaker_prefix_has_single_part() {
        let turn = final_turn_json(&[0, 1], "abc123", None);
        assert_eq!(turn["content"].as_array().unwrap().len(), 1);
    }
}
