//! Streaming text-to-speech with incremental sentence-boundary segmentation.
//!
//! The SLM emits text token-by-token; we don't want to wait for the whole
//! response before speaking, nor POST every single token. [`TtsSegmenter`]
//! buffers deltas and releases a segment as soon as the buffer ends on a
//! sentence-terminating punctuation mark and is long enough to be worth a
//! round trip.

use echoline_core::config::TtsConfig;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::control::ControlBundle;

const PUNCTUATION: &[char] = &[
    '，', '。', '！', '？', ',', '.', '!', '?', ':', '：', '；', ';', '、', '\n', '\t', '\r', '•',
];

/// Split `text` at the longest prefix (> 10 chars) that ends on a
/// sentence-terminating punctuation mark. Returns `(segment, remainder)`;
/// `segment` is empty if no such prefix exists yet.
pub fn extract_tts_text(text: &str) -> (String, String) {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();

    if n > 10 {
        for i in (11..=n).rev() {
            if PUNCTUATION.contains(&chars[i - 1]) {
                let segment: String = chars[..i].iter().collect();
                let remainder: String = chars[i..].iter().collect();
                return (segment, remainder);
            }
        }
    }

    (String::new(), text.to_string())
}

/// Incrementally accumulates SLM text deltas and yields sentence-sized
/// segments ready for synthesis.
#[derive(Debug, Default)]
pub struct TtsSegmenter {
    buffer: String,
}

impl TtsSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a new text delta; returns a segment if one became ready.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.buffer.push_str(delta);
        let (segment, remainder) = extract_tts_text(&self.buffer);
        if segment.is_empty() {
            None
        } else {
            self.buffer = remainder;
            Some(segment)
        }
    }

    /// Drain whatever is left in the buffer once the SLM stream ends.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

/// Synthesize one text segment and stream its PCM16 chunks to `chunk_tx`.
///
/// `ref_audio` is the user's utterance WAV, used as the voice reference, and
/// `ref_text` its transcript. `control` carries the per-response
/// timbre/speed/emotion already resolved by the control LLM.
#[allow(clippy::too_many_arguments)]
pub async fn stream_segment(
    gen_text: &str,
    ref_audio: &[u8],
    ref_text: &str,
    control: &ControlBundle,
    session_id: &str,
    response_id: &str,
    config: &TtsConfig,
    chunk_tx: &mpsc::UnboundedSender<Vec<u8>>,
) -> anyhow::Result<()> {
    let gen_text = gen_text.trim();
    if gen_text.is_empty() {
        return Ok(());
    }

    debug!(url = %config.url, text_len = gen_text.len(), "starting tts segment stream");

    let params = serde_json::json!({
        "gen_text": gen_text,
        "ref_text": ref_text,
        "voice": control.timbre,
        "speed": control.speed,
        "emotion": control.emotion,
        "session_id": session_id,
        "response_id": response_id,
        "stream": true,
        "text_frontend": true,
        "dtype": "np.int16",
    });

    let ref_part = reqwest::multipart::Part::bytes(ref_audio.to_vec())
        .file_name("ref_audio.wav")
        .mime_str("audio/wav")?;
    let form = reqwest::multipart::Form::new()
        .text("params", params.to_string())
        .part("ref_audio", ref_part);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_secs))
        .build()?;

    let mut req = client.post(&config.url).multipart(form);
    if let Some(api_key) = config.resolve_api_key() {
        req = req.header("Authorization", format!("Bearer {api_key}"));
    }

    let resp = req.send().await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("TTS error {status}: {body}");
    }

    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let bytes = chunk?;
        if bytes.is_empty() {
            continue;
        }
        if chunk_tx.send(bytes.to_vec()).is_err() {
            debug!("tts chunk receiver dropped, stopping stream");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_never_segments() {
        let (seg, rest) = extract_tts_text("hi.");
        assert!(seg.is_empty());
        assert_eq!(rest, "hi.");
    }

    #[test]
    fn segments_at_last_qualifying_punctuation() {
        let (seg, rest) = extract_tts_text("This is a sentence. And another");
        assert_eq!(seg, "This is a sentence.");
        assert_eq!(rest, " And another");
    }

    #[test]
    fn no_punctuation_keeps_everything_buffered() {
        let (seg, rest) = extract_tts_text("this has no terminator and is quite long");
        assert!(seg.is_empty());
        assert_eq!(rest, "this has no terminator and is quite long");
    }

    #[test]
    fn segmenter_releases_on_boundary_and_flushes_remainder() {
        let mut seg = TtsSegmenter::new();
        assert!(seg.push("Hello there").is_none());
        let first = seg.push(", friend. More text follows");
        assert_eq!(first, Some("Hello there, friend.".to_string()));
        let remainder = seg.flush();
        assert_eq!(remainder, Some(" More text follows".to_string()));
        assert!(seg.flush().is_none());
    }

    #[test]
    fn chinese_punctuation_terminates_segment() {
        let (seg, rest) = extract_tts_text("这是一个完整又漂亮的句子。还有更多");
        assert_eq!(seg, "这是一个完整又漂亮的句子。");
        assert_eq!(rest, "还有更多");
    }

    #[test]
    fn punctuation_inside_first_ten_chars_is_not_enough() {
        // The prefix must exceed 10 chars even when the only punctuation
        // mark sits right at the boundary.
        let (seg, rest) = extract_tts_text("这是一个完整的句子。还有更多");
        assert!(seg.is_empty());
        assert_eq!(rest, "这是一个完整的句子。还有更多");
    }
}
