//! Speech-to-text: one-shot transcription of a completed utterance.

use echoline_core::config::AsrConfig;
use tracing::debug;

/// Wrap raw 16-bit PCM little-endian bytes in a WAV container.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let data_len = pcm.len();
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_len as u32;

    let mut wav = Vec::with_capacity(44 + data_len);

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());
    wav.extend_from_slice(pcm);

    wav
}

/// Transcribe a completed utterance's raw PCM16 bytes.
pub async fn transcribe(pcm: &[u8], config: &AsrConfig) -> anyhow::Result<String> {
    let wav_data = pcm_to_wav(pcm, 16000, 1, 16);

    debug!(url = %config.url, wav_bytes = wav_data.len(), "sending audio for transcription");

    let part = reqwest::multipart::Part::bytes(wav_data)
        .file_name("audio.wav")
        .mime_str("application/octet-stream")?;
    let form = reqwest::multipart::Form::new().part("audio", part);

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
        anyhow::bail!("ASR error {status}: {body}");
    }

    let body: serde_json::Value = resp.json().await?;
    let transcript = body
        .get("transcript")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("ASR response missing 'transcript' field"))?;

    Ok(transcript.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_is_well_formed() {
        let pcm = vec![0u8; 16000 * 2]; // 1 second at 16kHz mono
        let wav = pcm_to_wav(&pcm, 16000, 1, 16);

        assert_eq!(wav.len(), 44 + 16000 * 2);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");

        let sr = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(sr, 16000);
    }
}
