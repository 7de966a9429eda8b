//! Wire formats for the audio and event websockets (see `EXTERNAL INTERFACES`).

use serde::{Deserialize, Serialize};

/// A frame sent outbound on the audio channel. Inbound audio frames are raw
/// binary PCM16 and carry no envelope, so only the outbound shape is
/// modelled here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFrame {
    /// Base64 of PCM16 bytes when `data_type == "bytes"`, plain text when
    /// `data_type == "text"`.
    pub data: String,
    pub data_type: DataType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bytes,
    Text,
}

impl DataFrame {
    pub fn bytes(base64_payload: String, timestamp: Option<i64>) -> Self {
        Self {
            data: base64_payload,
            data_type: DataType::Bytes,
            timestamp,
            text_type: None,
        }
    }

    pub fn text(text: String, text_type: Option<&str>) -> Self {
        Self {
            data: text,
            data_type: DataType::Text,
            timestamp: None,
            text_type: text_type.map(str::to_string),
        }
    }
}

/// A frame sent outbound on the event channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    pub data: serde_json::Value,
}

/// One of the three values the dialogue state machine can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Listening,
    Thinking,
    Speaking,
}

impl EventFrame {
    pub fn agent_status_changed(status: AgentStatus, timestamp_ms: i64) -> Self {
        Self {
            event: "agent_status_changed".into(),
            data: serde_json::json!({ "timestamp": timestamp_ms, "status": status }),
        }
    }

    pub fn set_avatar(avatar: &str) -> Self {
        Self {
            event: "set_avatar".into(),
            data: serde_json::json!({ "avatar": avatar }),
        }
    }
}

/// Body of `POST /start_session`.
#[derive(Debug, Clone, Deserialize)]
pub struct StartSessionRequest {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_num_channels")]
    pub num_channels: u16,
    #[serde(default)]
    pub target_language: Option<String>,
    #[serde(default)]
    pub voice_clone: bool,
    #[serde(default)]
    pub generate_speech: bool,
    #[serde(default)]
    pub noise_reduction: bool,
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_num_channels() -> u16 {
    1
}

#[derive(Debug, Clone, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
}

/// Body of `POST /mute`.
#[derive(Debug, Clone, Deserialize)]
pub struct MuteRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MuteResponse {
    pub status: &'static str,
}

impl Default for MuteResponse {
    fn default() -> Self {
        Self { status: "success" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_bytes_shape() {
        let f = DataFrame::bytes("aGVsbG8=".into(), Some(1234));
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["data_type"], "bytes");
        assert_eq!(v["timestamp"], 1234);
    }

    #[test]
    fn data_frame_text_omits_timestamp() {
        let f = DataFrame::text("hi there".into(), Some("asr"));
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["data_type"], "text");
        assert_eq!(v["text_type"], "asr");
        assert!(v.get("timestamp").is_none());
    }

    #[test]
    fn start_session_request_defaults() {
        let req: StartSessionRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.sample_rate, 16000);
        assert_eq!(req.num_channels, 1);
        assert!(!req.voice_clone);
    }
}
