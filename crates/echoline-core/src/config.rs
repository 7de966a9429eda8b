//! Configuration loading and validation.
//!
//! A single declarative JSON5 document fills the component slots the
//! dialogue core needs (`vad`, `asr`, `slm`, `tts`, `tts_control`,
//! `diar_control`) plus the gateway's own HTTP/WS surface. The core does
//! not care about the file format; only the resolved config structs matter.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vad: Option<VadConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub asr: Option<AsrConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slm: Option<SlmConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_control: Option<ControlLlmConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub diar_control: Option<ControlLlmConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Remote VAD websocket endpoint and barge-in timing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// e.g. `ws://localhost:8200/vad`.
    pub url: String,
    #[serde(default = "default_left_pad_ms")]
    pub left_pad_ms: u32,
    #[serde(default = "default_voiced_ms_to_interrupt")]
    pub voiced_ms_to_interrupt: u32,
}

fn default_left_pad_ms() -> u32 {
    300
}

fn default_voiced_ms_to_interrupt() -> u32 {
    1000
}

/// Speech recognition endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl AsrConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Speech-aware language model — an OpenAI-compatible streaming chat
/// endpoint that accepts `input_audio` content parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub use_text_history: bool,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    /// Optional per-utterance diarisation endpoint; when set, history turns
    /// are rendered with a `[speaker N]` prefix keyed by audio id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diar: Option<ControlLlmConfig>,
}

impl SlmConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Streaming text-to-speech endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Non-streaming control-LLM endpoint (shared shape for `tts_control` and
/// `diar_control` slots).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlLlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl ControlLlmConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

fn default_http_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,

    /// Egress chunk cadence in ms for the paced live-stream (default 100).
    #[serde(default = "default_chunk_ms")]
    pub chunk_ms: u64,
}

fn default_port() -> u16 {
    18790
}

fn default_chunk_ms() -> u64 {
    100
}

/// TLS configuration for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: u32,
}

fn default_max_connections_per_ip() -> u32 {
    10
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "echoline_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,
}

fn default_log_format() -> String {
    "plain".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::EcholineError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::EcholineError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn config_dir() -> PathBuf {
        data_dir().join("config.json5")
    }

    pub fn workspace_dir(&self) -> PathBuf {
        data_dir()
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(default_port())
    }

    pub fn chunk_ms(&self) -> u64 {
        self.gateway.as_ref().map(|g| g.chunk_ms).unwrap_or(default_chunk_ms())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.vad.is_none() {
            warnings.push("no vad component configured".to_string());
        }
        if let Some(asr) = &self.asr {
            if asr.resolve_api_key().is_none() {
                warnings.push("asr has no api key configured".to_string());
            }
        }
        if let Some(tls) = self.gateway.as_ref().and_then(|g| g.tls.as_ref()) {
            if !Path::new(&tls.cert_path).exists() {
                errors.push(format!("TLS certificate file not found: {}", tls.cert_path));
            }
            if !Path::new(&tls.key_path).exists() {
                errors.push(format!("TLS key file not found: {}", tls.key_path));
            }
        }
        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("gateway port cannot be 0".to_string());
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Echoline data: `~/.echoline/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".echoline")
}
