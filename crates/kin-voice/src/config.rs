//! Provider configuration records.
//!
//! Each component receives one of these at construction. Credentials are
//! never serialized and are redacted from `Debug` output.

use crate::error::VoiceError;
use kin_types::VoiceSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

fn default_transcription_timeout_secs() -> u64 {
    300
}

fn default_completion_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    150
}

fn default_synthesis_model() -> String {
    "eleven_turbo_v2_5".to_string()
}

fn default_synthesis_ws_url() -> String {
    "wss://api.elevenlabs.io".to_string()
}

fn default_synthesis_http_url() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_max_message_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_queue_capacity() -> usize {
    200
}

fn default_coalesce_chunks() -> usize {
    10
}

fn default_max_chars() -> usize {
    40
}

fn default_punctuation_min_chars() -> usize {
    30
}

fn default_whitespace_min_chars() -> usize {
    40
}

fn require(value: &str, what: &str) -> Result<(), VoiceError> {
    if value.trim().is_empty() {
        return Err(VoiceError::Config(format!("{} not provided", what)));
    }
    Ok(())
}

/// Speech-to-text backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionProvider {
    /// ElevenLabs Scribe (`/v1/speech-to-text`).
    #[default]
    Scribe,
    /// OpenAI-compatible Whisper (`/v1/audio/transcriptions`).
    Whisper,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default)]
    pub provider: TranscriptionProvider,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Overrides the provider's default endpoint.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Overrides the provider's default model.
    #[serde(default)]
    pub model_id: Option<String>,
    /// Request timeout. Long, so large uploads can finish.
    #[serde(default = "default_transcription_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self::new(TranscriptionProvider::default(), String::new())
    }
}

impl fmt::Debug for TranscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptionConfig")
            .field("provider", &self.provider)
            .field("api_key", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("model_id", &self.model_id)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl TranscriptionConfig {
    pub fn new(provider: TranscriptionProvider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            api_url: None,
            model_id: None,
            timeout_secs: default_transcription_timeout_secs(),
        }
    }

    pub fn endpoint(&self) -> &str {
        match (&self.api_url, self.provider) {
            (Some(url), _) => url,
            (None, TranscriptionProvider::Scribe) => "https://api.elevenlabs.io/v1/speech-to-text",
            (None, TranscriptionProvider::Whisper) => {
                "https://api.openai.com/v1/audio/transcriptions"
            }
        }
    }

    pub fn model(&self) -> &str {
        match (&self.model_id, self.provider) {
            (Some(model), _) => model,
            (None, TranscriptionProvider::Scribe) => "scribe_v1",
            (None, TranscriptionProvider::Whisper) => "whisper-1",
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), VoiceError> {
        require(&self.api_key, "transcription api_key")
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_completion_url")]
    pub api_url: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    /// Used when a request does not specify its own limit.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: default_completion_url(),
            model: default_completion_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("api_key", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl CompletionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), VoiceError> {
        require(&self.api_key, "completion api_key")
    }
}

/// How synthesis sessions reach the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    /// Duplex WebSocket session per segment.
    #[default]
    Websocket,
    /// Blocking HTTP stream on a worker thread, relayed through a bounded queue.
    Http,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default)]
    pub mode: SynthesisMode,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default)]
    pub voice_id: String,
    #[serde(default = "default_synthesis_model")]
    pub model_id: String,
    /// Base URL for duplex sessions (scheme `ws`/`wss`).
    #[serde(default = "default_synthesis_ws_url")]
    pub ws_url: String,
    /// Base URL for the HTTP streaming endpoint.
    #[serde(default = "default_synthesis_http_url")]
    pub http_url: String,
    #[serde(default)]
    pub voice_settings: VoiceSettings,
    /// Largest single frame accepted from the provider.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Bounded queue between the blocking producer and the async consumer.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Number of raw chunks merged into one emitted chunk on the bridged path.
    #[serde(default = "default_coalesce_chunks")]
    pub coalesce_chunks: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            mode: SynthesisMode::default(),
            api_key: String::new(),
            voice_id: String::new(),
            model_id: default_synthesis_model(),
            ws_url: default_synthesis_ws_url(),
            http_url: default_synthesis_http_url(),
            voice_settings: VoiceSettings::default(),
            max_message_bytes: default_max_message_bytes(),
            queue_capacity: default_queue_capacity(),
            coalesce_chunks: default_coalesce_chunks(),
        }
    }
}

impl fmt::Debug for SynthesisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisConfig")
            .field("mode", &self.mode)
            .field("api_key", &"[REDACTED]")
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .field("ws_url", &self.ws_url)
            .field("http_url", &self.http_url)
            .field("voice_settings", &self.voice_settings)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("queue_capacity", &self.queue_capacity)
            .field("coalesce_chunks", &self.coalesce_chunks)
            .finish()
    }
}

impl SynthesisConfig {
    pub fn new(api_key: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            voice_id: voice_id.into(),
            ..Self::default()
        }
    }

    /// Endpoint for a duplex multi-context session.
    pub fn session_url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}/multi-stream-input?model_id={}",
            self.ws_url.trim_end_matches('/'),
            self.voice_id,
            self.model_id
        )
    }

    /// Endpoint for the HTTP streaming variant.
    pub fn stream_url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream",
            self.http_url.trim_end_matches('/'),
            self.voice_id
        )
    }

    pub fn validate(&self) -> Result<(), VoiceError> {
        require(&self.api_key, "synthesis api_key")?;
        require(&self.voice_id, "synthesis voice_id")?;
        if self.queue_capacity == 0 {
            return Err(VoiceError::Config(
                "synthesis queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.coalesce_chunks == 0 {
            return Err(VoiceError::Config(
                "synthesis coalesce_chunks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Flush thresholds for the segment buffer, in characters.
///
/// These were tuned by ear and carry no derivation; they are configurable so
/// deployments can trade first-audio latency against smoother synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Flush unconditionally once the buffer reaches this length.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Flush on trailing `. ! ? ,` once the buffer reaches this length.
    #[serde(default = "default_punctuation_min_chars")]
    pub punctuation_min_chars: usize,
    /// Flush on a trailing space once the buffer reaches this length.
    #[serde(default = "default_whitespace_min_chars")]
    pub whitespace_min_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            punctuation_min_chars: default_punctuation_min_chars(),
            whitespace_min_chars: default_whitespace_min_chars(),
        }
    }
}
