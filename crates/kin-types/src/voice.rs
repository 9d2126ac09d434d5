//! Voice data model shared by the pipeline and the HTTP surface.
//!
//! Every value here lives for the duration of a single client request:
//! a transcription is produced once per upload, text segments are emitted
//! while the language model is still answering, and audio chunks are relayed
//! to the client as soon as they are decoded.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A fragment of encoded audio (typically MPEG frames).
pub type AudioChunk = Bytes;

/// One timed span of a transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start offset in seconds.
    pub start: f64,
    /// End offset in seconds.
    pub end: f64,
    /// Recognised text for the span.
    pub text: String,
}

/// Word-level timing reported by providers that support it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptWord {
    #[serde(alias = "word")]
    pub text: String,
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
}

/// The result of transcribing one audio upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Full recognised text. May be empty or whitespace when nothing was said.
    pub text: String,
    /// Detected language code, when the provider reports one.
    pub language: Option<String>,
    /// Provider confidence in the detected language (0.0 - 1.0).
    pub language_probability: Option<f32>,
    /// Audio duration in seconds.
    pub duration: Option<f64>,
    /// Ordered timed spans.
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
    /// Ordered word timings.
    #[serde(default)]
    pub words: Vec<TranscriptWord>,
}

impl TranscriptionResult {
    /// Returns `true` if the transcription contains any non-whitespace text.
    pub fn has_speech(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// A speakable unit of model output.
///
/// `text` is trimmed and never empty. Segments are numbered from zero in
/// emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSegment {
    pub text: String,
    pub sequence_index: usize,
}

/// Voice parameters sent with every synthesis request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
    #[serde(default)]
    pub style: f32,
    #[serde(default = "default_speaker_boost")]
    pub use_speaker_boost: bool,
}

fn default_stability() -> f32 {
    0.5
}

fn default_similarity_boost() -> f32 {
    0.75
}

fn default_speaker_boost() -> bool {
    true
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
            style: 0.0,
            use_speaker_boost: default_speaker_boost(),
        }
    }
}

/// Lifecycle of a single voice request.
///
/// `Idle → Transcribing → Streaming → Draining → Done`, or `Failed` from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Idle,
    Transcribing,
    Streaming,
    Draining,
    Done,
    Failed,
}

impl PipelineState {
    /// Returns `true` for `Done` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Transcribing => "transcribing",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}
