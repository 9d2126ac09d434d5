//! Speech-to-text.
//!
//! [`ScribeTranscriber`] and [`WhisperTranscriber`] upload audio as multipart
//! form data and map each provider's JSON into a [`TranscriptionResult`].

use crate::config::{TranscriptionConfig, TranscriptionProvider};
use crate::error::VoiceError;
use async_trait::async_trait;
use bytes::Bytes;
use kin_types::{TranscriptSegment, TranscriptWord, TranscriptionResult};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::Arc;

/// Upload content types by file extension.
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("m4a", "audio/mp4"),
    ("ogg", "audio/ogg"),
    ("opus", "audio/opus"),
    ("flac", "audio/flac"),
    ("webm", "audio/webm"),
    ("aac", "audio/aac"),
    ("aiff", "audio/aiff"),
    ("mp4", "video/mp4"),
    ("avi", "video/x-msvideo"),
    ("mkv", "video/x-matroska"),
    ("mov", "video/quicktime"),
    ("wmv", "video/x-ms-wmv"),
    ("flv", "video/x-flv"),
    ("3gp", "video/3gpp"),
];

const DEFAULT_CONTENT_TYPE: &str = "audio/mpeg";

/// Returns the upload content type for `filename`, defaulting to MP3.
pub fn content_type_for(filename: &str) -> &'static str {
    let extension = filename
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, content_type)| *content_type)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Speech-to-text capability.
///
/// Implementations make a single round trip per call. An empty or
/// whitespace-only result is *not* an error here; the caller decides what
/// silence means.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribes one audio upload.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `audio` is empty (no network call is made),
    /// `Upstream` if the provider rejects the request.
    async fn transcribe(
        &self,
        audio: Bytes,
        filename: &str,
    ) -> Result<TranscriptionResult, VoiceError>;
}

/// Builds the configured transcription backend.
pub fn transcriber_from_config(
    config: TranscriptionConfig,
) -> Result<Arc<dyn Transcriber>, VoiceError> {
    Ok(match config.provider {
        TranscriptionProvider::Scribe => Arc::new(ScribeTranscriber::new(config)?),
        TranscriptionProvider::Whisper => Arc::new(WhisperTranscriber::new(config)?),
    })
}

fn build_client(config: &TranscriptionConfig) -> Result<reqwest::Client, VoiceError> {
    config.validate()?;
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| VoiceError::Config(format!("failed to build STT client: {}", e)))
}

fn audio_part(audio: Bytes, filename: &str) -> Result<Part, VoiceError> {
    let length = audio.len() as u64;
    Ok(Part::stream_with_length(audio, length)
        .file_name(filename.to_string())
        .mime_str(content_type_for(filename))?)
}

/// Extracts the provider's own error text from a failed response body.
///
/// Understands `{"detail": {"message": ..}}`, `{"detail": ".."}` and
/// `{"error": {"message": ..}}`; falls back to the raw body.
pub(crate) fn provider_error_message(status: reqwest::StatusCode, body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|json| {
        json.pointer("/detail/message")
            .or_else(|| json.pointer("/error/message"))
            .or_else(|| json.get("detail"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    });

    match message {
        Some(message) => message,
        None if !body.trim().is_empty() => format!("{}: {}", status, body.trim()),
        None => status.to_string(),
    }
}

async fn send_upload(
    request: reqwest::RequestBuilder,
    provider: &'static str,
) -> Result<reqwest::Response, VoiceError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = provider_error_message(status, &body);
        tracing::error!(provider, %status, "STT API error: {}", detail);
        return Err(VoiceError::Upstream(format!(
            "STT transcription failed: {}",
            detail
        )));
    }
    Ok(response)
}

fn reject_empty(audio: &Bytes) -> Result<(), VoiceError> {
    if audio.is_empty() {
        return Err(VoiceError::InvalidInput(
            "Audio data cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}

/// ElevenLabs Scribe transcription.
#[derive(Debug, Clone)]
pub struct ScribeTranscriber {
    config: TranscriptionConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ScribeResponse {
    #[serde(default)]
    text: String,
    language_code: Option<String>,
    language_probability: Option<f32>,
    #[serde(default)]
    words: Vec<TranscriptWord>,
}

impl ScribeTranscriber {
    pub fn new(config: TranscriptionConfig) -> Result<Self, VoiceError> {
        let client = build_client(&config)?;
        tracing::info!(model = config.model(), "STT service initialized (scribe)");
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Transcriber for ScribeTranscriber {
    async fn transcribe(
        &self,
        audio: Bytes,
        filename: &str,
    ) -> Result<TranscriptionResult, VoiceError> {
        reject_empty(&audio)?;
        tracing::info!(filename, bytes = audio.len(), "transcribing audio");

        let form = Form::new()
            .part("file", audio_part(audio, filename)?)
            .text("model_id", self.config.model().to_string());

        let request = self
            .client
            .post(self.config.endpoint())
            .header("xi-api-key", &self.config.api_key)
            .multipart(form);

        let parsed: ScribeResponse = send_upload(request, "scribe").await?.json().await?;
        tracing::info!("transcription complete: '{}'", preview(&parsed.text));

        Ok(TranscriptionResult {
            text: parsed.text,
            language: parsed.language_code,
            language_probability: parsed.language_probability,
            duration: None,
            segments: Vec::new(),
            words: parsed.words,
        })
    }
}

/// OpenAI-compatible Whisper transcription (`verbose_json`).
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    config: TranscriptionConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    #[serde(default)]
    text: String,
    language: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    segments: Vec<TranscriptSegment>,
    #[serde(default)]
    words: Vec<TranscriptWord>,
}

impl WhisperTranscriber {
    pub fn new(config: TranscriptionConfig) -> Result<Self, VoiceError> {
        let client = build_client(&config)?;
        tracing::info!(model = config.model(), "STT service initialized (whisper)");
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(
        &self,
        audio: Bytes,
        filename: &str,
    ) -> Result<TranscriptionResult, VoiceError> {
        reject_empty(&audio)?;
        tracing::info!(filename, bytes = audio.len(), "transcribing audio");

        let form = Form::new()
            .part("file", audio_part(audio, filename)?)
            .text("model", self.config.model().to_string())
            .text("response_format", "verbose_json");

        let request = self
            .client
            .post(self.config.endpoint())
            .bearer_auth(&self.config.api_key)
            .multipart(form);

        let parsed: WhisperResponse = send_upload(request, "whisper").await?.json().await?;
        tracing::info!("transcription complete: '{}'", preview(&parsed.text));

        Ok(TranscriptionResult {
            text: parsed.text,
            language: parsed.language,
            language_probability: None,
            duration: parsed.duration,
            segments: parsed.segments,
            words: parsed.words,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for("clip.wav"), "audio/wav");
        assert_eq!(content_type_for("CLIP.M4A"), "audio/mp4");
        assert_eq!(content_type_for("voice.note.ogg"), "audio/ogg");
        assert_eq!(content_type_for("movie.mkv"), "video/x-matroska");
    }

    #[test]
    fn unknown_extension_defaults_to_mpeg() {
        assert_eq!(content_type_for("recording.xyz"), "audio/mpeg");
        assert_eq!(content_type_for("recording"), "audio/mpeg");
    }

    #[test]
    fn error_message_prefers_provider_detail() {
        let body = r#"{"detail": {"status": "invalid_api_key", "message": "Invalid API key"}}"#;
        assert_eq!(
            provider_error_message(StatusCode::UNAUTHORIZED, body),
            "Invalid API key"
        );

        let body = r#"{"error": {"message": "file too large"}}"#;
        assert_eq!(
            provider_error_message(StatusCode::PAYLOAD_TOO_LARGE, body),
            "file too large"
        );

        assert_eq!(
            provider_error_message(StatusCode::BAD_GATEWAY, ""),
            "502 Bad Gateway"
        );
    }

    #[tokio::test]
    async fn empty_audio_is_rejected_before_any_request() {
        let mut config = TranscriptionConfig::new(TranscriptionProvider::Scribe, "key");
        // Nothing listens here; reaching the network would yield Upstream.
        config.api_url = Some("http://127.0.0.1:9/v1/speech-to-text".to_string());
        let transcriber = ScribeTranscriber::new(config).unwrap();

        let result = transcriber.transcribe(Bytes::new(), "empty.mp3").await;
        assert!(matches!(result, Err(VoiceError::InvalidInput(_))));
    }

    #[test]
    fn missing_key_fails_construction() {
        let config = TranscriptionConfig::new(TranscriptionProvider::Whisper, "");
        assert!(matches!(
            WhisperTranscriber::new(config),
            Err(VoiceError::Config(_))
        ));
    }
}
