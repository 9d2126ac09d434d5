//! Streaming chat completions.
//!
//! The provider answers with a line-delimited event stream: each event is
//! `data: <json>` carrying `choices[0].delta.content`, and the stream ends
//! with `data: [DONE]`. Lines that do not parse are protocol noise: they are
//! logged and skipped so a single bad line never aborts a response.

use crate::config::CompletionConfig;
use crate::error::VoiceError;
use crate::stt::provider_error_message;
use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_json::json;

/// Lazy, non-restartable sequence of text deltas.
pub type DeltaStream = BoxStream<'static, Result<String, VoiceError>>;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Keep responses concise and conversational (2-3 sentences max).";

const BREVITY_SUFFIX: &str = "Keep responses short and natural (2-3 sentences max).";

/// Combines an optional persona and backstory into one instruction block.
///
/// The block always asks for short, conversational answers.
pub fn build_system_prompt(persona: Option<&str>, backstory: Option<&str>) -> String {
    let persona = persona.map(str::trim).filter(|p| !p.is_empty());
    let backstory = backstory.map(str::trim).filter(|b| !b.is_empty());

    let mut prompt = match persona {
        Some(persona) => format!("{} {}", persona, BREVITY_SUFFIX),
        None => DEFAULT_SYSTEM_PROMPT.to_string(),
    };
    if let Some(backstory) = backstory {
        prompt.push_str(" Background: ");
        prompt.push_str(backstory);
    }
    prompt
}

/// Language-model capability.
#[async_trait]
pub trait CompletionStreamer: Send + Sync {
    /// Opens a streaming completion.
    ///
    /// Connection and handshake failures are returned here, before any delta
    /// is produced. Failures after that surface as an `Err` item.
    async fn stream_completion(
        &self,
        prompt: &str,
        system_instructions: &str,
        max_tokens: u32,
    ) -> Result<DeltaStream, VoiceError>;

    /// Collects a whole completion into one string.
    async fn complete(
        &self,
        prompt: &str,
        system_instructions: &str,
        max_tokens: u32,
    ) -> Result<String, VoiceError> {
        self.stream_completion(prompt, system_instructions, max_tokens)
            .await?
            .try_collect::<Vec<_>>()
            .await
            .map(|deltas| deltas.concat())
    }
}

/// Splits a byte stream into lines.
///
/// Bytes are buffered until a newline arrives, so multi-byte characters split
/// across network chunks decode intact.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends `chunk` and drains every complete line.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Returns a trailing line that was never newline-terminated.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    error: Option<ChatError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    delta: ChatDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChatDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    message: String,
}

/// Meaning of one event-stream line.
#[derive(Debug, PartialEq)]
pub(crate) enum EventLine {
    Delta(String),
    Done,
    Failed(String),
    Skip,
}

pub(crate) fn parse_event_line(line: &str) -> EventLine {
    let Some(payload) = line.strip_prefix("data:") else {
        return EventLine::Skip;
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return EventLine::Skip;
    }
    if payload == "[DONE]" {
        return EventLine::Done;
    }

    match serde_json::from_str::<ChatChunk>(payload) {
        Ok(ChatChunk {
            error: Some(error), ..
        }) => EventLine::Failed(error.message),
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(EventLine::Delta)
            .unwrap_or(EventLine::Skip),
        Err(e) => {
            tracing::warn!(error = %e, "could not decode JSON from line: {}", payload);
            EventLine::Skip
        }
    }
}

/// Turns a raw event-stream body into content deltas.
pub(crate) fn delta_stream<S>(body: S) -> impl Stream<Item = Result<String, VoiceError>> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    try_stream! {
        futures_util::pin_mut!(body);
        let mut lines = LineBuffer::default();
        let mut done = false;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(VoiceError::from)?;
            for line in lines.push(&chunk) {
                match parse_event_line(&line) {
                    EventLine::Delta(delta) => yield delta,
                    EventLine::Done => {
                        done = true;
                        break;
                    }
                    EventLine::Failed(message) => {
                        Err::<(), _>(VoiceError::Upstream(format!(
                            "completion stream error: {}",
                            message
                        )))?;
                    }
                    EventLine::Skip => {}
                }
            }
            if done {
                break;
            }
        }

        if !done {
            if let Some(line) = lines.finish() {
                if let EventLine::Delta(delta) = parse_event_line(&line) {
                    yield delta;
                }
            }
        }
    }
}

/// OpenAI-compatible chat completion client.
#[derive(Debug, Clone)]
pub struct OpenAiCompletionStreamer {
    config: CompletionConfig,
    client: reqwest::Client,
}

impl OpenAiCompletionStreamer {
    pub fn new(config: CompletionConfig) -> Result<Self, VoiceError> {
        config.validate()?;
        // No overall timeout: the stream is bounded by the provider finishing.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build LLM client: {}", e)))?;
        tracing::info!(model = %config.model, "LLM service initialized");
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }
}

#[async_trait]
impl CompletionStreamer for OpenAiCompletionStreamer {
    async fn stream_completion(
        &self,
        prompt: &str,
        system_instructions: &str,
        max_tokens: u32,
    ) -> Result<DeltaStream, VoiceError> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system_instructions },
                { "role": "user", "content": prompt },
            ],
            "stream": true,
            "max_tokens": max_tokens,
        });

        tracing::info!(
            max_tokens,
            "sending LLM request: '{}'",
            prompt.chars().take(50).collect::<String>()
        );

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = provider_error_message(status, &body);
            tracing::error!(%status, "LLM API error: {}", detail);
            return Err(VoiceError::Upstream(format!(
                "completion request failed: {}",
                detail
            )));
        }

        Ok(Box::pin(delta_stream(response.bytes_stream())))
    }
}
