//! Voice round trip: audio in, transcription, streamed completion, audio out.
//!
//! The transcription and the completion handshake happen before a turn is
//! returned, so callers can still answer with an error status. Everything
//! after that is lazy: text deltas are grouped into segments as they arrive,
//! and each segment is synthesized and fully relayed before the next one
//! starts, so audio always plays in text order.
//!
//! Dropping a turn's audio stream cancels the remaining work.

use crate::config::SegmenterConfig;
use crate::error::VoiceError;
use crate::llm::{build_system_prompt, CompletionStreamer, DeltaStream};
use crate::sanitize::sanitize_for_speech;
use crate::segment::segment_stream;
use crate::stt::Transcriber;
use crate::tts::{AudioStream, Synthesizer};
use async_stream::try_stream;
use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use kin_types::{AudioChunk, PipelineState, TextSegment, TranscriptionResult};
use std::sync::Arc;
use tokio::sync::watch;

const DEFAULT_MAX_TOKENS: u32 = 150;

/// Per-request shaping of the model's answer.
#[derive(Debug, Clone, Default)]
pub struct ResponseOptions {
    pub persona: Option<String>,
    pub backstory: Option<String>,
    /// Falls back to the pipeline default when unset.
    pub max_tokens: Option<u32>,
}

/// A streaming answer to one request.
pub struct ChatTurn {
    pub transcription: TranscriptionResult,
    /// Follows the request through `Streaming`, `Draining` and a terminal state.
    pub state: watch::Receiver<PipelineState>,
    pub audio: AudioStream,
}

/// A fully materialized answer.
#[derive(Debug, Clone)]
pub struct BufferedTurn {
    pub transcription: TranscriptionResult,
    pub response_text: String,
    pub audio: Bytes,
}

/// Marks the request failed if it is dropped before reaching a terminal state.
struct StateGuard {
    tx: watch::Sender<PipelineState>,
}

impl StateGuard {
    fn set(&self, state: PipelineState) {
        tracing::debug!(state = state.as_str(), "pipeline state");
        self.tx.send_replace(state);
    }
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        self.tx.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = PipelineState::Failed;
                true
            }
        });
    }
}

pub struct VoicePipeline {
    transcriber: Arc<dyn Transcriber>,
    completion: Arc<dyn CompletionStreamer>,
    synthesizer: Arc<dyn Synthesizer>,
    segmenter: SegmenterConfig,
    default_max_tokens: u32,
}

impl VoicePipeline {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        completion: Arc<dyn CompletionStreamer>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            transcriber,
            completion,
            synthesizer,
            segmenter: SegmenterConfig::default(),
            default_max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Assembles a pipeline from optionally configured services.
    ///
    /// # Errors
    ///
    /// `NotConfigured` naming the first missing capability.
    pub fn from_services(
        transcriber: Option<Arc<dyn Transcriber>>,
        completion: Option<Arc<dyn CompletionStreamer>>,
        synthesizer: Option<Arc<dyn Synthesizer>>,
    ) -> Result<Self, VoiceError> {
        let transcriber = transcriber.ok_or(VoiceError::NotConfigured("STT"))?;
        let completion = completion.ok_or(VoiceError::NotConfigured("LLM"))?;
        let synthesizer = synthesizer.ok_or(VoiceError::NotConfigured("TTS"))?;
        Ok(Self::new(transcriber, completion, synthesizer))
    }

    pub fn with_segmenter(mut self, segmenter: SegmenterConfig) -> Self {
        self.segmenter = segmenter;
        self
    }

    pub fn with_default_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    /// Transcribes `audio` and starts streaming a spoken answer.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for empty audio (the transcriber is not called),
    /// `NoSpeechDetected` when the transcription is blank (no completion or
    /// synthesis is attempted), `Upstream` for provider failures.
    pub async fn respond(
        &self,
        audio: Bytes,
        filename: &str,
        options: &ResponseOptions,
    ) -> Result<ChatTurn, VoiceError> {
        let (tx, state) = watch::channel(PipelineState::Idle);
        let guard = StateGuard { tx };

        let transcription = self.transcribe(audio, filename, &guard).await?;
        let audio = self
            .start_answer(transcription.text.trim(), options, guard)
            .await?;

        Ok(ChatTurn {
            transcription,
            state,
            audio,
        })
    }

    /// Starts streaming a spoken answer to a typed prompt.
    pub async fn respond_text(
        &self,
        prompt: &str,
        options: &ResponseOptions,
    ) -> Result<ChatTurn, VoiceError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(VoiceError::InvalidInput("Text cannot be empty".to_string()));
        }
        let (tx, state) = watch::channel(PipelineState::Idle);
        let audio = self
            .start_answer(prompt, options, StateGuard { tx })
            .await?;

        Ok(ChatTurn {
            transcription: TranscriptionResult {
                text: prompt.to_string(),
                ..TranscriptionResult::default()
            },
            state,
            audio,
        })
    }

    /// Runs the whole round trip before returning anything.
    pub async fn run_buffered(
        &self,
        audio: Bytes,
        filename: &str,
        options: &ResponseOptions,
    ) -> Result<BufferedTurn, VoiceError> {
        let (tx, _state) = watch::channel(PipelineState::Idle);
        let guard = StateGuard { tx };

        let transcription = self.transcribe(audio, filename, &guard).await?;
        let system = build_system_prompt(options.persona.as_deref(), options.backstory.as_deref());

        guard.set(PipelineState::Streaming);
        let response_text = self
            .completion
            .complete(transcription.text.trim(), &system, self.max_tokens(options))
            .await?;
        if response_text.trim().is_empty() {
            return Err(VoiceError::Upstream(
                "language model returned an empty response".to_string(),
            ));
        }

        guard.set(PipelineState::Draining);
        let audio = self.synthesizer.synthesize(&response_text).await?;
        guard.set(PipelineState::Done);

        Ok(BufferedTurn {
            transcription,
            response_text,
            audio,
        })
    }

    fn max_tokens(&self, options: &ResponseOptions) -> u32 {
        options.max_tokens.unwrap_or(self.default_max_tokens)
    }

    async fn transcribe(
        &self,
        audio: Bytes,
        filename: &str,
        guard: &StateGuard,
    ) -> Result<TranscriptionResult, VoiceError> {
        if audio.is_empty() {
            return Err(VoiceError::InvalidInput(
                "Audio data cannot be empty".to_string(),
            ));
        }

        guard.set(PipelineState::Transcribing);
        let transcription = self.transcriber.transcribe(audio, filename).await?;
        if !transcription.has_speech() {
            tracing::info!("no speech detected, skipping response");
            return Err(VoiceError::NoSpeechDetected);
        }
        tracing::info!(
            language = transcription.language.as_deref().unwrap_or("unknown"),
            "transcribed: '{}'",
            transcription.text.trim()
        );
        Ok(transcription)
    }

    async fn start_answer(
        &self,
        prompt: &str,
        options: &ResponseOptions,
        guard: StateGuard,
    ) -> Result<AudioStream, VoiceError> {
        let system = build_system_prompt(options.persona.as_deref(), options.backstory.as_deref());
        let deltas = self
            .completion
            .stream_completion(prompt, &system, self.max_tokens(options))
            .await?;

        guard.set(PipelineState::Streaming);
        Ok(Box::pin(spoken_stream(
            deltas,
            Arc::clone(&self.synthesizer),
            self.segmenter,
            guard,
        )))
    }
}

/// Synthesizes `segment` and relays its audio, skipping text with nothing
/// speakable in it.
fn segment_audio(
    synthesizer: Arc<dyn Synthesizer>,
    segment: TextSegment,
) -> impl Stream<Item = Result<AudioChunk, VoiceError>> + Send {
    try_stream! {
        if sanitize_for_speech(&segment.text).is_empty() {
            tracing::debug!(index = segment.sequence_index, "skipping unspeakable segment");
        } else {
            tracing::info!(index = segment.sequence_index, "TTS segment: '{}'", segment.text);
            let mut audio = synthesizer.synthesize_stream(&segment.text).await?;
            while let Some(chunk) = audio.next().await {
                yield chunk?;
            }
        }
    }
}

fn spoken_stream(
    deltas: DeltaStream,
    synthesizer: Arc<dyn Synthesizer>,
    segmenter: SegmenterConfig,
    guard: StateGuard,
) -> impl Stream<Item = Result<AudioChunk, VoiceError>> + Send {
    let guard = Arc::new(guard);
    let drained = Arc::clone(&guard);
    // Draining starts once the model is done, before the last partial segment.
    let deltas = deltas.chain(
        stream::once(async move { drained.set(PipelineState::Draining) })
            .filter_map(|()| async { None::<Result<String, VoiceError>> }),
    );

    try_stream! {
        let segments = segment_stream(deltas, segmenter);
        futures_util::pin_mut!(segments);
        let mut spoken = 0usize;

        while let Some(segment) = segments.next().await {
            let audio = segment_audio(Arc::clone(&synthesizer), segment?);
            futures_util::pin_mut!(audio);
            while let Some(chunk) = audio.next().await {
                yield chunk?;
            }
            spoken += 1;
        }

        tracing::info!(segments = spoken, "response complete");
        guard.set(PipelineState::Done);
    }
}
