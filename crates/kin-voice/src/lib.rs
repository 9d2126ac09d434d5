//! Conversational voice pipeline.
//!
//! A spoken request is transcribed, answered by a streaming language model,
//! and spoken back while the answer is still being generated. Each capability
//! sits behind a trait ([`Transcriber`], [`CompletionStreamer`],
//! [`Synthesizer`]) so the pipeline can be driven by real providers or by
//! in-process fakes.
//!
//! Provider clients:
//!
//! - transcription: ElevenLabs Scribe or OpenAI-compatible Whisper uploads
//! - completion: OpenAI-compatible chat completions over server-sent events
//! - synthesis: a duplex WebSocket session per segment, or a blocking HTTP
//!   stream bridged through a bounded queue

pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod sanitize;
pub mod segment;
pub mod stt;
pub mod tts;

pub use config::{
    CompletionConfig, SegmenterConfig, SynthesisConfig, SynthesisMode, TranscriptionConfig,
    TranscriptionProvider,
};
pub use error::VoiceError;
pub use llm::{build_system_prompt, CompletionStreamer, DeltaStream, OpenAiCompletionStreamer};
pub use pipeline::{BufferedTurn, ChatTurn, ResponseOptions, VoicePipeline};
pub use sanitize::sanitize_for_speech;
pub use segment::{segment_stream, SegmentBuffer};
pub use stt::{
    content_type_for, transcriber_from_config, ScribeTranscriber, Transcriber,
    WhisperTranscriber,
};
pub use tts::{
    prepare_text, synthesizer_from_config, AudioStream, BridgedSynthesizer, ChunkIter,
    ChunkSource, HttpChunkSource, Synthesizer, WebSocketSynthesizer,
};
