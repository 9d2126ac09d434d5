//! Kin voice agent HTTP server.

pub mod api;
pub mod api_chat;
pub mod api_speech;
pub mod api_sse;
pub mod config;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};
use futures_util::{Stream, StreamExt};
use kin_voice::{
    synthesizer_from_config, transcriber_from_config, CompletionStreamer,
    OpenAiCompletionStreamer, SegmenterConfig, Synthesizer, Transcriber, VoiceError,
    VoicePipeline,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
///
/// A capability whose provider is not configured is `None`; endpoints that
/// need it answer with a server error naming the capability.
#[derive(Clone)]
pub struct AppState {
    /// Speech-to-text service.
    pub transcriber: Option<Arc<dyn Transcriber>>,
    /// Chat completion service.
    pub completion: Option<Arc<dyn CompletionStreamer>>,
    /// Text-to-speech service.
    pub synthesizer: Option<Arc<dyn Synthesizer>>,
    /// Segment flush thresholds for streamed answers.
    pub segmenter: SegmenterConfig,
    /// Token limit used when a request does not set one.
    pub default_max_tokens: u32,
    /// Hard limit on the lifetime of a streaming response body.
    pub request_timeout: Duration,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
}

fn optional_service<T: ?Sized>(
    name: &'static str,
    built: Result<Arc<T>, VoiceError>,
) -> Option<Arc<T>> {
    match built {
        Ok(service) => Some(service),
        Err(e) => {
            tracing::warn!(service = name, error = %e, "service disabled");
            None
        }
    }
}

impl AppState {
    /// Builds every provider client the configuration has credentials for.
    pub fn from_config(config: &config::Config) -> Self {
        let transcriber = optional_service("STT", transcriber_from_config(config.transcription.clone()));
        let completion = optional_service(
            "LLM",
            OpenAiCompletionStreamer::new(config.completion.clone())
                .map(|streamer| Arc::new(streamer) as Arc<dyn CompletionStreamer>),
        );
        let synthesizer = optional_service("TTS", synthesizer_from_config(config.synthesis.clone()));

        Self {
            transcriber,
            completion,
            synthesizer,
            segmenter: config.segmenter,
            default_max_tokens: config.completion.max_tokens,
            request_timeout: config.server.request_timeout(),
            max_upload_bytes: config.server.max_upload_bytes,
        }
    }

    /// Assembles the full round-trip pipeline.
    pub fn pipeline(&self) -> Result<VoicePipeline, VoiceError> {
        Ok(VoicePipeline::from_services(
            self.transcriber.clone(),
            self.completion.clone(),
            self.synthesizer.clone(),
        )?
        .with_segmenter(self.segmenter)
        .with_default_max_tokens(self.default_max_tokens))
    }

    pub fn transcriber(&self) -> Result<&Arc<dyn Transcriber>, VoiceError> {
        self.transcriber
            .as_ref()
            .ok_or(VoiceError::NotConfigured("STT"))
    }

    pub fn completion(&self) -> Result<&Arc<dyn CompletionStreamer>, VoiceError> {
        self.completion
            .as_ref()
            .ok_or(VoiceError::NotConfigured("LLM"))
    }

    pub fn synthesizer(&self) -> Result<&Arc<dyn Synthesizer>, VoiceError> {
        self.synthesizer
            .as_ref()
            .ok_or(VoiceError::NotConfigured("TTS"))
    }

    /// Ends `stream` once the request time limit elapses.
    pub(crate) fn with_deadline<S>(&self, stream: S) -> impl Stream<Item = S::Item> + Send
    where
        S: Stream + Send,
    {
        let limit = self.request_timeout;
        stream.take_until(async move {
            tokio::time::sleep(limit).await;
            tracing::warn!(?limit, "request time limit reached, ending response");
        })
    }
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;

    Router::new()
        .route("/", get(api::root_handler))
        .route("/api/health", get(api::health_handler))
        .route("/api/chat", post(api_chat::chat_handler))
        .route("/api/chat/text", post(api_chat::chat_text_handler))
        .route("/api/chat/stream", post(api_sse::chat_stream_handler))
        .route("/api/stt", post(api_speech::stt_handler))
        .route("/api/tts", post(api_speech::tts_handler))
        .route("/api/tts/stream", post(api_speech::tts_stream_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
