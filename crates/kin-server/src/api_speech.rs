//! Standalone transcription and synthesis handlers.

use crate::api::{read_audio_upload, streaming_audio_response, ApiError};
use crate::AppState;
use axum::{
    extract::{Extension, Json, Multipart},
    http::header,
    response::{IntoResponse, Response},
};
use kin_types::{TranscriptSegment, TranscriptWord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Request body for the synthesis endpoints.
#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub text: String,
}

/// Response body for `POST /api/stt`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SttResponse {
    pub message: String,
    pub text: String,
    pub language: Option<String>,
    pub language_probability: Option<f32>,
    pub duration: Option<f64>,
    pub segments: Vec<TranscriptSegment>,
    pub words: Vec<TranscriptWord>,
}

/// Handler for `POST /api/stt`.
pub async fn stt_handler(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<SttResponse>, ApiError> {
    let transcriber = state.transcriber()?;
    let upload = read_audio_upload(multipart).await?;

    let result = transcriber
        .transcribe(upload.audio, &upload.filename)
        .await?;

    Ok(Json(SttResponse {
        message: "Transcription completed successfully".to_string(),
        text: result.text,
        language: result.language,
        language_probability: result.language_probability,
        duration: result.duration,
        segments: result.segments,
        words: result.words,
    }))
}

/// Handler for `POST /api/tts`.
///
/// Synthesizes the whole text before responding.
pub async fn tts_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<TtsRequest>,
) -> Result<Response, ApiError> {
    let synthesizer = state.synthesizer()?;
    let audio = synthesizer.synthesize(&payload.text).await?;
    tracing::info!(bytes = audio.len(), "synthesis complete");

    Ok((
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::CONTENT_DISPOSITION, "inline; filename=\"speech.mp3\""),
        ],
        audio,
    )
        .into_response())
}

/// Handler for `POST /api/tts/stream`.
pub async fn tts_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<TtsRequest>,
) -> Result<Response, ApiError> {
    let synthesizer = state.synthesizer()?;
    let audio = synthesizer.synthesize_stream(&payload.text).await?;
    Ok(streaming_audio_response(&state, audio))
}
