//! Shared API types and the service-info handlers.

use crate::AppState;
use axum::{
    body::Body,
    extract::{Extension, Json, Multipart},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::TryStreamExt;
use kin_voice::{AudioStream, ResponseOptions, VoiceError};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

pub const SERVICE_NAME: &str = "kin-voice-agent";

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<VoiceError> for ApiError {
    fn from(e: VoiceError) -> Self {
        if e.is_client_error() {
            tracing::info!(error = %e, "rejecting request");
            ApiError::BadRequest(e.to_string())
        } else {
            tracing::error!(error = %e, "request failed");
            ApiError::InternalServerError(e.to_string())
        }
    }
}

/// Handler for `GET /`.
pub async fn root_handler() -> Json<Value> {
    Json(json!({
        "name": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/api/health",
        "endpoints": [
            "POST /api/chat",
            "POST /api/chat/text",
            "POST /api/chat/stream",
            "POST /api/stt",
            "POST /api/tts",
            "POST /api/tts/stream"
        ]
    }))
}

/// Handler for `GET /api/health`.
///
/// Reports which provider capabilities are configured.
pub async fn health_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "features": {
            "stt": state.transcriber.is_some(),
            "tts": state.synthesizer.is_some(),
            "llm": state.completion.is_some(),
        }
    }))
}

/// An audio upload with optional answer-shaping fields.
#[derive(Debug)]
pub(crate) struct AudioUpload {
    pub audio: Bytes,
    pub filename: String,
    pub options: ResponseOptions,
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub(crate) fn parse_max_tokens(raw: &str) -> Result<Option<u32>, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<u32>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(ApiError::BadRequest(format!(
            "max_tokens must be a positive integer, got '{}'",
            raw
        ))),
    }
}

/// Reads the `audio_file` field plus `persona`, `backstory` and `max_tokens`.
pub(crate) async fn read_audio_upload(mut multipart: Multipart) -> Result<AudioUpload, ApiError> {
    let multipart_error = |e: axum::extract::multipart::MultipartError| {
        ApiError::BadRequest(format!("multipart error: {}", e))
    };

    let mut audio = None;
    let mut filename = None;
    let mut options = ResponseOptions::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio_file" => {
                filename = field.file_name().map(str::to_string);
                audio = Some(field.bytes().await.map_err(multipart_error)?);
            }
            "persona" => options.persona = non_empty(field.text().await.map_err(multipart_error)?),
            "backstory" => {
                options.backstory = non_empty(field.text().await.map_err(multipart_error)?)
            }
            "max_tokens" => {
                options.max_tokens =
                    parse_max_tokens(&field.text().await.map_err(multipart_error)?)?
            }
            other => tracing::debug!(field = other, "ignoring unknown form field"),
        }
    }

    let audio =
        audio.ok_or_else(|| ApiError::BadRequest("audio_file field is required".to_string()))?;
    Ok(AudioUpload {
        audio,
        filename: filename.unwrap_or_else(|| "audio.mp3".to_string()),
        options,
    })
}

/// Wraps a live audio stream in an unbuffered `audio/mpeg` response.
///
/// A failure after the first byte can no longer change the status; the body
/// is cut off instead.
pub(crate) fn streaming_audio_response(state: &AppState, audio: AudioStream) -> Response {
    let audio = audio.inspect_err(|e| tracing::error!(error = %e, "audio stream aborted"));
    let mut response = Response::new(Body::from_stream(state.with_deadline(audio)));

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("inline; filename=\"response.mp3\""),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}
