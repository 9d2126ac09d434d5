//! Conversation handlers: spoken round trip and typed chat.

use crate::api::{read_audio_upload, streaming_audio_response, ApiError};
use crate::AppState;
use axum::{
    extract::{Extension, Json, Multipart},
    http::HeaderValue,
    response::Response,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use kin_voice::{build_system_prompt, ResponseOptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Request body for the typed chat endpoints.
#[derive(Debug, Deserialize)]
pub struct ChatTextRequest {
    pub text: String,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub backstory: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ChatTextRequest {
    /// Validated prompt and answer options.
    pub(crate) fn into_parts(self) -> Result<(String, ResponseOptions), ApiError> {
        let text = self.text.trim().to_string();
        if text.is_empty() {
            return Err(ApiError::BadRequest("Text cannot be empty".to_string()));
        }
        if self.max_tokens == Some(0) {
            return Err(ApiError::BadRequest(
                "max_tokens must be a positive integer".to_string(),
            ));
        }
        let options = ResponseOptions {
            persona: self.persona.filter(|p| !p.trim().is_empty()),
            backstory: self.backstory.filter(|b| !b.trim().is_empty()),
            max_tokens: self.max_tokens,
        };
        Ok((text, options))
    }
}

/// Response body for `POST /api/chat/text`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatTextResponse {
    pub message: String,
    pub text_response: String,
}

/// Handler for `POST /api/chat`.
///
/// Transcribes the uploaded audio and streams back a spoken answer. The
/// transcription travels in `X-Transcription`, base64-encoded because header
/// values cannot carry arbitrary UTF-8.
pub async fn chat_handler(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = read_audio_upload(multipart).await?;
    tracing::info!(
        filename = %upload.filename,
        bytes = upload.audio.len(),
        "voice chat request"
    );

    let pipeline = state.pipeline()?;
    let turn = pipeline
        .respond(upload.audio, &upload.filename, &upload.options)
        .await?;

    let mut response = streaming_audio_response(&state, turn.audio);
    let headers = response.headers_mut();

    let encoded = BASE64.encode(turn.transcription.text.trim());
    if let Ok(value) = HeaderValue::from_str(&encoded) {
        headers.insert("x-transcription", value);
        headers.insert("x-transcription-encoding", HeaderValue::from_static("base64"));
    }
    let language = turn
        .transcription
        .language
        .as_deref()
        .and_then(|language| HeaderValue::from_str(language).ok())
        .unwrap_or_else(|| HeaderValue::from_static("unknown"));
    headers.insert("x-language-code", language);

    Ok(response)
}

/// Handler for `POST /api/chat/text`.
pub async fn chat_text_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<ChatTextRequest>,
) -> Result<Json<ChatTextResponse>, ApiError> {
    let completion = state.completion()?;
    let (text, options) = payload.into_parts()?;

    let system = build_system_prompt(options.persona.as_deref(), options.backstory.as_deref());
    let max_tokens = options.max_tokens.unwrap_or(state.default_max_tokens);
    let text_response = completion.complete(&text, &system, max_tokens).await?;

    Ok(Json(ChatTextResponse {
        message: "Text chat completed successfully".to_string(),
        text_response,
    }))
}
