//! SSE completion stream handler.

use crate::api::ApiError;
use crate::api_chat::ChatTextRequest;
use crate::AppState;
use async_stream::stream;
use axum::{
    extract::{Extension, Json},
    http::header,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
};
use futures_util::StreamExt;
use kin_voice::build_system_prompt;
use std::{convert::Infallible, sync::Arc};

/// Handler for `POST /api/chat/stream`.
///
/// Streams text deltas as `data:` events and finishes with `data: [DONE]`.
/// A failure before the first event is an ordinary error response; a failure
/// later is reported as an `error` event and ends the stream.
pub async fn chat_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<ChatTextRequest>,
) -> Result<Response, ApiError> {
    let completion = state.completion()?;
    let (text, options) = payload.into_parts()?;

    let system = build_system_prompt(options.persona.as_deref(), options.backstory.as_deref());
    let max_tokens = options.max_tokens.unwrap_or(state.default_max_tokens);
    let mut deltas = completion
        .stream_completion(&text, &system, max_tokens)
        .await?;

    let events = stream! {
        let mut failed = false;
        while let Some(delta) = deltas.next().await {
            match delta {
                // Event data may not contain carriage returns.
                Ok(delta) => yield Ok::<_, Infallible>(Event::default().data(delta.replace('\r', ""))),
                Err(e) => {
                    tracing::error!(error = %e, "completion stream failed");
                    yield Ok::<_, Infallible>(Event::default().event("error").data(e.to_string().replace('\r', "")));
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            yield Ok::<_, Infallible>(Event::default().data("[DONE]"));
        }
    };

    let sse = Sse::new(state.with_deadline(events)).keep_alive(KeepAlive::default());
    Ok((
        [
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        sse,
    )
        .into_response())
}
