use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use kin_server::{app, AppState};
use kin_types::TranscriptionResult;
use kin_voice::{
    AudioStream, CompletionStreamer, DeltaStream, SegmenterConfig, Synthesizer, Transcriber,
    VoiceError,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct FixedTranscriber(&'static str, Option<&'static str>);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(
        &self,
        audio: Bytes,
        _filename: &str,
    ) -> Result<TranscriptionResult, VoiceError> {
        if audio.is_empty() {
            return Err(VoiceError::InvalidInput("Audio data cannot be empty".to_string()));
        }
        Ok(TranscriptionResult {
            text: self.0.to_string(),
            language: self.1.map(str::to_string),
            duration: Some(2.0),
            ..TranscriptionResult::default()
        })
    }
}

struct ScriptedCompletion {
    deltas: Vec<&'static str>,
    fail_mid_stream: bool,
}

#[async_trait]
impl CompletionStreamer for ScriptedCompletion {
    async fn stream_completion(
        &self,
        _prompt: &str,
        _system_instructions: &str,
        _max_tokens: u32,
    ) -> Result<DeltaStream, VoiceError> {
        let mut items: Vec<Result<String, VoiceError>> =
            self.deltas.iter().map(|d| Ok(d.to_string())).collect();
        if self.fail_mid_stream {
            items.push(Err(VoiceError::Upstream("stream reset".to_string())));
        }
        Ok(stream::iter(items).boxed())
    }
}

/// Speaks text back as its own bytes.
struct EchoSynthesizer;

#[async_trait]
impl Synthesizer for EchoSynthesizer {
    async fn synthesize_stream(&self, text: &str) -> Result<AudioStream, VoiceError> {
        let text = kin_voice::prepare_text(text)?;
        Ok(stream::iter(vec![Ok(Bytes::from(text))]).boxed())
    }
}

/// Never stops producing audio.
struct EndlessSynthesizer;

#[async_trait]
impl Synthesizer for EndlessSynthesizer {
    async fn synthesize_stream(&self, _text: &str) -> Result<AudioStream, VoiceError> {
        Ok(stream::repeat_with(|| Bytes::from_static(b"frame"))
            .then(|chunk| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(chunk)
            })
            .boxed())
    }
}

fn state_with(completion: ScriptedCompletion) -> AppState {
    AppState {
        transcriber: Some(Arc::new(FixedTranscriber("Grüß dich, wie geht's?", Some("de")))),
        completion: Some(Arc::new(completion)),
        synthesizer: Some(Arc::new(EchoSynthesizer)),
        segmenter: SegmenterConfig::default(),
        default_max_tokens: 150,
        request_timeout: Duration::from_secs(30),
        max_upload_bytes: 1024 * 1024,
    }
}

fn full_state() -> AppState {
    state_with(ScriptedCompletion {
        deltas: vec!["Mir geht es gut,", " danke der Nachfrage.", " Und dir?"],
        fail_mid_stream: false,
    })
}

const BOUNDARY: &str = "kin-test-boundary";

/// Builds a multipart request; a field with a file name is sent as a file.
fn multipart_request(uri: &str, fields: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, filename, data) in fields {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        let disposition = match filename {
            Some(filename) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: audio/mpeg\r\n\r\n",
                name, filename
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name),
        };
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn test_health_lists_configured_features() {
    let mut state = full_state();
    state.synthesizer = None;

    let response = app(state)
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["service"], "kin-voice-agent");
    assert_eq!(json["features"], json!({ "stt": true, "tts": false, "llm": true }));
}

#[tokio::test]
async fn test_root_describes_service() {
    let response = app(full_state())
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["name"], "kin-voice-agent");
    assert_eq!(json["health"], "/api/health");
}

#[tokio::test]
async fn test_voice_chat_streams_audio_with_metadata_headers() {
    let request = multipart_request(
        "/api/chat",
        &[
            ("audio_file", Some("question.webm"), b"fake-audio"),
            ("persona", None, b"You are Oma Hilde."),
            ("max_tokens", None, b"80"),
        ],
    );
    let response = app(full_state()).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers["content-type"], "audio/mpeg");
    assert_eq!(headers["x-transcription-encoding"], "base64");
    assert_eq!(headers["x-language-code"], "de");
    assert_eq!(headers["x-accel-buffering"], "no");
    assert_eq!(headers["cache-control"], "no-cache, no-store, must-revalidate");
    assert!(headers.contains_key("content-disposition"));

    let decoded = BASE64
        .decode(headers["x-transcription"].to_str().unwrap())
        .unwrap();
    assert_eq!(String::from_utf8(decoded).unwrap(), "Grüß dich, wie geht's?");

    let audio = body_bytes(response).await;
    let spoken: String = String::from_utf8(audio.to_vec())
        .unwrap()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    assert_eq!(spoken, "Mirgehtesgut,dankederNachfrage.Unddir?");
}

#[tokio::test]
async fn test_voice_chat_reports_unknown_language() {
    let mut state = full_state();
    state.transcriber = Some(Arc::new(FixedTranscriber("Hello there", None)));

    let request = multipart_request("/api/chat", &[("audio_file", Some("q.mp3"), b"audio")]);
    let response = app(state).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-language-code"], "unknown");
}

#[tokio::test]
async fn test_voice_chat_rejects_silence() {
    let mut state = full_state();
    state.transcriber = Some(Arc::new(FixedTranscriber("  ", None)));

    let request = multipart_request("/api/chat", &[("audio_file", Some("q.mp3"), b"hiss")]);
    let response = app(state).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "no speech detected in audio");
}

#[tokio::test]
async fn test_voice_chat_requires_audio_field() {
    let request = multipart_request("/api/chat", &[("persona", None, b"Someone")]);
    let response = app(full_state()).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "audio_file field is required");
}

#[tokio::test]
async fn test_voice_chat_rejects_empty_upload() {
    let request = multipart_request("/api/chat", &[("audio_file", Some("q.mp3"), b"")]);
    let response = app(full_state()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_service_is_a_server_error() {
    let mut state = full_state();
    state.completion = None;

    let request = multipart_request("/api/chat", &[("audio_file", Some("q.mp3"), b"audio")]);
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "LLM service not configured");

    let response = app(state)
        .oneshot(json_request("/api/chat/text", json!({ "text": "Hi" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_text_chat_returns_whole_answer() {
    let response = app(full_state())
        .oneshot(json_request(
            "/api/chat/text",
            json!({ "text": "Wie geht's?", "backstory": "Lives in Hamburg." }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json["text_response"],
        "Mir geht es gut, danke der Nachfrage. Und dir?"
    );

    let response = app(full_state())
        .oneshot(json_request("/api/chat/text", json!({ "text": "   " })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_stream_emits_deltas_then_done() {
    let response = app(full_state())
        .oneshot(json_request("/api/chat/stream", json!({ "text": "Wie geht's?" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(response.headers()["x-accel-buffering"], "no");

    let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    let data: Vec<&str> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .collect();
    assert_eq!(
        data,
        vec!["Mir geht es gut,", " danke der Nachfrage.", " Und dir?", "[DONE]"]
    );
}

#[tokio::test]
async fn test_chat_stream_reports_mid_stream_failure() {
    let state = state_with(ScriptedCompletion {
        deltas: vec!["Moment,"],
        fail_mid_stream: true,
    });
    let response = app(state)
        .oneshot(json_request("/api/chat/stream", json!({ "text": "Hi" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(body.contains("data: Moment,"));
    assert!(body.contains("event: error"));
    assert!(body.contains("stream reset"));
    assert!(!body.contains("[DONE]"));
}

#[tokio::test]
async fn test_stt_returns_transcription_json() {
    let request = multipart_request("/api/stt", &[("audio_file", Some("note.wav"), b"wave")]);
    let response = app(full_state()).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["text"], "Grüß dich, wie geht's?");
    assert_eq!(json["language"], "de");
    assert_eq!(json["duration"], 2.0);
    assert_eq!(json["segments"], json!([]));
}

#[tokio::test]
async fn test_tts_returns_whole_audio() {
    let response = app(full_state())
        .oneshot(json_request("/api/tts", json!({ "text": "**Guten** Morgen!" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "audio/mpeg");
    assert_eq!(&body_bytes(response).await[..], b"Guten Morgen!");

    let response = app(full_state())
        .oneshot(json_request("/api/tts", json!({ "text": "🙂" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tts_stream_is_unbuffered_audio() {
    let response = app(full_state())
        .oneshot(json_request("/api/tts/stream", json!({ "text": "Bis bald." })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-accel-buffering"], "no");
    assert_eq!(&body_bytes(response).await[..], b"Bis bald.");
}

#[tokio::test]
async fn test_streaming_body_ends_at_request_deadline() {
    let mut state = full_state();
    state.synthesizer = Some(Arc::new(EndlessSynthesizer));
    state.request_timeout = Duration::from_millis(100);

    let response = app(state)
        .oneshot(json_request("/api/tts/stream", json!({ "text": "Talk forever" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = tokio::time::timeout(Duration::from_secs(5), body_bytes(response))
        .await
        .expect("body should end at the request deadline");
    assert!(!body.is_empty());
}
