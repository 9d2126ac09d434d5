use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use futures_util::TryStreamExt;
use kin_voice::{CompletionConfig, CompletionStreamer, OpenAiCompletionStreamer, VoiceError};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

async fn spawn_provider(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn streamer(base: &str) -> OpenAiCompletionStreamer {
    let mut config = CompletionConfig::new("sk-test");
    config.api_url = format!("{}/v1/chat/completions", base);
    config.model = "test-model".to_string();
    OpenAiCompletionStreamer::new(config).unwrap()
}

const EVENT_BODY: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
    "data: this line is not json\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n\n",
    "data: [DONE]\n\n",
);

#[tokio::test]
async fn test_streams_deltas_and_sends_chat_request() {
    let captured: Arc<Mutex<Option<(HeaderMap, Value)>>> = Arc::new(Mutex::new(None));
    let sink = captured.clone();
    let router = Router::new().route(
        "/v1/chat/completions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                *sink.lock().unwrap() = Some((headers, body));
                ([(header::CONTENT_TYPE, "text/event-stream")], EVENT_BODY)
            }
        }),
    );
    let base = spawn_provider(router).await;

    let deltas: Vec<String> = streamer(&base)
        .stream_completion("How are you?", "Be brief.", 42)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(deltas, vec!["Hello", " world"]);

    let (headers, body) = captured.lock().unwrap().take().unwrap();
    assert_eq!(headers["authorization"], "Bearer sk-test");
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["stream"], true);
    assert_eq!(body["max_tokens"], 42);
    assert_eq!(
        body["messages"],
        json!([
            { "role": "system", "content": "Be brief." },
            { "role": "user", "content": "How are you?" },
        ])
    );
}

#[tokio::test]
async fn test_complete_collects_whole_answer() {
    let router = Router::new().route(
        "/v1/chat/completions",
        post(|| async { ([(header::CONTENT_TYPE, "text/event-stream")], EVENT_BODY) }),
    );
    let base = spawn_provider(router).await;

    let text = streamer(&base).complete("Hi", "Be brief.", 10).await.unwrap();
    assert_eq!(text, "Hello world");
}

#[tokio::test]
async fn test_rejected_handshake_is_upstream_error() {
    let router = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": { "message": "Incorrect API key provided" } })),
            )
                .into_response()
        }),
    );
    let base = spawn_provider(router).await;

    let result = streamer(&base).stream_completion("Hi", "Be brief.", 10).await;
    match result {
        Err(VoiceError::Upstream(message)) => {
            assert!(message.contains("Incorrect API key provided"), "{}", message)
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("handshake should have failed"),
    }
}
