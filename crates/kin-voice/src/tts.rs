//! Speech synthesis.
//!
//! Two transports produce the same lazy audio stream:
//!
//! - [`WebSocketSynthesizer`] opens one duplex session per text, sends the
//!   text and a flush, and relays decoded audio frames until the provider
//!   marks the context final.
//! - [`BridgedSynthesizer`] drives a blocking [`ChunkSource`] on a worker
//!   thread and relays its output through a bounded queue. The producer stalls
//!   while the queue is full and stops once the consumer goes away.

use crate::config::{SynthesisConfig, SynthesisMode};
use crate::error::VoiceError;
use crate::sanitize::sanitize_for_speech;
use crate::stt::provider_error_message;
use async_stream::try_stream;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::{SinkExt, Stream, StreamExt};
use kin_types::{AudioChunk, VoiceSettings};
use serde::Deserialize;
use serde_json::json;
use std::io::Read;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Maximum text input size for one synthesis call (64 KiB).
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Read size for the blocking HTTP stream.
const READ_CHUNK_BYTES: usize = 4096;

/// Lazy sequence of audio chunks in provider order.
pub type AudioStream = BoxStream<'static, Result<AudioChunk, VoiceError>>;

/// Text-to-speech capability.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Starts synthesizing `text`.
    ///
    /// Text is sanitized first; text with nothing speakable left is rejected
    /// with `InvalidInput` before any provider call.
    async fn synthesize_stream(&self, text: &str) -> Result<AudioStream, VoiceError>;

    /// Synthesizes `text` into one buffer.
    async fn synthesize(&self, text: &str) -> Result<Bytes, VoiceError> {
        let mut stream = self.synthesize_stream(text).await?;
        let mut audio = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            audio.extend_from_slice(&chunk?);
        }
        Ok(audio.freeze())
    }
}

/// Builds the configured synthesis transport.
pub fn synthesizer_from_config(config: SynthesisConfig) -> Result<Arc<dyn Synthesizer>, VoiceError> {
    Ok(match config.mode {
        SynthesisMode::Websocket => Arc::new(WebSocketSynthesizer::new(config)?),
        SynthesisMode::Http => {
            let queue_capacity = config.queue_capacity;
            let coalesce_chunks = config.coalesce_chunks;
            Arc::new(BridgedSynthesizer::new(
                HttpChunkSource::new(config)?,
                queue_capacity,
                coalesce_chunks,
            )?)
        }
    })
}

/// Sanitizes `text` and checks that something speakable remains.
pub fn prepare_text(text: &str) -> Result<String, VoiceError> {
    if text.trim().is_empty() {
        return Err(VoiceError::InvalidInput("Text cannot be empty".to_string()));
    }
    if text.len() > MAX_TTS_INPUT_BYTES {
        return Err(VoiceError::InvalidInput(format!(
            "text exceeds maximum size: {} bytes (limit: {} bytes)",
            text.len(),
            MAX_TTS_INPUT_BYTES
        )));
    }
    let clean = sanitize_for_speech(text);
    if clean.is_empty() {
        return Err(VoiceError::InvalidInput(
            "Text is empty after removing unsupported characters".to_string(),
        ));
    }
    Ok(clean)
}

type SessionSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One inbound session message. Every field is optional; keep-alives and
/// acknowledgements carry none of them.
#[derive(Debug, Default, Deserialize)]
struct SessionEvent {
    audio: Option<String>,
    #[serde(default, alias = "isFinal")]
    is_final: Option<bool>,
    error: Option<serde_json::Value>,
}

fn event_error_message(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(message) => message.clone(),
        other => other
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

/// Duplex streaming synthesis, one context per call.
#[derive(Debug, Clone)]
pub struct WebSocketSynthesizer {
    config: SynthesisConfig,
}

impl WebSocketSynthesizer {
    pub fn new(config: SynthesisConfig) -> Result<Self, VoiceError> {
        config.validate()?;
        tracing::info!(
            voice_id = %config.voice_id,
            model_id = %config.model_id,
            "TTS service initialized (websocket)"
        );
        Ok(Self { config })
    }

    async fn connect(&self) -> Result<SessionSocket, VoiceError> {
        let mut request = self
            .config
            .session_url()
            .into_client_request()
            .map_err(|e| VoiceError::Config(format!("invalid synthesis url: {}", e)))?;
        let key = HeaderValue::from_str(&self.config.api_key)
            .map_err(|e| VoiceError::Config(format!("invalid synthesis api_key: {}", e)))?;
        request.headers_mut().insert("xi-api-key", key);

        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(self.config.max_message_bytes))
            .max_frame_size(Some(self.config.max_message_bytes));

        let (socket, _) =
            tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false)
                .await
                .map_err(|e| VoiceError::Upstream(format!("TTS connection failed: {}", e)))?;
        Ok(socket)
    }
}

async fn send_json(socket: &mut SessionSocket, value: serde_json::Value) -> Result<(), VoiceError> {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .map_err(|e| VoiceError::Upstream(format!("TTS send failed: {}", e)))
}

async fn close_session(mut socket: SessionSocket, context_id: &str) {
    let close = json!({ "context_id": context_id, "close_context": true });
    if let Err(e) = send_json(&mut socket, close).await {
        tracing::warn!(%context_id, error = %e, "failed to close TTS context");
    }
    let _ = socket.close(None).await;
}

/// One open synthesis context.
///
/// The context is closed exactly once: by [`SessionContext::close`], or from
/// `Drop` on a background task when the stream is abandoned mid-session.
struct SessionContext {
    socket: Option<SessionSocket>,
    context_id: String,
}

impl SessionContext {
    fn new(socket: SessionSocket, context_id: String) -> Self {
        Self {
            socket: Some(socket),
            context_id,
        }
    }

    async fn send(&mut self, value: serde_json::Value) -> Result<(), VoiceError> {
        match self.socket.as_mut() {
            Some(socket) => send_json(socket, value).await,
            None => Err(VoiceError::Upstream("TTS session already closed".to_string())),
        }
    }

    async fn next_message(&mut self) -> Option<Result<Message, WsError>> {
        self.socket.as_mut()?.next().await
    }

    async fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            close_session(socket, &self.context_id).await;
        }
    }

    /// Forgets the socket without a close message; the provider closed it.
    fn release(&mut self) {
        self.socket = None;
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        let Some(socket) = self.socket.take() else {
            return;
        };
        let context_id = std::mem::take(&mut self.context_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(%context_id, "TTS stream abandoned, closing context");
                handle.spawn(async move { close_session(socket, &context_id).await });
            }
            Err(_) => tracing::warn!(%context_id, "no runtime left to close TTS context"),
        }
    }
}

#[async_trait]
impl Synthesizer for WebSocketSynthesizer {
    async fn synthesize_stream(&self, text: &str) -> Result<AudioStream, VoiceError> {
        let text = prepare_text(text)?;
        let context_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(%context_id, "synthesizing: '{}'", text.chars().take(50).collect::<String>());

        let mut session = SessionContext::new(self.connect().await?, context_id.clone());
        let started = async {
            session
                .send(json!({
                    "text": text,
                    "context_id": context_id,
                    "voice_settings": self.config.voice_settings,
                }))
                .await?;
            session
                .send(json!({ "context_id": context_id, "flush": true }))
                .await
        }
        .await;
        if let Err(e) = started {
            session.close().await;
            return Err(e);
        }

        Ok(Box::pin(session_stream(session)))
    }
}

/// Relays audio for one context, then closes the context.
///
/// The close message is sent whether the loop ended on the final marker, a
/// provider error event, or a transport failure. It is skipped only when the
/// provider already closed the socket. Undecodable audio is skipped.
fn session_stream(
    mut session: SessionContext,
) -> impl Stream<Item = Result<AudioChunk, VoiceError>> + Send {
    try_stream! {
        let context_id = session.context_id.clone();
        let mut failure: Option<VoiceError> = None;
        let mut chunks = 0usize;

        while let Some(message) = session.next_message().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    failure = Some(VoiceError::Upstream(format!("TTS session error: {}", e)));
                    break;
                }
            };

            match message {
                Message::Text(payload) => {
                    let event: SessionEvent = match serde_json::from_str(payload.as_str()) {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping unparseable TTS message");
                            continue;
                        }
                    };
                    if let Some(error) = &event.error {
                        let message = event_error_message(error);
                        tracing::error!(%context_id, "TTS provider error: {}", message);
                        failure = Some(VoiceError::Upstream(format!("TTS error: {}", message)));
                        break;
                    }
                    if let Some(audio) = event.audio.as_deref().filter(|a| !a.is_empty()) {
                        match BASE64.decode(audio) {
                            Ok(decoded) => {
                                chunks += 1;
                                yield Bytes::from(decoded);
                            }
                            Err(e) => {
                                tracing::warn!(%context_id, error = %e, "skipping undecodable TTS audio");
                            }
                        }
                    }
                    if event.is_final == Some(true) {
                        break;
                    }
                }
                Message::Binary(data) => {
                    tracing::warn!(bytes = data.len(), "unexpected binary TTS frame, relaying as audio");
                    if !data.is_empty() {
                        chunks += 1;
                        yield data;
                    }
                }
                Message::Close(_) => {
                    session.release();
                    break;
                }
                _ => {}
            }
        }

        session.close().await;
        tracing::debug!(%context_id, chunks, "TTS session finished");

        if let Some(e) = failure {
            Err::<(), _>(e)?;
        }
    }
}

/// Iterator of raw audio chunks produced by blocking I/O.
pub type ChunkIter = Box<dyn Iterator<Item = Result<Bytes, VoiceError>> + Send>;

/// A blocking audio producer.
///
/// `open` and the returned iterator run on a worker thread and may block.
pub trait ChunkSource: Send + Sync + 'static {
    fn open(&self, text: &str) -> Result<ChunkIter, VoiceError>;
}

/// Relays a [`ChunkSource`] into an async stream through a bounded queue.
///
/// Every `coalesce_chunks` raw chunks are merged into one emitted chunk; a
/// shorter tail is emitted when the source ends.
pub struct BridgedSynthesizer<S> {
    source: Arc<S>,
    queue_capacity: usize,
    coalesce_chunks: usize,
}

impl<S: ChunkSource> BridgedSynthesizer<S> {
    pub fn new(source: S, queue_capacity: usize, coalesce_chunks: usize) -> Result<Self, VoiceError> {
        if queue_capacity == 0 || coalesce_chunks == 0 {
            return Err(VoiceError::Config(
                "queue_capacity and coalesce_chunks must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            source: Arc::new(source),
            queue_capacity,
            coalesce_chunks,
        })
    }
}

fn produce<S: ChunkSource>(
    source: &S,
    text: &str,
    coalesce_chunks: usize,
    tx: mpsc::Sender<Result<AudioChunk, VoiceError>>,
) {
    let chunks = match source.open(text) {
        Ok(chunks) => chunks,
        Err(e) => {
            let _ = tx.blocking_send(Err(e));
            return;
        }
    };

    let mut pending = BytesMut::new();
    let mut merged = 0usize;
    for chunk in chunks {
        match chunk {
            Ok(data) if data.is_empty() => {}
            Ok(data) => {
                pending.extend_from_slice(&data);
                merged += 1;
                if merged == coalesce_chunks {
                    merged = 0;
                    if tx.blocking_send(Ok(pending.split().freeze())).is_err() {
                        tracing::debug!("audio consumer dropped, stopping producer");
                        return;
                    }
                }
            }
            Err(e) => {
                if !pending.is_empty() && tx.blocking_send(Ok(pending.split().freeze())).is_err() {
                    return;
                }
                let _ = tx.blocking_send(Err(e));
                return;
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx.blocking_send(Ok(pending.freeze()));
    }
}

#[async_trait]
impl<S: ChunkSource> Synthesizer for BridgedSynthesizer<S> {
    async fn synthesize_stream(&self, text: &str) -> Result<AudioStream, VoiceError> {
        let text = prepare_text(text)?;
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let source = Arc::clone(&self.source);
        let coalesce_chunks = self.coalesce_chunks;

        tokio::task::spawn_blocking(move || produce(source.as_ref(), &text, coalesce_chunks, tx));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Blocking HTTP streaming synthesis.
#[derive(Debug, Clone)]
pub struct HttpChunkSource {
    config: SynthesisConfig,
}

impl HttpChunkSource {
    pub fn new(config: SynthesisConfig) -> Result<Self, VoiceError> {
        config.validate()?;
        tracing::info!(voice_id = %config.voice_id, "TTS service initialized (http)");
        Ok(Self { config })
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        let settings: VoiceSettings = self.config.voice_settings;
        json!({
            "text": text,
            "model_id": self.config.model_id,
            "voice_settings": settings,
        })
    }
}

impl ChunkSource for HttpChunkSource {
    fn open(&self, text: &str) -> Result<ChunkIter, VoiceError> {
        // Built on the worker thread: the blocking client owns a runtime of
        // its own and must not be created or dropped inside an async context.
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build TTS client: {}", e)))?;

        let response = client
            .post(self.config.stream_url())
            .header("xi-api-key", &self.config.api_key)
            .header("Accept", "audio/mpeg")
            .json(&self.request_body(text))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let detail = provider_error_message(status, &body);
            tracing::error!(%status, "TTS API error: {}", detail);
            return Err(VoiceError::Upstream(format!("TTS request failed: {}", detail)));
        }

        Ok(Box::new(ReadChunks::new(response)))
    }
}

/// Adapts a blocking reader into an iterator of chunks.
struct ReadChunks<R> {
    reader: R,
    done: bool,
}

impl<R: Read> ReadChunks<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }
}

impl<R: Read> Iterator for ReadChunks<R> {
    type Item = Result<Bytes, VoiceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Some(Ok(Bytes::from(buf)));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(VoiceError::Upstream(format!("TTS stream read failed: {}", e))));
                }
            }
        }
    }
}
