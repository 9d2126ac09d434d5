//! Server configuration loading from file and environment variables.

use kin_voice::{
    CompletionConfig, SegmenterConfig, SynthesisConfig, TranscriptionConfig,
    TranscriptionProvider,
};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Speech-to-text provider.
    #[serde(default)]
    pub transcription: TranscriptionConfig,

    /// Chat completion provider.
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Text-to-speech provider.
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Segment flush thresholds.
    #[serde(default)]
    pub segmenter: SegmenterConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Hard limit on the lifetime of a streaming response body.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Largest accepted request body (audio uploads).
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "kin_voice=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8000
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `KIN_HOST` overrides `server.host`
/// - `KIN_PORT` overrides `server.port`
/// - `KIN_LOG_LEVEL` overrides `logging.level`
/// - `KIN_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `OPENAI_API_KEY` sets `completion.api_key`, and `transcription.api_key`
///   when the Whisper provider is selected
/// - `ELEVENLABS_API_KEY` sets `synthesis.api_key`, and
///   `transcription.api_key` when the Scribe provider is selected
/// - `ELEVENLABS_VOICE_ID` overrides `synthesis.voice_id`
/// - `ELEVENLABS_MODEL` overrides `synthesis.model_id`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies overrides from `lookup` (the process environment in production).
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("KIN_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("KIN_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = lookup("KIN_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("KIN_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
        if config.transcription.provider == TranscriptionProvider::Whisper {
            config.transcription.api_key = key.clone();
        }
        config.completion.api_key = key;
    }
    if let Some(key) = lookup("ELEVENLABS_API_KEY").filter(|k| !k.is_empty()) {
        if config.transcription.provider == TranscriptionProvider::Scribe {
            config.transcription.api_key = key.clone();
        }
        config.synthesis.api_key = key;
    }
    if let Some(voice_id) = lookup("ELEVENLABS_VOICE_ID") {
        config.synthesis.voice_id = voice_id;
    }
    if let Some(model) = lookup("ELEVENLABS_MODEL") {
        config.synthesis.model_id = model;
    }
}
