use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    /// Rejected before any network call (empty upload, empty text).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Transcription succeeded but produced no usable text.
    #[error("no speech detected in audio")]
    NoSpeechDetected,

    /// A provider rejected a call, broke its protocol, or sent an error event.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A capability the request needs has no configured provider.
    #[error("{0} service not configured")]
    NotConfigured(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl VoiceError {
    /// Returns `true` for errors caused by the caller's input rather than a
    /// provider or the server's own configuration.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::NoSpeechDetected)
    }
}

impl From<reqwest::Error> for VoiceError {
    fn from(e: reqwest::Error) -> Self {
        VoiceError::Upstream(e.to_string())
    }
}
