//! Shared types for the Kin voice agent.
//!
//! This crate holds the request-scoped data model that flows between the
//! voice pipeline (`kin-voice`) and the HTTP front end (`kin-server`). It
//! performs no I/O and depends only on `serde` and `bytes`, so every other
//! crate in the workspace can depend on it without cycles.

pub mod voice;

pub use voice::{
    AudioChunk, PipelineState, TextSegment, TranscriptSegment, TranscriptWord,
    TranscriptionResult, VoiceSettings,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_settings_defaults_match_provider_recommendations() {
        let settings = VoiceSettings::default();
        assert_eq!(settings.stability, 0.5);
        assert_eq!(settings.similarity_boost, 0.75);
        assert_eq!(settings.style, 0.0);
        assert!(settings.use_speaker_boost);
    }

    #[test]
    fn voice_settings_fill_missing_fields_from_defaults() {
        let settings: VoiceSettings = serde_json::from_str(r#"{"style": 0.3}"#).unwrap();
        assert_eq!(settings.stability, 0.5);
        assert_eq!(settings.style, 0.3);
        assert!(settings.use_speaker_boost);
    }

    #[test]
    fn whitespace_transcription_has_no_speech() {
        let result = TranscriptionResult {
            text: "  \n ".to_string(),
            ..Default::default()
        };
        assert!(!result.has_speech());

        let result = TranscriptionResult {
            text: "hello".to_string(),
            ..Default::default()
        };
        assert!(result.has_speech());
    }

    #[test]
    fn pipeline_state_serializes_snake_case() {
        let json = serde_json::to_string(&PipelineState::Draining).unwrap();
        assert_eq!(json, "\"draining\"");
        assert!(PipelineState::Failed.is_terminal());
        assert!(!PipelineState::Streaming.is_terminal());
    }
}
