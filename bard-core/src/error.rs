use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by bard-core.
#[derive(Debug, Error)]
pub enum BardError {
    #[error("microphone access was denied")]
    DeviceDenied,

    #[error("no audio input device found")]
    DeviceNotFound,

    #[error("audio input device is busy: {0}")]
    DeviceBusy(String),

    #[error("no speech detected")]
    NoSpeechDetected,

    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("answer service failed: {0}")]
    AnswerServiceFailed(String),

    #[error("conversation connect failed: {0}")]
    ConversationConnectFailed(String),

    #[error("conversation error: {0}")]
    ConversationRuntimeError(String),

    #[error("answer playback blocked: {0}")]
    PlaybackBlocked(String),

    #[error("wake word detector error: {0}")]
    WakeWord(String),

    #[error("invalid alignment: {0}")]
    Alignment(String),

    #[error("narration error: {0}")]
    Narration(String),

    #[error("no interaction pipeline is configured")]
    NoPipeline,

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BardError>;

/// Serializable classification of a [`BardError`], shown to the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    DeviceDenied,
    DeviceNotFound,
    DeviceBusy,
    NoSpeechDetected,
    TranscriptionFailed,
    AnswerServiceFailed,
    ConversationConnectFailed,
    ConversationRuntimeError,
    PlaybackBlocked,
    WakeWord,
    Internal,
}

impl BardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BardError::DeviceDenied => ErrorKind::DeviceDenied,
            BardError::DeviceNotFound => ErrorKind::DeviceNotFound,
            BardError::DeviceBusy(_) => ErrorKind::DeviceBusy,
            BardError::NoSpeechDetected => ErrorKind::NoSpeechDetected,
            BardError::TranscriptionFailed(_) => ErrorKind::TranscriptionFailed,
            BardError::AnswerServiceFailed(_) => ErrorKind::AnswerServiceFailed,
            BardError::ConversationConnectFailed(_) => ErrorKind::ConversationConnectFailed,
            BardError::ConversationRuntimeError(_) => ErrorKind::ConversationRuntimeError,
            BardError::PlaybackBlocked(_) => ErrorKind::PlaybackBlocked,
            BardError::WakeWord(_) => ErrorKind::WakeWord,
            BardError::Alignment(_)
            | BardError::Narration(_)
            | BardError::NoPipeline
            | BardError::AudioStream(_)
            | BardError::Io(_)
            | BardError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error ends the active interaction.
    ///
    /// Blocked answer playback and wake-word hiccups are reported but the
    /// interaction (or narration) carries on.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BardError::PlaybackBlocked(_) | BardError::WakeWord(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_blocked_is_not_fatal() {
        let err = BardError::PlaybackBlocked("autoplay".into());
        assert!(!err.is_fatal());
        assert_eq!(err.kind(), ErrorKind::PlaybackBlocked);
    }

    #[test]
    fn service_failures_are_fatal() {
        assert!(BardError::TranscriptionFailed("503".into()).is_fatal());
        assert!(BardError::AnswerServiceFailed("timeout".into()).is_fatal());
        assert!(BardError::NoSpeechDetected.is_fatal());
        assert!(BardError::DeviceDenied.is_fatal());
    }

    #[test]
    fn ambient_errors_classify_as_internal() {
        let err = BardError::Other(anyhow::anyhow!("boom"));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(BardError::NoPipeline.kind(), ErrorKind::Internal);
    }

    #[test]
    fn error_kind_serializes_camel_case() {
        let json = serde_json::to_value(ErrorKind::ConversationConnectFailed)
            .expect("serialize error kind");
        assert_eq!(json, "conversationConnectFailed");
    }
}
