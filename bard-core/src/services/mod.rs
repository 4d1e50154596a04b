//! Remote collaborators used by the interaction pipelines.
//!
//! Each service is an object-safe trait returning a boxed future, so the
//! orchestrator can hold `Arc<dyn Transcriber>` and friends without caring
//! whether the backend is HTTP, a local model, or a test double.

#[cfg(feature = "http")]
pub mod http;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::buffering::clip::AudioClip;
use crate::error::Result;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Text recognised from a question clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
}

impl Transcript {
    /// Whitespace-only transcripts count as "nothing was said".
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Speech-to-text.
pub trait Transcriber: Send + Sync + 'static {
    fn transcribe(&self, clip: AudioClip) -> BoxFuture<'_, Result<Transcript>>;
}

/// A question about the book at a given narration position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub question: String,
    pub chapter_id: u32,
    pub audio_time: f64,
}

/// The service's answer. `audio_ref` locates a spoken rendition, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub answer_text: String,
    pub audio_ref: Option<String>,
}

/// Question answering.
pub trait QuestionService: Send + Sync + 'static {
    fn ask(&self, request: AskRequest) -> BoxFuture<'_, Result<Answer>>;
}

/// Plays spoken answers.
pub trait AnswerPlayer: Send + Sync + 'static {
    /// Play `audio_ref`, resolving when playback has finished.
    ///
    /// # Errors
    /// `PlaybackBlocked` when the platform refuses to start audio.
    fn play(&self, audio_ref: &str) -> BoxFuture<'_, Result<()>>;

    /// Stop any answer audio immediately. Idempotent.
    fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_transcript_is_blank() {
        assert!(Transcript { text: " \n\t".into() }.is_blank());
        assert!(!Transcript { text: "who?".into() }.is_blank());
    }

    #[test]
    fn ask_request_uses_camel_case() {
        let json = serde_json::to_value(AskRequest {
            question: "who is Tom?".into(),
            chapter_id: 3,
            audio_time: 42.0,
        })
        .expect("serialize ask request");
        assert_eq!(json["chapterId"], 3);
        assert_eq!(json["audioTime"], 42.0);
    }
}
