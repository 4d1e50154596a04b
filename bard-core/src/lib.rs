//! # bard-core
//!
//! Voice-interaction orchestrator for narrated audiobooks.
//!
//! ## Architecture
//!
//! ```text
//! Narration ──position──► Orchestrator (actor) ◄── wake word / trigger() / cancel()
//!                              │
//!              ┌───────────────┴────────────────┐
//!       LegacyPipeline                    ConversationPipeline
//!  Recorder(spawn_blocking)                ConversationTransport
//!   → Transcriber → QuestionService         briefing, countdown,
//!   → AnswerPlayer                          resume_audiobook tool
//!              └──────── PipelineMessage{epoch} ┘
//!                              │
//!             watch<InteractionState> + broadcast<InteractionStateEvent | NoticeEvent>
//! ```
//!
//! The microphone callback is zero-alloc. All analysis happens on the
//! recorder's blocking thread; everything else is async.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod alignment;
pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod pipeline;
pub mod playback;
pub mod recorder;
pub mod services;
pub mod vad;
pub mod wake;

// Convenience re-exports for downstream crates
pub use alignment::{AgentContext, Alignment, AlignmentSentence, AlignmentSource};
pub use engine::{
    Collaborators, ConversationServices, LegacyServices, Orchestrator, OrchestratorConfig,
};
pub use error::{BardError, ErrorKind};
pub use ipc::events::{
    ConversationMode, FailureReason, InteractionState, InteractionStateEvent, NoticeEvent,
};
pub use pipeline::{
    conversation::{ConversationConfig, ConversationTransport},
    legacy::LegacyConfig,
    TriggerSource,
};
pub use playback::{Narration, NarrationClock, PlaybackPosition};
pub use recorder::RecorderConfig;
pub use services::{AnswerPlayer, QuestionService, Transcriber};
pub use wake::{ChannelWakeWord, WakeWordDetector};

#[cfg(feature = "http")]
pub use services::http::HttpBackend;
