//! Interaction state and notice events.
//!
//! ## Streams
//!
//! | Event | Source |
//! |-------|--------|
//! | `InteractionStateEvent` | `Orchestrator::subscribe_states()` |
//! | `NoticeEvent` | `Orchestrator::subscribe_notices()` |
//!
//! Both carry a monotonically increasing `seq` so a consumer can detect
//! lagged (dropped) broadcasts.

use serde::{Deserialize, Serialize};

use crate::error::{BardError, ErrorKind};

// ---------------------------------------------------------------------------
// Interaction state
// ---------------------------------------------------------------------------

/// Sub-state of a live conversational-agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    Connecting,
    /// The agent is waiting for the listener.
    Listening,
    /// The agent is talking.
    Speaking,
}

/// Why an interaction failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReason {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&BardError> for FailureReason {
    fn from(err: &BardError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// The orchestrator's single live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InteractionState {
    /// Narration may be playing; no interaction in progress.
    Idle,
    /// Recording the listener's question.
    Listening,
    Transcribing,
    /// Showing the transcript before it is submitted.
    Previewing { transcript: String, seconds_left: u32 },
    Thinking { transcript: String },
    Answering {
        answer_text: String,
        audio_ref: Option<String>,
    },
    Conversing { mode: ConversationMode },
    /// Terminal; the orchestrator returns to `Idle` right after resuming.
    Failed { reason: FailureReason },
}

impl InteractionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, InteractionState::Idle)
    }

    /// Whether a pipeline may move the interaction from `self` to `next`.
    ///
    /// Terminal transitions (to `Idle` or `Failed`) are owned by the
    /// orchestrator and are not checked here.
    pub fn can_advance_to(&self, next: &InteractionState) -> bool {
        use InteractionState::*;
        matches!(
            (self, next),
            (Listening, Transcribing)
                | (Transcribing, Previewing { .. })
                | (Transcribing, Thinking { .. })
                | (Previewing { .. }, Previewing { .. })
                | (Previewing { .. }, Thinking { .. })
                | (Thinking { .. }, Answering { .. })
                | (Conversing { .. }, Conversing { .. })
        )
    }

    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            InteractionState::Idle => "idle",
            InteractionState::Listening => "listening",
            InteractionState::Transcribing => "transcribing",
            InteractionState::Previewing { .. } => "previewing",
            InteractionState::Thinking { .. } => "thinking",
            InteractionState::Answering { .. } => "answering",
            InteractionState::Conversing {
                mode: ConversationMode::Connecting,
            } => "conversing/connecting",
            InteractionState::Conversing {
                mode: ConversationMode::Listening,
            } => "conversing/listening",
            InteractionState::Conversing {
                mode: ConversationMode::Speaking,
            } => "conversing/speaking",
            InteractionState::Failed { .. } => "failed",
        }
    }
}

/// Published on every state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionStateEvent {
    pub seq: u64,
    pub state: InteractionState,
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

/// A transient, user-visible error shown next to the resumed narration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeEvent {
    pub seq: u64,
    pub kind: ErrorKind,
    pub message: String,
    /// Whether the error ended the interaction it occurred in.
    pub fatal: bool,
}

impl NoticeEvent {
    pub fn from_error(seq: u64, err: &BardError) -> Self {
        Self {
            seq,
            kind: err.kind(),
            message: err.to_string(),
            fatal: err.is_fatal(),
        }
    }
}
