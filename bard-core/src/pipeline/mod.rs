//! Question-answering pipelines.
//!
//! An [`InteractionPipeline`] runs one interaction as a spawned task and
//! reports progress through a [`PipelineSink`]. Every message is tagged with
//! the epoch the orchestrator assigned when starting it, so anything a torn
//! down pipeline still manages to send is recognisably stale.
//!
//! ```text
//! Orchestrator ──start(request, sink)──► pipeline task
//!      ▲                                      │
//!      └──── PipelineMessage { epoch, event } ┘
//! ```

pub mod conversation;
pub mod legacy;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    error::BardError, ipc::events::InteractionState, playback::PlaybackPosition,
    services::BoxFuture,
};

/// What started an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerSource {
    WakeWord,
    Manual,
}

/// Everything a pipeline needs to run one interaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineRequest {
    pub trigger: TriggerSource,
    /// Narration position captured when the interaction began.
    pub position: PlaybackPosition,
}

/// How a pipeline run ended on its own.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed,
    Failed(BardError),
}

#[derive(Debug)]
pub enum PipelineEvent {
    /// Move to a new interaction state.
    Stage(InteractionState),
    /// Microphone level in [0, 1].
    Level(f32),
    /// Seconds left before an idle conversation ends, or `None` when paused.
    Countdown(Option<u32>),
    /// Non-fatal problem worth showing to the listener.
    Notice(BardError),
    Finished(PipelineOutcome),
}

#[derive(Debug)]
pub struct PipelineMessage {
    pub epoch: u64,
    pub event: PipelineEvent,
}

/// Epoch-stamped sender handed to a running pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<PipelineMessage>,
}

impl PipelineSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<PipelineMessage>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn send(&self, event: PipelineEvent) {
        // The orchestrator going away ends the pipeline anyway.
        let _ = self.tx.send(PipelineMessage {
            epoch: self.epoch,
            event,
        });
    }

    pub fn stage(&self, state: InteractionState) {
        self.send(PipelineEvent::Stage(state));
    }

    pub fn level(&self, level: f32) {
        self.send(PipelineEvent::Level(level));
    }

    pub fn countdown(&self, seconds: Option<u32>) {
        self.send(PipelineEvent::Countdown(seconds));
    }

    pub fn notice(&self, err: BardError) {
        self.send(PipelineEvent::Notice(err));
    }

    pub fn finish(&self, outcome: PipelineOutcome) {
        self.send(PipelineEvent::Finished(outcome));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Legacy,
    Conversational,
}

/// One way of answering a listener's question.
pub trait InteractionPipeline: Send + 'static {
    fn kind(&self) -> PipelineKind;

    /// Whether the pipeline can currently be used. Checked once per trigger.
    fn is_available(&self) -> bool {
        true
    }

    /// State the orchestrator enters when this pipeline starts.
    fn initial_state(&self) -> InteractionState;

    /// Spawn the interaction. Must not block; all work happens in a task.
    fn start(&mut self, request: PipelineRequest, sink: PipelineSink);

    /// Stop the running interaction and release everything it holds
    /// (microphone, agent connection, answer audio). Idempotent.
    ///
    /// Resolves only once the resources are released, so the caller can
    /// resume narration without overlapping audio.
    fn shutdown(&mut self) -> BoxFuture<'_, ()>;
}
