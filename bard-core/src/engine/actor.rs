//! The orchestrator actor: single owner of interaction state.
//!
//! Every input (commands, pipeline events, wake-word detections) is handled
//! one at a time by [`Actor::run`], which makes each transition atomic.
//! [`Actor::finish`] is the only path back to `Idle`; it is guarded by the
//! state and bumps the epoch, so narration is resumed exactly once per
//! interaction no matter how many terminal events race each other.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use super::Command;
use crate::{
    error::BardError,
    ipc::events::{FailureReason, InteractionState, InteractionStateEvent, NoticeEvent},
    pipeline::{
        InteractionPipeline, PipelineEvent, PipelineKind, PipelineMessage, PipelineOutcome,
        PipelineRequest, PipelineSink, TriggerSource,
    },
    playback::{Narration, PlaybackTracker},
    wake::{WakeWordDetection, WakeWordGate},
};

pub(crate) struct ActorParts {
    pub narration: Arc<dyn Narration>,
    pub gate: WakeWordGate,
    pub legacy: Option<Box<dyn InteractionPipeline>>,
    pub conversational: Option<Box<dyn InteractionPipeline>>,
    pub fallback_to_legacy: bool,
    pub pipeline_tx: mpsc::UnboundedSender<PipelineMessage>,
    pub state_tx: watch::Sender<InteractionState>,
    pub level_tx: watch::Sender<f32>,
    pub countdown_tx: watch::Sender<Option<u32>>,
    pub states_tx: broadcast::Sender<InteractionStateEvent>,
    pub notices_tx: broadcast::Sender<NoticeEvent>,
}

pub(crate) struct Actor {
    parts: ActorParts,
    tracker: PlaybackTracker,
    state: InteractionState,
    /// Pipeline currently running, if any.
    active: Option<PipelineKind>,
    /// Request of the running interaction, reused on fallback.
    request: Option<PipelineRequest>,
    epoch: u64,
    seq: u64,
}

impl Actor {
    pub fn new(parts: ActorParts) -> Self {
        Self {
            parts,
            tracker: PlaybackTracker::new(),
            state: InteractionState::Idle,
            active: None,
            request: None,
            epoch: 0,
            seq: 0,
        }
    }

    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut pipeline_rx: mpsc::UnboundedReceiver<PipelineMessage>,
        mut wake_rx: mpsc::UnboundedReceiver<WakeWordDetection>,
    ) {
        self.refresh_gate();

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Trigger(source)) => self.on_trigger(source).await,
                    Some(Command::Cancel) => {
                        if !self.state.is_idle() {
                            info!(state = self.state.label(), "interaction cancelled");
                        }
                        self.finish(None).await;
                    }
                    Some(Command::Resume) => {
                        if !self.state.is_idle() {
                            info!(state = self.state.label(), "resume requested");
                        }
                        self.finish(None).await;
                    }
                    Some(Command::NarrationChanged) => self.on_narration_changed(),
                    Some(Command::Shutdown(ack)) => {
                        self.stop().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                Some(message) = pipeline_rx.recv() => self.on_pipeline(message).await,
                Some(detection) = wake_rx.recv() => self.on_wake_word(detection).await,
            }
        }
        info!("orchestrator stopped");
    }

    // ── Transitions ──────────────────────────────────────────────────────────

    async fn on_trigger(&mut self, trigger: TriggerSource) {
        if !self.state.is_idle() {
            debug!(?trigger, state = self.state.label(), "trigger ignored, interaction in progress");
            return;
        }
        let Some(kind) = self.select_pipeline() else {
            warn!(?trigger, "trigger rejected: no pipeline configured");
            self.notify(&BardError::NoPipeline);
            self.refresh_gate();
            return;
        };

        let position = self.parts.narration.position();
        self.tracker.capture(position);
        self.parts.narration.pause();
        if let Err(e) = self.parts.gate.configure(false) {
            self.notify(&e);
        }
        info!(
            ?trigger,
            pipeline = ?kind,
            chapter_id = position.chapter_id,
            audio_time = position.audio_time,
            "interaction started"
        );
        self.begin(kind, PipelineRequest { trigger, position });
    }

    fn begin(&mut self, kind: PipelineKind, request: PipelineRequest) {
        self.epoch += 1;
        self.active = Some(kind);
        self.request = Some(request);

        let Some(initial) = self.pipeline_mut(kind).map(|p| p.initial_state()) else {
            return;
        };
        self.set_state(initial);

        let sink = PipelineSink::new(self.epoch, self.parts.pipeline_tx.clone());
        if let Some(pipeline) = self.pipeline_mut(kind) {
            pipeline.start(request, sink);
        }
    }

    async fn on_pipeline(&mut self, message: PipelineMessage) {
        if message.epoch != self.epoch || self.state.is_idle() {
            debug!(
                epoch = message.epoch,
                current = self.epoch,
                "stale pipeline event dropped"
            );
            return;
        }

        match message.event {
            PipelineEvent::Stage(next) => {
                if self.state.can_advance_to(&next) {
                    self.set_state(next);
                } else {
                    warn!(
                        from = self.state.label(),
                        to = next.label(),
                        "invalid pipeline transition ignored"
                    );
                }
            }
            PipelineEvent::Level(level) => {
                self.parts.level_tx.send_replace(level);
            }
            PipelineEvent::Countdown(seconds) => {
                self.parts.countdown_tx.send_replace(seconds);
            }
            PipelineEvent::Notice(err) => {
                warn!("interaction notice: {err}");
                self.notify(&err);
            }
            PipelineEvent::Finished(PipelineOutcome::Completed) => {
                info!(state = self.state.label(), "interaction completed");
                self.finish(None).await;
            }
            PipelineEvent::Finished(PipelineOutcome::Failed(err)) => {
                if self.should_fall_back(&err) {
                    self.fall_back(err).await;
                } else {
                    warn!(state = self.state.label(), "interaction failed: {err}");
                    self.finish(Some(err)).await;
                }
            }
        }
    }

    fn should_fall_back(&self, err: &BardError) -> bool {
        matches!(err, BardError::ConversationConnectFailed(_))
            && self.active == Some(PipelineKind::Conversational)
            && self.parts.fallback_to_legacy
            && self.parts.legacy.is_some()
    }

    /// Rerun the same trigger through the legacy pipeline. The captured
    /// position stays in the tracker.
    async fn fall_back(&mut self, err: BardError) {
        warn!("agent unavailable, falling back to the staged pipeline: {err}");
        self.epoch += 1;
        if let Some(pipeline) = self.active.take().and_then(|k| self.pipeline_mut(k)) {
            pipeline.shutdown().await;
        }
        self.parts.countdown_tx.send_replace(None);
        match self.request {
            Some(request) => self.begin(PipelineKind::Legacy, request),
            None => self.finish(Some(err)).await,
        }
    }

    /// Terminal transition: tear down, restore, resume, back to `Idle`.
    async fn finish(&mut self, error: Option<BardError>) {
        if self.state.is_idle() {
            return;
        }
        // Anything the old pipeline still sends is now stale.
        self.epoch += 1;

        if let Some(err) = &error {
            self.set_state(InteractionState::Failed {
                reason: FailureReason::from(err),
            });
            self.notify(err);
        }

        if let Some(pipeline) = self.active.take().and_then(|k| self.pipeline_mut(k)) {
            pipeline.shutdown().await;
        }
        self.request = None;
        self.parts.level_tx.send_replace(0.0);
        self.parts.countdown_tx.send_replace(None);

        match self.tracker.restore() {
            Some(position) => match self.parts.narration.resume_at(position) {
                Ok(()) => info!(
                    chapter_id = position.chapter_id,
                    audio_time = position.audio_time,
                    "narration resumed"
                ),
                Err(e) => {
                    warn!("narration could not resume: {e}");
                    self.notify(&e);
                }
            },
            None => warn!("no captured position to resume from"),
        }

        self.set_state(InteractionState::Idle);
        self.refresh_gate();
    }

    async fn on_wake_word(&mut self, detection: WakeWordDetection) {
        if !self.state.is_idle() {
            debug!(keyword = %detection.keyword, "wake word ignored during interaction");
            return;
        }
        if self.parts.gate.accept(&detection) {
            self.on_trigger(TriggerSource::WakeWord).await;
        }
    }

    fn on_narration_changed(&mut self) {
        let playing = self.parts.narration.is_playing();
        if playing && !self.state.is_idle() {
            warn!(state = self.state.label(), "narration started during an interaction, pausing it");
            self.parts.narration.pause();
        }
        self.refresh_gate();
    }

    async fn stop(&mut self) {
        self.finish(None).await;
        if let Err(e) = self.parts.gate.configure(false) {
            debug!("wake word gate did not close cleanly: {e}");
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn select_pipeline(&self) -> Option<PipelineKind> {
        match (&self.parts.conversational, &self.parts.legacy) {
            (Some(p), _) if p.is_available() => Some(PipelineKind::Conversational),
            (_, Some(_)) => Some(PipelineKind::Legacy),
            _ => None,
        }
    }

    fn pipeline_mut(&mut self, kind: PipelineKind) -> Option<&mut Box<dyn InteractionPipeline>> {
        match kind {
            PipelineKind::Legacy => self.parts.legacy.as_mut(),
            PipelineKind::Conversational => self.parts.conversational.as_mut(),
        }
    }

    /// Listen for the wake word only while narration plays and nothing else
    /// is going on.
    fn refresh_gate(&mut self) {
        let enabled = self.state.is_idle() && self.parts.narration.is_playing();
        if let Err(e) = self.parts.gate.configure(enabled) {
            self.notify(&e);
        }
    }

    fn set_state(&mut self, next: InteractionState) {
        if next == self.state {
            return;
        }
        debug!(from = self.state.label(), to = next.label(), "state transition");
        self.state = next.clone();
        self.parts.state_tx.send_replace(next.clone());
        self.seq += 1;
        let _ = self.parts.states_tx.send(InteractionStateEvent {
            seq: self.seq,
            state: next,
        });
    }

    fn notify(&mut self, err: &BardError) {
        self.seq += 1;
        let _ = self
            .parts
            .notices_tx
            .send(NoticeEvent::from_error(self.seq, err));
    }
}
