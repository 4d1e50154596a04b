//! `Orchestrator`: the interaction state machine.
//!
//! ## Lifecycle
//!
//! ```text
//! Orchestrator::spawn()
//!     └─► Idle ──wake word / trigger()──► Listening | Conversing(Connecting)
//!                                             │   (position captured, narration paused)
//!         ◄── completion / failure / cancel() / resume() ──┘
//!             (pipeline torn down, narration resumed at the captured position)
//! ```
//!
//! ## Threading
//!
//! All interaction state is owned by one actor task. The handle only sends
//! commands and reads `watch` / `broadcast` channels, so it is cheap to clone
//! and never blocks. Pipeline events carry an epoch; the actor bumps the epoch
//! at every terminal transition, so a result that arrives after a cancel is
//! dropped instead of being applied.

mod actor;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    alignment::AlignmentSource,
    audio::Microphone,
    ipc::events::{InteractionState, InteractionStateEvent, NoticeEvent},
    pipeline::{
        conversation::{ConversationConfig, ConversationPipeline, ConversationTransport},
        legacy::{LegacyConfig, LegacyPipeline},
        InteractionPipeline, TriggerSource,
    },
    playback::Narration,
    recorder::{Recorder, RecorderConfig},
    services::{AnswerPlayer, QuestionService, Transcriber},
    wake::{WakeWordDetector, WakeWordGate},
};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `Orchestrator`.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub recorder: RecorderConfig,
    pub legacy: LegacyConfig,
    /// `None` disables the conversational pipeline.
    pub conversation: Option<ConversationConfig>,
    /// Retry with the legacy pipeline when the agent cannot be reached.
    pub fallback_to_legacy: bool,
}

/// Services needed by the staged pipeline.
pub struct LegacyServices {
    pub microphone: Arc<dyn Microphone>,
    pub transcriber: Arc<dyn Transcriber>,
    pub questions: Arc<dyn QuestionService>,
    pub player: Arc<dyn AnswerPlayer>,
}

/// Services needed by the conversational pipeline.
pub struct ConversationServices {
    pub transport: Arc<dyn ConversationTransport>,
    /// Source of the briefing text; `None` briefs with the position only.
    pub alignment: Option<Arc<dyn AlignmentSource>>,
}

/// Everything external the orchestrator drives.
pub struct Collaborators {
    pub narration: Arc<dyn Narration>,
    pub wake_word: Option<Box<dyn WakeWordDetector>>,
    pub legacy: Option<LegacyServices>,
    pub conversation: Option<ConversationServices>,
}

#[derive(Debug)]
pub(crate) enum Command {
    Trigger(TriggerSource),
    Cancel,
    Resume,
    NarrationChanged,
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to the orchestrator actor.
#[derive(Clone)]
pub struct Orchestrator {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<InteractionState>,
    level: watch::Receiver<f32>,
    countdown: watch::Receiver<Option<u32>>,
    states_tx: broadcast::Sender<InteractionStateEvent>,
    notices_tx: broadcast::Sender<NoticeEvent>,
}

impl Orchestrator {
    /// Build the pipelines and spawn the actor. Must be called inside a
    /// Tokio runtime.
    pub fn spawn(config: OrchestratorConfig, collaborators: Collaborators) -> (Self, JoinHandle<()>) {
        let Collaborators {
            narration,
            wake_word,
            legacy,
            conversation,
        } = collaborators;

        let legacy: Option<Box<dyn InteractionPipeline>> = legacy.map(|s| {
            let recorder = Recorder::new(config.recorder.clone(), s.microphone);
            Box::new(LegacyPipeline::new(
                config.legacy.clone(),
                recorder,
                s.transcriber,
                s.questions,
                s.player,
            )) as Box<dyn InteractionPipeline>
        });

        let conversational: Option<Box<dyn InteractionPipeline>> =
            match (config.conversation.clone(), conversation) {
                (Some(cfg), Some(s)) => Some(Box::new(ConversationPipeline::new(
                    cfg,
                    s.transport,
                    s.alignment,
                )) as Box<dyn InteractionPipeline>),
                (None, Some(_)) => {
                    warn!("conversation transport provided without an agent configuration");
                    None
                }
                (Some(cfg), None) => {
                    info!(agent_id = %cfg.agent_id, "agent configured without a conversation transport");
                    None
                }
                _ => None,
            };

        info!(
            legacy = legacy.is_some(),
            conversational = conversational.is_some(),
            fallback = config.fallback_to_legacy,
            "orchestrator starting"
        );

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(InteractionState::Idle);
        let (level_tx, level_rx) = watch::channel(0.0f32);
        let (countdown_tx, countdown_rx) = watch::channel(None);
        let (states_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (notices_tx, _) = broadcast::channel(BROADCAST_CAP);

        let mut gate = WakeWordGate::new(wake_word);
        if let Err(e) = gate.load(wake_tx) {
            warn!("continuing without wake word: {e}");
        }

        let actor = actor::Actor::new(actor::ActorParts {
            narration,
            gate,
            legacy,
            conversational,
            fallback_to_legacy: config.fallback_to_legacy,
            pipeline_tx,
            state_tx,
            level_tx,
            countdown_tx,
            states_tx: states_tx.clone(),
            notices_tx: notices_tx.clone(),
        });
        let task = tokio::spawn(actor.run(commands_rx, pipeline_rx, wake_rx));

        let handle = Self {
            commands: commands_tx,
            state: state_rx,
            level: level_rx,
            countdown: countdown_rx,
            states_tx,
            notices_tx,
        };
        (handle, task)
    }

    /// Start an interaction. Ignored unless idle.
    pub fn trigger(&self, source: TriggerSource) {
        self.send(Command::Trigger(source));
    }

    /// Abort the current interaction and resume narration.
    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    /// End the current interaction normally and resume narration.
    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    /// Tell the orchestrator the narration player started or stopped.
    pub fn narration_changed(&self) {
        self.send(Command::NarrationChanged);
    }

    /// Tear down any interaction and stop the actor.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Command::Shutdown(ack_tx));
        let _ = ack_rx.await;
    }

    /// Current state (snapshot).
    pub fn state(&self) -> InteractionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<InteractionState> {
        self.state.clone()
    }

    /// Microphone level in [0, 1]; 0 when not recording.
    pub fn audio_level(&self) -> f32 {
        *self.level.borrow()
    }

    pub fn watch_level(&self) -> watch::Receiver<f32> {
        self.level.clone()
    }

    /// Seconds before an idle conversation ends, when counting down.
    pub fn silence_countdown(&self) -> Option<u32> {
        *self.countdown.borrow()
    }

    pub fn watch_countdown(&self) -> watch::Receiver<Option<u32>> {
        self.countdown.clone()
    }

    /// Subscribe to every state change.
    pub fn subscribe_states(&self) -> broadcast::Receiver<InteractionStateEvent> {
        self.states_tx.subscribe()
    }

    /// Subscribe to user-visible errors.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<NoticeEvent> {
        self.notices_tx.subscribe()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("orchestrator already stopped, command dropped");
        }
    }
}
