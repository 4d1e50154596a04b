//! Conversational-agent session.
//!
//! ```text
//! start ──► Connecting ──connected, briefing sent──► Listening ⇄ Speaking
//!                                                       │
//!        resume tool / silence countdown / remote hang-up / error ──► finished
//! ```
//!
//! The transport is external; this module only drives its lifecycle. While
//! the agent is listening a countdown runs; when it reaches zero the session
//! ends exactly like a user stop. The countdown never runs while the agent
//! speaks, and any inbound message or barge-in resets it to full.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{
    InteractionPipeline, PipelineKind, PipelineOutcome, PipelineRequest, PipelineSink,
};
use crate::{
    alignment::{AgentContext, Alignment, AlignmentSource},
    error::{BardError, Result},
    ipc::events::{ConversationMode, InteractionState},
    playback::PlaybackPosition,
    services::BoxFuture,
};

/// Client tool the agent calls to hand the listener back to the narration.
pub const RESUME_TOOL: &str = "resume_audiobook";

// ── Transport seam ────────────────────────────────────────────────────────

/// Whether the remote agent is talking or waiting for the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    Listening,
    Speaking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSource {
    User,
    Agent,
}

/// A tool invocation from the agent. Answer through `reply`.
#[derive(Debug)]
pub struct ToolCall {
    pub name: String,
    pub parameters: serde_json::Value,
    pub reply: oneshot::Sender<std::result::Result<String, String>>,
}

#[derive(Debug)]
pub enum TransportEvent {
    ModeChanged(AgentMode),
    Message { source: MessageSource, text: String },
    /// The listener talked over the agent.
    Interrupted,
    ToolCall(ToolCall),
    Disconnected { reason: Option<String> },
    Error(String),
}

#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub agent_id: String,
    pub context: AgentContext,
}

/// Outbound half of a live connection.
pub trait ConversationControl: Send + 'static {
    /// Send contextual text the agent should know but not speak.
    fn send_context(&mut self, text: String) -> BoxFuture<'_, Result<()>>;

    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// A live connection: inbound events plus the outbound control.
pub struct ConversationLink {
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub control: Box<dyn ConversationControl>,
}

/// Opens connections to a conversational agent.
pub trait ConversationTransport: Send + Sync + 'static {
    /// Cheap check used at trigger time to pick a pipeline.
    fn is_available(&self) -> bool {
        true
    }

    fn connect(&self, request: ConnectRequest) -> BoxFuture<'_, Result<ConversationLink>>;
}

// ── Configuration ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub agent_id: String,
    /// Idle time while the agent listens before the session ends. Default: 10 s.
    pub silence_timeout: Duration,
    /// Bound on the heard-so-far text in the briefing. Default: 2000.
    pub max_context_words: usize,
    /// Upper bound on disconnecting at the end of a session. Default: 2 s.
    pub teardown_timeout: Duration,
}

impl ConversationConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    fn countdown_seconds(&self) -> u32 {
        (self.silence_timeout.as_secs_f64().ceil() as u32).max(1)
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            silence_timeout: Duration::from_secs(10),
            max_context_words: 2000,
            teardown_timeout: Duration::from_secs(2),
        }
    }
}

// ── Silence countdown ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    /// Countdown not running.
    Idle,
    Remaining(u32),
    Elapsed,
}

/// Whole-second countdown that only runs while the agent is listening.
#[derive(Debug, Clone)]
pub struct SilenceCountdown {
    full: u32,
    remaining: Option<u32>,
}

impl SilenceCountdown {
    pub fn new(full: u32) -> Self {
        Self {
            full: full.max(1),
            remaining: None,
        }
    }

    pub fn full(&self) -> u32 {
        self.full
    }

    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    /// Start, or restart, from the full duration.
    pub fn start(&mut self) {
        self.remaining = Some(self.full);
    }

    pub fn clear(&mut self) {
        self.remaining = None;
    }

    /// Back to the full duration if running. Returns whether it was running.
    pub fn reset(&mut self) -> bool {
        if self.remaining.is_some() {
            self.remaining = Some(self.full);
            true
        } else {
            false
        }
    }

    /// Advance by one second.
    pub fn tick(&mut self) -> CountdownTick {
        match self.remaining {
            None => CountdownTick::Idle,
            Some(n) if n <= 1 => {
                self.remaining = None;
                CountdownTick::Elapsed
            }
            Some(n) => {
                self.remaining = Some(n - 1);
                CountdownTick::Remaining(n - 1)
            }
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────

#[derive(Clone)]
struct SessionContext {
    config: ConversationConfig,
    transport: Arc<dyn ConversationTransport>,
    alignment: Option<Arc<dyn AlignmentSource>>,
    cache: Arc<Mutex<Option<Arc<Alignment>>>>,
}

pub struct ConversationPipeline {
    ctx: SessionContext,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ConversationPipeline {
    pub fn new(
        config: ConversationConfig,
        transport: Arc<dyn ConversationTransport>,
        alignment: Option<Arc<dyn AlignmentSource>>,
    ) -> Self {
        Self {
            ctx: SessionContext {
                config,
                transport,
                alignment,
                cache: Arc::new(Mutex::new(None)),
            },
            stop: None,
            task: None,
        }
    }
}

impl InteractionPipeline for ConversationPipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::Conversational
    }

    fn is_available(&self) -> bool {
        !self.ctx.config.agent_id.is_empty() && self.ctx.transport.is_available()
    }

    fn initial_state(&self) -> InteractionState {
        InteractionState::Conversing {
            mode: ConversationMode::Connecting,
        }
    }

    fn start(&mut self, request: PipelineRequest, sink: PipelineSink) {
        if let Some(stale) = self.task.take() {
            stale.abort();
        }
        let (stop_tx, stop_rx) = oneshot::channel();
        let ctx = self.ctx.clone();
        info!(
            epoch = sink.epoch(),
            trigger = ?request.trigger,
            agent_id = %ctx.config.agent_id,
            "conversation session starting"
        );
        self.stop = Some(stop_tx);
        self.task = Some(tokio::spawn(async move {
            ctx.run(request, sink, stop_rx).await;
        }));
    }

    fn shutdown(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            if let Some(mut task) = self.task.take() {
                // Teardown is already bounded inside the task; this is the backstop.
                let grace = self.ctx.config.teardown_timeout + Duration::from_millis(500);
                if tokio::time::timeout(grace, &mut task).await.is_err() {
                    warn!("conversation task did not stop in time, aborting");
                    task.abort();
                    let _ = task.await;
                }
            }
            debug!("conversation pipeline shut down");
        })
    }
}

/// How the event loop ended.
enum Exit {
    /// Stopped by the orchestrator; it already knows.
    Stopped,
    Finished(PipelineOutcome),
    /// The agent asked to resume; acknowledge once the resume is under way.
    ResumeTool(oneshot::Sender<std::result::Result<String, String>>),
}

impl SessionContext {
    async fn run(self, request: PipelineRequest, sink: PipelineSink, mut stop: oneshot::Receiver<()>) {
        // ── Connect ──────────────────────────────────────────────────────
        let connecting = async {
            let context = self.agent_context(request.position).await;
            let link = self
                .transport
                .connect(ConnectRequest {
                    agent_id: self.config.agent_id.clone(),
                    context: context.clone(),
                })
                .await
                .map_err(|e| match e {
                    BardError::ConversationConnectFailed(_) => e,
                    other => BardError::ConversationConnectFailed(other.to_string()),
                })?;
            Ok::<_, BardError>((link, context))
        };

        let (link, context) = tokio::select! {
            biased;
            _ = &mut stop => {
                debug!("conversation stopped while connecting");
                return;
            }
            result = connecting => match result {
                Ok(connected) => connected,
                Err(e) => {
                    warn!("conversation connect failed: {e}");
                    sink.finish(PipelineOutcome::Failed(e));
                    return;
                }
            },
        };

        let ConversationLink {
            mut events,
            mut control,
        } = link;

        // From here on the session is live and every exit disconnects.
        let briefed = tokio::select! {
            biased;
            _ = &mut stop => None,
            result = control.send_context(context.briefing()) => Some(result),
        };
        match briefed {
            None => {
                debug!("conversation stopped while briefing");
                self.disconnect(&mut control).await;
                return;
            }
            Some(Err(e)) => {
                warn!("agent briefing failed: {e}");
                self.disconnect(&mut control).await;
                sink.finish(PipelineOutcome::Failed(BardError::ConversationConnectFailed(
                    format!("briefing not delivered: {e}"),
                )));
                return;
            }
            Some(Ok(())) => debug!(words = context.word_count, "agent briefed"),
        }
        info!("conversation connected");

        // ── Converse ─────────────────────────────────────────────────────
        let mut countdown = SilenceCountdown::new(self.config.countdown_seconds());
        let mut mode = AgentMode::Listening;
        let second = Duration::from_secs(1);
        let mut ticker = interval_at(Instant::now() + second, second);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        sink.stage(InteractionState::Conversing {
            mode: ConversationMode::Listening,
        });
        countdown.start();
        sink.countdown(countdown.remaining());

        let exit = loop {
            tokio::select! {
                biased;
                _ = &mut stop => break Exit::Stopped,
                event = events.recv() => match event {
                    Some(TransportEvent::ModeChanged(AgentMode::Speaking)) => {
                        mode = AgentMode::Speaking;
                        countdown.clear();
                        sink.stage(InteractionState::Conversing { mode: ConversationMode::Speaking });
                        sink.countdown(None);
                    }
                    Some(TransportEvent::ModeChanged(AgentMode::Listening)) => {
                        mode = AgentMode::Listening;
                        countdown.start();
                        ticker.reset();
                        sink.stage(InteractionState::Conversing { mode: ConversationMode::Listening });
                        sink.countdown(countdown.remaining());
                    }
                    Some(TransportEvent::Message { source, text }) => {
                        debug!(?source, chars = text.len(), "conversation message");
                        if mode == AgentMode::Listening && countdown.reset() {
                            ticker.reset();
                            sink.countdown(countdown.remaining());
                        }
                    }
                    Some(TransportEvent::Interrupted) => {
                        debug!("listener barged in");
                        if mode == AgentMode::Listening && countdown.reset() {
                            ticker.reset();
                            sink.countdown(countdown.remaining());
                        }
                    }
                    Some(TransportEvent::ToolCall(call)) if call.name == RESUME_TOOL => {
                        info!("agent requested resume");
                        break Exit::ResumeTool(call.reply);
                    }
                    Some(TransportEvent::ToolCall(call)) => {
                        warn!(tool = %call.name, "unknown tool call");
                        let _ = call.reply.send(Err(format!("unknown tool: {}", call.name)));
                    }
                    Some(TransportEvent::Disconnected { reason }) => {
                        info!(?reason, "agent disconnected");
                        break Exit::Finished(PipelineOutcome::Completed);
                    }
                    Some(TransportEvent::Error(message)) => {
                        warn!(%message, "conversation error");
                        break Exit::Finished(PipelineOutcome::Failed(
                            BardError::ConversationRuntimeError(message),
                        ));
                    }
                    None => {
                        info!("conversation transport closed");
                        break Exit::Finished(PipelineOutcome::Completed);
                    }
                },
                _ = ticker.tick() => match countdown.tick() {
                    CountdownTick::Idle => {}
                    CountdownTick::Remaining(n) => sink.countdown(Some(n)),
                    CountdownTick::Elapsed => {
                        info!("conversation idle timeout");
                        sink.countdown(None);
                        break Exit::Finished(PipelineOutcome::Completed);
                    }
                },
            }
        };

        match exit {
            Exit::Stopped => {}
            Exit::Finished(outcome) => sink.finish(outcome),
            Exit::ResumeTool(reply) => {
                sink.finish(PipelineOutcome::Completed);
                let _ = reply.send(Ok("Resuming the audiobook.".into()));
            }
        }

        self.disconnect(&mut control).await;
    }

    /// Close the session, bounded by the teardown timeout.
    async fn disconnect(&self, control: &mut Box<dyn ConversationControl>) {
        match tokio::time::timeout(self.config.teardown_timeout, control.disconnect()).await {
            Ok(Ok(())) => debug!("conversation disconnected"),
            Ok(Err(e)) => warn!("conversation disconnect failed: {e}"),
            Err(_) => warn!("conversation disconnect timed out"),
        }
    }

    /// Briefing context at `position`, degrading to position-only when the
    /// alignment cannot be fetched.
    async fn agent_context(&self, position: PlaybackPosition) -> AgentContext {
        match self.alignment_for(position.chapter_id).await {
            Ok(Some(alignment)) => {
                AgentContext::build(&alignment, position, self.config.max_context_words)
            }
            Ok(None) => AgentContext::position_only(position),
            Err(e) => {
                warn!(chapter_id = position.chapter_id, "alignment unavailable: {e}");
                AgentContext::position_only(position)
            }
        }
    }

    async fn alignment_for(&self, chapter_id: u32) -> Result<Option<Arc<Alignment>>> {
        let Some(source) = &self.alignment else {
            return Ok(None);
        };
        let cached = self
            .cache
            .lock()
            .as_ref()
            .filter(|a| a.chapter_id() == chapter_id)
            .cloned();
        if let Some(hit) = cached {
            return Ok(Some(hit));
        }
        let sentences = source.alignment(chapter_id).await?;
        let alignment = Arc::new(Alignment::new(chapter_id, sentences)?);
        *self.cache.lock() = Some(Arc::clone(&alignment));
        debug!(chapter_id, sentences = alignment.sentences().len(), "alignment cached");
        Ok(Some(alignment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::alignment::AlignmentSentence;
    use crate::pipeline::{PipelineEvent, PipelineMessage, TriggerSource};

    #[test]
    fn countdown_ticks_down_and_elapses_once() {
        let mut c = SilenceCountdown::new(3);
        assert_eq!(c.tick(), CountdownTick::Idle);
        c.start();
        assert_eq!(c.tick(), CountdownTick::Remaining(2));
        assert_eq!(c.tick(), CountdownTick::Remaining(1));
        assert_eq!(c.tick(), CountdownTick::Elapsed);
        assert_eq!(c.tick(), CountdownTick::Idle);
    }

    #[test]
    fn reset_only_applies_while_running() {
        let mut c = SilenceCountdown::new(5);
        assert!(!c.reset());
        assert_eq!(c.remaining(), None);
        c.start();
        c.tick();
        c.tick();
        assert!(c.reset());
        assert_eq!(c.remaining(), Some(5));
        c.clear();
        assert_eq!(c.tick(), CountdownTick::Idle);
    }

    #[test]
    fn sub_second_timeout_rounds_up() {
        let config = ConversationConfig {
            silence_timeout: Duration::from_millis(1_500),
            ..ConversationConfig::default()
        };
        assert_eq!(config.countdown_seconds(), 2);
    }

    // ── Scripted transport ────────────────────────────────────────────────

    #[derive(Default)]
    struct Calls {
        connects: AtomicUsize,
        contexts: Mutex<Vec<String>>,
        disconnects: AtomicUsize,
    }

    struct ScriptedControl {
        calls: Arc<Calls>,
        /// Briefing never completes.
        stall_briefing: bool,
    }

    impl ConversationControl for ScriptedControl {
        fn send_context(&mut self, text: String) -> BoxFuture<'_, Result<()>> {
            self.calls.contexts.lock().push(text);
            if self.stall_briefing {
                Box::pin(std::future::pending())
            } else {
                Box::pin(async { Ok(()) })
            }
        }

        fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
            self.calls.disconnects.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    struct ScriptedTransport {
        calls: Arc<Calls>,
        refuse: bool,
        stall_briefing: bool,
        events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    }

    impl ConversationTransport for ScriptedTransport {
        fn connect(&self, _request: ConnectRequest) -> BoxFuture<'_, Result<ConversationLink>> {
            self.calls.connects.fetch_add(1, Ordering::SeqCst);
            let events = self.events.lock().take();
            let refuse = self.refuse;
            let stall_briefing = self.stall_briefing;
            let calls = Arc::clone(&self.calls);
            Box::pin(async move {
                match (refuse, events) {
                    (false, Some(events)) => Ok(ConversationLink {
                        events,
                        control: Box::new(ScriptedControl {
                            calls,
                            stall_briefing,
                        }),
                    }),
                    _ => Err(BardError::ConversationConnectFailed("agent offline".into())),
                }
            })
        }
    }

    struct OneChapter;

    impl AlignmentSource for OneChapter {
        fn alignment(&self, _chapter_id: u32) -> BoxFuture<'_, Result<Vec<AlignmentSentence>>> {
            Box::pin(async {
                Ok(vec![AlignmentSentence {
                    sentence_id: 1,
                    sequence: 0,
                    start_time: 0.0,
                    end_time: 30.0,
                    text: "A sower went out to sow.".into(),
                }])
            })
        }
    }

    struct Session {
        pipeline: ConversationPipeline,
        calls: Arc<Calls>,
        agent: mpsc::UnboundedSender<TransportEvent>,
        rx: mpsc::UnboundedReceiver<PipelineMessage>,
    }

    fn session(timeout_secs: u64, refuse: bool) -> Session {
        session_with(timeout_secs, refuse, false)
    }

    fn session_with(timeout_secs: u64, refuse: bool, stall_briefing: bool) -> Session {
        let calls = Arc::new(Calls::default());
        let (agent, events) = mpsc::unbounded_channel();
        let transport = Arc::new(ScriptedTransport {
            calls: Arc::clone(&calls),
            refuse,
            stall_briefing,
            events: Mutex::new(Some(events)),
        });
        let config = ConversationConfig {
            silence_timeout: Duration::from_secs(timeout_secs),
            ..ConversationConfig::new("agent_test")
        };
        let mut pipeline = ConversationPipeline::new(config, transport, Some(Arc::new(OneChapter)));
        let (tx, rx) = mpsc::unbounded_channel();
        pipeline.start(
            PipelineRequest {
                trigger: TriggerSource::Manual,
                position: PlaybackPosition::new(1, 42.0),
            },
            PipelineSink::new(1, tx),
        );
        Session {
            pipeline,
            calls,
            agent,
            rx,
        }
    }

    async fn next_countdown(rx: &mut mpsc::UnboundedReceiver<PipelineMessage>) -> Option<u32> {
        loop {
            match rx.recv().await.expect("pipeline alive").event {
                PipelineEvent::Countdown(c) => return c,
                PipelineEvent::Finished(o) => panic!("finished early: {o:?}"),
                _ => {}
            }
        }
    }

    async fn finished(rx: &mut mpsc::UnboundedReceiver<PipelineMessage>) -> PipelineOutcome {
        loop {
            if let PipelineEvent::Finished(o) = rx.recv().await.expect("pipeline alive").event {
                return o;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_listening_times_out_and_disconnects() {
        let mut s = session(3, false);
        let started = Instant::now();
        assert_eq!(next_countdown(&mut s.rx).await, Some(3));
        assert_eq!(next_countdown(&mut s.rx).await, Some(2));
        assert_eq!(next_countdown(&mut s.rx).await, Some(1));
        assert!(matches!(finished(&mut s.rx).await, PipelineOutcome::Completed));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_millis(3_100));

        s.pipeline.shutdown().await;
        assert_eq!(s.calls.disconnects.load(Ordering::SeqCst), 1);
        let contexts = s.calls.contexts.lock();
        assert!(contexts[0].contains("A sower went out to sow."));
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_message_resets_the_countdown() {
        let mut s = session(3, false);
        let started = Instant::now();
        assert_eq!(next_countdown(&mut s.rx).await, Some(3));
        assert_eq!(next_countdown(&mut s.rx).await, Some(2));
        assert_eq!(next_countdown(&mut s.rx).await, Some(1));

        s.agent
            .send(TransportEvent::Message {
                source: MessageSource::User,
                text: "wait, who?".into(),
            })
            .unwrap();
        assert_eq!(next_countdown(&mut s.rx).await, Some(3));
        assert_eq!(next_countdown(&mut s.rx).await, Some(2));
        assert_eq!(next_countdown(&mut s.rx).await, Some(1));
        assert!(matches!(finished(&mut s.rx).await, PipelineOutcome::Completed));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_millis(5_100));
    }

    #[tokio::test(start_paused = true)]
    async fn speaking_suspends_the_countdown() {
        let mut s = session(2, false);
        assert_eq!(next_countdown(&mut s.rx).await, Some(2));
        s.agent
            .send(TransportEvent::ModeChanged(AgentMode::Speaking))
            .unwrap();
        assert_eq!(next_countdown(&mut s.rx).await, None);

        tokio::time::sleep(Duration::from_secs(30)).await;
        while let Ok(msg) = s.rx.try_recv() {
            assert!(!matches!(msg.event, PipelineEvent::Finished(_)));
        }

        s.agent
            .send(TransportEvent::ModeChanged(AgentMode::Listening))
            .unwrap();
        assert_eq!(next_countdown(&mut s.rx).await, Some(2));
        s.pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn resume_tool_finishes_and_acknowledges() {
        let mut s = session(10, false);
        assert_eq!(next_countdown(&mut s.rx).await, Some(10));

        let (reply, ack) = oneshot::channel();
        s.agent
            .send(TransportEvent::ToolCall(ToolCall {
                name: RESUME_TOOL.into(),
                parameters: serde_json::json!({}),
                reply,
            }))
            .unwrap();
        assert!(matches!(finished(&mut s.rx).await, PipelineOutcome::Completed));
        assert!(ack.await.unwrap().is_ok());
        s.pipeline.shutdown().await;
        assert_eq!(s.calls.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_tool_is_rejected_and_session_continues() {
        let mut s = session(10, false);
        assert_eq!(next_countdown(&mut s.rx).await, Some(10));

        let (reply, ack) = oneshot::channel();
        s.agent
            .send(TransportEvent::ToolCall(ToolCall {
                name: "skip_chapter".into(),
                parameters: serde_json::Value::Null,
                reply,
            }))
            .unwrap();
        assert!(ack.await.unwrap().is_err());
        assert_eq!(next_countdown(&mut s.rx).await, Some(9));
        s.pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn remote_error_fails_the_session() {
        let mut s = session(10, false);
        s.agent
            .send(TransportEvent::Error("socket reset".into()))
            .unwrap();
        assert!(matches!(
            finished(&mut s.rx).await,
            PipelineOutcome::Failed(BardError::ConversationRuntimeError(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_hang_up_is_a_normal_end() {
        let mut s = session(10, false);
        s.agent
            .send(TransportEvent::Disconnected { reason: None })
            .unwrap();
        assert!(matches!(finished(&mut s.rx).await, PipelineOutcome::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_is_reported() {
        let mut s = session(10, true);
        assert!(matches!(
            finished(&mut s.rx).await,
            PipelineOutcome::Failed(BardError::ConversationConnectFailed(_))
        ));
        assert_eq!(s.calls.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_disconnects_without_reporting() {
        let mut s = session(10, false);
        assert_eq!(next_countdown(&mut s.rx).await, Some(10));
        s.pipeline.shutdown().await;
        s.pipeline.shutdown().await;
        assert_eq!(s.calls.disconnects.load(Ordering::SeqCst), 1);
        while let Ok(msg) = s.rx.try_recv() {
            assert!(!matches!(msg.event, PipelineEvent::Finished(_)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_briefing_closes_the_session() {
        let mut s = session_with(10, false, true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(s.calls.connects.load(Ordering::SeqCst), 1);
        assert_eq!(s.calls.contexts.lock().len(), 1);

        s.pipeline.shutdown().await;
        assert_eq!(s.calls.disconnects.load(Ordering::SeqCst), 1);
        while let Ok(msg) = s.rx.try_recv() {
            assert!(!matches!(
                msg.event,
                PipelineEvent::Finished(_) | PipelineEvent::Countdown(_)
            ));
        }
    }
}
