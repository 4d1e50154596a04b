//! Staged record → transcribe → ask → speak pipeline.
//!
//! ```text
//! Listening ──clip──► Transcribing ──text──► [Previewing n..1] ──► Thinking
//!     ──answer──► Answering ──playback ends / text hold──► Completed
//! ```
//!
//! Every step is awaited in sequence inside one task; any failure finishes
//! the run with that error. No step is retried.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    InteractionPipeline, PipelineKind, PipelineOutcome, PipelineRequest, PipelineSink,
};
use crate::{
    error::{BardError, Result},
    ipc::events::InteractionState,
    recorder::{Recorder, RecorderOutcome, RecordingControl},
    services::{AnswerPlayer, AskRequest, BoxFuture, QuestionService, Transcriber},
};

#[derive(Debug, Clone)]
pub struct LegacyConfig {
    /// Seconds the transcript is shown before it is submitted. 0 submits
    /// immediately. Default: 0.
    pub preview_seconds: u32,
    /// How long the answer text stays up when there is no playable audio.
    /// Default: 8 s.
    pub answer_text_hold: Duration,
    /// Upper bound on waiting for the microphone to be released at teardown.
    /// Default: 2 s.
    pub release_timeout: Duration,
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            preview_seconds: 0,
            answer_text_hold: Duration::from_secs(8),
            release_timeout: Duration::from_secs(2),
        }
    }
}

/// Collaborators shared by every run.
#[derive(Clone)]
struct LegacyContext {
    config: LegacyConfig,
    recorder: Recorder,
    transcriber: Arc<dyn Transcriber>,
    questions: Arc<dyn QuestionService>,
    player: Arc<dyn AnswerPlayer>,
    recording: Arc<Mutex<Option<RecordingControl>>>,
}

pub struct LegacyPipeline {
    ctx: LegacyContext,
    task: Option<JoinHandle<()>>,
}

impl LegacyPipeline {
    pub fn new(
        config: LegacyConfig,
        recorder: Recorder,
        transcriber: Arc<dyn Transcriber>,
        questions: Arc<dyn QuestionService>,
        player: Arc<dyn AnswerPlayer>,
    ) -> Self {
        Self {
            ctx: LegacyContext {
                config,
                recorder,
                transcriber,
                questions,
                player,
                recording: Arc::new(Mutex::new(None)),
            },
            task: None,
        }
    }
}

impl InteractionPipeline for LegacyPipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::Legacy
    }

    fn initial_state(&self) -> InteractionState {
        InteractionState::Listening
    }

    fn start(&mut self, request: PipelineRequest, sink: PipelineSink) {
        if let Some(stale) = self.task.take() {
            stale.abort();
        }
        let ctx = self.ctx.clone();
        info!(
            epoch = sink.epoch(),
            trigger = ?request.trigger,
            chapter_id = request.position.chapter_id,
            audio_time = request.position.audio_time,
            "legacy interaction started"
        );
        self.task = Some(tokio::spawn(async move {
            let outcome = match ctx.interact(request, &sink).await {
                Ok(()) => PipelineOutcome::Completed,
                Err(e) => PipelineOutcome::Failed(e),
            };
            ctx.recording.lock().take();
            sink.finish(outcome);
        }));
    }

    fn shutdown(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let first = self.ctx.recording.lock().take();
            if let Some(control) = &first {
                control.cancel();
            }
            if let Some(task) = self.task.take() {
                task.abort();
                let _ = task.await;
            }
            // The task may have stored a control after the first take.
            let late = self.ctx.recording.lock().take();
            for control in first.into_iter().chain(late) {
                control.cancel();
                if tokio::time::timeout(self.ctx.config.release_timeout, control.released())
                    .await
                    .is_err()
                {
                    warn!("microphone was not released within the teardown timeout");
                }
            }
            self.ctx.player.stop();
            debug!("legacy pipeline shut down");
        })
    }
}

impl LegacyContext {
    async fn interact(&self, request: PipelineRequest, sink: &PipelineSink) -> Result<()> {
        // ── Record ───────────────────────────────────────────────────────
        let level_sink = sink.clone();
        let mut handle = self
            .recorder
            .begin(Box::new(move |level| level_sink.level(level)));
        *self.recording.lock() = Some(handle.control());
        handle.opened().await?;

        let clip = match handle.outcome().await {
            RecorderOutcome::Finished(clip) => clip,
            RecorderOutcome::Discarded => return Err(BardError::NoSpeechDetected),
            RecorderOutcome::Failed(e) => return Err(e),
        };
        self.recording.lock().take();
        debug!(seconds = clip.duration_secs(), "question recorded");

        // ── Transcribe ───────────────────────────────────────────────────
        sink.stage(InteractionState::Transcribing);
        let transcript = self
            .transcriber
            .transcribe(clip)
            .await
            .map_err(|e| match e {
                BardError::TranscriptionFailed(_) => e,
                other => BardError::TranscriptionFailed(other.to_string()),
            })?;
        if transcript.is_blank() {
            return Err(BardError::NoSpeechDetected);
        }
        let question = transcript.text.trim().to_string();
        info!(question = %question, "question transcribed");

        // ── Preview ──────────────────────────────────────────────────────
        for seconds_left in (1..=self.config.preview_seconds).rev() {
            sink.stage(InteractionState::Previewing {
                transcript: question.clone(),
                seconds_left,
            });
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        // ── Ask ──────────────────────────────────────────────────────────
        sink.stage(InteractionState::Thinking {
            transcript: question.clone(),
        });
        let answer = self
            .questions
            .ask(AskRequest {
                question,
                chapter_id: request.position.chapter_id,
                audio_time: request.position.audio_time,
            })
            .await
            .map_err(|e| match e {
                BardError::AnswerServiceFailed(_) => e,
                other => BardError::AnswerServiceFailed(other.to_string()),
            })?;

        // ── Speak ────────────────────────────────────────────────────────
        sink.stage(InteractionState::Answering {
            answer_text: answer.answer_text.clone(),
            audio_ref: answer.audio_ref.clone(),
        });
        match answer.audio_ref.as_deref() {
            Some(audio_ref) => {
                if let Err(e) = self.player.play(audio_ref).await {
                    let e = match e {
                        BardError::PlaybackBlocked(_) => e,
                        other => BardError::PlaybackBlocked(other.to_string()),
                    };
                    warn!("answer playback failed: {e}");
                    sink.notice(e);
                    tokio::time::sleep(self.config.answer_text_hold).await;
                }
            }
            None => tokio::time::sleep(self.config.answer_text_hold).await,
        }
        info!("answer delivered");
        Ok(())
    }
}
