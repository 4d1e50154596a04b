//! Answer playback for the headless host.
//!
//! The host has no audio output of its own: it downloads the answer audio
//! and holds for its encoded duration, so the orchestrator's timing (and the
//! mutual exclusion with narration) is the same as with a real speaker.

use std::time::Duration;

use bard_core::error::Result;
use bard_core::services::{AnswerPlayer, BoxFuture};
use bard_core::{BardError, HttpBackend};
use tokio::sync::watch;
use tracing::{debug, info};

/// Bitrate the service encodes answers at (MP3, 128 kbit/s).
const ANSWER_BITRATE_BPS: f64 = 128_000.0;

pub struct ClockedAnswerPlayer {
    backend: HttpBackend,
    stop_tx: watch::Sender<u64>,
}

impl ClockedAnswerPlayer {
    pub fn new(backend: HttpBackend) -> Self {
        let (stop_tx, _) = watch::channel(0);
        Self { backend, stop_tx }
    }
}

/// Playback length of `bytes` of constant-bitrate audio.
pub fn estimated_duration(bytes: usize) -> Duration {
    Duration::from_secs_f64(bytes as f64 * 8.0 / ANSWER_BITRATE_BPS)
}

impl AnswerPlayer for ClockedAnswerPlayer {
    fn play(&self, audio_ref: &str) -> BoxFuture<'_, Result<()>> {
        let audio_ref = audio_ref.to_string();
        let mut stopped = self.stop_tx.subscribe();
        Box::pin(async move {
            let playback = async {
                let audio = self.backend.answer_audio(&audio_ref).await?;
                let duration = estimated_duration(audio.len());
                info!(
                    bytes = audio.len(),
                    seconds = duration.as_secs_f64(),
                    "playing answer"
                );
                tokio::time::sleep(duration).await;
                Ok::<_, BardError>(())
            };
            tokio::select! {
                result = playback => result,
                _ = stopped.changed() => {
                    debug!("answer playback stopped");
                    Ok(())
                }
            }
        })
    }

    fn stop(&self) {
        self.stop_tx.send_modify(|generation| *generation += 1);
    }
}
