//! Blocking sampling loop for one recording.
//!
//! ## Per iteration
//!
//! ```text
//! 1. Drain up to one frame from the ring buffer
//! 2. Append to the capture, measure the normalized level, publish it
//! 3. Feed the level to the SilenceDetector on the audio clock
//! 4. Stop on silence-after-speech, on the hard cap, or when `running` drops
//! ```
//!
//! The audio clock is the number of samples consumed divided by the capture
//! rate, so silence timing is independent of scheduling jitter.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    audio::resample::resample_all,
    buffering::{clip::AudioClip, AudioConsumer, Consumer},
    error::BardError,
    vad::{LevelMeter, SilenceDetector, SilenceVerdict},
};

use super::{LevelCallback, RecorderConfig, RecorderOutcome};

/// Minimum sleep when the ring is empty (avoids busy-wait burning a core).
const SLEEP_EMPTY_MS: u64 = 5;

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Silence,
    MaxDuration,
    /// `running` was cleared without cancelling (manual stop).
    Stopped,
    Cancelled,
}

/// Everything the loop needs, passed as one struct so the closure stays tidy.
pub struct SessionContext {
    pub config: RecorderConfig,
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    pub cancelled: Arc<AtomicBool>,
    pub sample_rate: u32,
    pub on_level: LevelCallback,
}

/// Run until silence, the hard cap, stop or cancel; then package the clip.
pub fn run(mut ctx: SessionContext) -> RecorderOutcome {
    let sample_rate = ctx.sample_rate.max(1);
    let frame_len = ((sample_rate as f64 * ctx.config.frame.as_secs_f64()).round() as usize).max(1);
    let mut frame = vec![0f32; frame_len];
    let mut captured: Vec<f32> = Vec::with_capacity(sample_rate as usize * 8);
    let meter = LevelMeter::new(ctx.config.level_gain);
    let mut detector =
        SilenceDetector::new(ctx.config.silence_threshold, ctx.config.silence_duration);
    let mut consumed = 0usize;

    debug!(sample_rate, frame_len, "recording session started");

    let reason = loop {
        if !ctx.running.load(Ordering::Acquire) {
            break if ctx.cancelled.load(Ordering::Acquire) {
                StopReason::Cancelled
            } else {
                StopReason::Stopped
            };
        }

        let n = ctx.consumer.pop_slice(&mut frame);
        if n == 0 {
            std::thread::sleep(Duration::from_millis(SLEEP_EMPTY_MS));
            continue;
        }

        let chunk = &frame[..n];
        captured.extend_from_slice(chunk);
        consumed += n;

        let level = meter.measure(chunk);
        (ctx.on_level)(level);

        let at = Duration::from_secs_f64(consumed as f64 / sample_rate as f64);
        if detector.observe(level, at) == SilenceVerdict::Stop {
            break StopReason::Silence;
        }
        if at >= ctx.config.max_duration {
            warn!(seconds = at.as_secs_f64(), "recording hit its hard cap");
            break StopReason::MaxDuration;
        }
    };

    ctx.running.store(false, Ordering::Release);
    (ctx.on_level)(0.0);

    // A cancel can land after the loop already stopped on its own.
    if reason == StopReason::Cancelled || ctx.cancelled.load(Ordering::Acquire) {
        detector.discard();
    }

    info!(
        ?reason,
        has_spoken = detector.has_spoken(),
        seconds = consumed as f64 / sample_rate as f64,
        "recording session ended"
    );

    if !detector.has_spoken() || captured.is_empty() {
        return RecorderOutcome::Discarded;
    }

    let packaged = package(captured, sample_rate, ctx.config.target_sample_rate);
    if ctx.cancelled.load(Ordering::Acquire) {
        return RecorderOutcome::Discarded;
    }
    match packaged {
        Ok(clip) if !clip.is_empty() => RecorderOutcome::Finished(clip),
        Ok(_) => RecorderOutcome::Discarded,
        Err(e) => RecorderOutcome::Failed(e),
    }
}

fn package(samples: Vec<f32>, from_rate: u32, to_rate: u32) -> Result<AudioClip, BardError> {
    if from_rate == to_rate {
        return Ok(AudioClip::new(samples, from_rate));
    }
    let converted = resample_all(&samples, from_rate, to_rate)?;
    Ok(AudioClip::new(converted, to_rate))
}
