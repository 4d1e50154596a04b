//! Silence-after-speech detection.
//!
//! A recording may only stop once the speaker has said something: levels at
//! or below the threshold before any speech never start the silence timer,
//! so ambient noise alone cannot end a recording.

use std::time::Duration;

/// What the sampling loop should do after observing a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceVerdict {
    Continue,
    Stop,
}

#[derive(Debug, Clone)]
pub struct SilenceDetector {
    threshold: f32,
    silence_duration: Duration,
    has_spoken: bool,
    /// Audio-clock time the current silent run began.
    silence_started: Option<Duration>,
}

impl SilenceDetector {
    pub fn new(threshold: f32, silence_duration: Duration) -> Self {
        Self {
            threshold,
            silence_duration,
            has_spoken: false,
            silence_started: None,
        }
    }

    /// Feed the level of a frame ending at audio-clock time `at`.
    pub fn observe(&mut self, level: f32, at: Duration) -> SilenceVerdict {
        if level > self.threshold {
            self.has_spoken = true;
            self.silence_started = None;
            return SilenceVerdict::Continue;
        }
        if !self.has_spoken {
            return SilenceVerdict::Continue;
        }
        let started = *self.silence_started.get_or_insert(at);
        if at.saturating_sub(started) > self.silence_duration {
            SilenceVerdict::Stop
        } else {
            SilenceVerdict::Continue
        }
    }

    pub fn has_spoken(&self) -> bool {
        self.has_spoken
    }

    pub fn silence_started(&self) -> Option<Duration> {
        self.silence_started
    }

    /// Forget any detected speech so the session ends without a clip.
    pub fn discard(&mut self) {
        self.has_spoken = false;
        self.silence_started = None;
    }
}
