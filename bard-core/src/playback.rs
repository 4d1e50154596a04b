//! Narration playback bookkeeping.
//!
//! The orchestrator snapshots the narration position into a
//! [`PlaybackTracker`] when an interaction begins and restores exactly that
//! snapshot when it ends. [`Narration`] is the seam to whatever actually plays
//! the chapter audio; [`NarrationClock`] is a software implementation that
//! advances with wall-clock time.

use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BardError, Result};

/// Chapter and offset into that chapter's narration audio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackPosition {
    pub chapter_id: u32,
    /// Seconds from the start of the chapter audio.
    pub audio_time: f64,
}

impl PlaybackPosition {
    pub fn new(chapter_id: u32, audio_time: f64) -> Self {
        Self {
            chapter_id,
            audio_time: audio_time.max(0.0),
        }
    }
}

/// The narration player as seen by the orchestrator.
///
/// Implementations must be cheap and non-blocking: they are called from the
/// orchestrator task between events.
pub trait Narration: Send + Sync + 'static {
    /// Current chapter and playback offset.
    fn position(&self) -> PlaybackPosition;

    /// Whether narration audio is currently audible.
    fn is_playing(&self) -> bool;

    /// Pause narration, keeping the current offset.
    fn pause(&self);

    /// Seek to `position` and start playing.
    fn resume_at(&self, position: PlaybackPosition) -> Result<()>;
}

/// Holds the position captured at the most recent pause.
#[derive(Debug, Default)]
pub struct PlaybackTracker {
    snapshot: Option<PlaybackPosition>,
}

impl PlaybackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the position narration was paused at, replacing any older one.
    pub fn capture(&mut self, position: PlaybackPosition) {
        debug!(
            chapter_id = position.chapter_id,
            audio_time = position.audio_time,
            "playback position captured"
        );
        self.snapshot = Some(position);
    }

    /// Take the captured position for resumption. Returns `None` when nothing
    /// has been captured since the last restore.
    pub fn restore(&mut self) -> Option<PlaybackPosition> {
        self.snapshot.take()
    }

    pub fn snapshot(&self) -> Option<PlaybackPosition> {
        self.snapshot
    }
}

#[derive(Debug)]
struct ClockState {
    chapter_id: u32,
    /// Offset at `started_at`, or the frozen offset while paused.
    base_time: f64,
    started_at: Option<Instant>,
    duration: Option<f64>,
}

/// Software narration clock.
///
/// Tracks a chapter offset that advances in real time while "playing". Used
/// by hosts that render narration elsewhere and only need the bookkeeping.
#[derive(Debug)]
pub struct NarrationClock {
    state: Mutex<ClockState>,
}

impl NarrationClock {
    pub fn new(chapter_id: u32) -> Self {
        Self {
            state: Mutex::new(ClockState {
                chapter_id,
                base_time: 0.0,
                started_at: None,
                duration: None,
            }),
        }
    }

    /// Load a chapter, paused at `audio_time`.
    pub fn load(&self, chapter_id: u32, audio_time: f64, duration: Option<f64>) {
        let mut state = self.state.lock();
        state.chapter_id = chapter_id;
        state.base_time = audio_time.max(0.0);
        state.started_at = None;
        state.duration = duration;
    }

    pub fn play(&self) {
        let mut state = self.state.lock();
        if state.started_at.is_none() {
            state.started_at = Some(Instant::now());
        }
    }

    fn current_time(state: &ClockState) -> f64 {
        let elapsed = state
            .started_at
            .map(|at| at.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let t = state.base_time + elapsed;
        match state.duration {
            Some(d) => t.min(d),
            None => t,
        }
    }
}

impl Narration for NarrationClock {
    fn position(&self) -> PlaybackPosition {
        let state = self.state.lock();
        PlaybackPosition::new(state.chapter_id, Self::current_time(&state))
    }

    fn is_playing(&self) -> bool {
        let state = self.state.lock();
        match (state.started_at, state.duration) {
            (None, _) => false,
            (Some(_), Some(d)) => Self::current_time(&state) < d,
            (Some(_), None) => true,
        }
    }

    fn pause(&self) {
        let mut state = self.state.lock();
        state.base_time = Self::current_time(&state);
        state.started_at = None;
    }

    fn resume_at(&self, position: PlaybackPosition) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(d) = state.duration {
            if state.chapter_id == position.chapter_id && position.audio_time > d {
                return Err(BardError::Narration(format!(
                    "offset {:.2}s is past the end of chapter {} ({d:.2}s)",
                    position.audio_time, position.chapter_id
                )));
            }
        }
        state.chapter_id = position.chapter_id;
        state.base_time = position.audio_time;
        state.started_at = Some(Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_returns_the_captured_position_once() {
        let mut tracker = PlaybackTracker::new();
        tracker.capture(PlaybackPosition::new(3, 42.0));
        assert_eq!(tracker.restore(), Some(PlaybackPosition::new(3, 42.0)));
        assert_eq!(tracker.restore(), None);
    }

    #[test]
    fn latest_capture_wins() {
        let mut tracker = PlaybackTracker::new();
        tracker.capture(PlaybackPosition::new(1, 10.0));
        tracker.capture(PlaybackPosition::new(1, 12.5));
        assert_eq!(tracker.restore(), Some(PlaybackPosition::new(1, 12.5)));
    }

    #[test]
    fn negative_offsets_are_clamped() {
        assert_eq!(PlaybackPosition::new(1, -3.0).audio_time, 0.0);
    }

    #[test]
    fn paused_clock_does_not_advance() {
        let clock = NarrationClock::new(1);
        clock.load(2, 42.0, None);
        assert!(!clock.is_playing());
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(clock.position(), PlaybackPosition::new(2, 42.0));
    }

    #[test]
    fn pause_freezes_the_advanced_offset() {
        let clock = NarrationClock::new(1);
        clock.play();
        std::thread::sleep(std::time::Duration::from_millis(20));
        clock.pause();
        let frozen = clock.position();
        assert!(frozen.audio_time > 0.0);
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(clock.position(), frozen);
        assert!(!clock.is_playing());
    }

    #[test]
    fn resume_at_seeks_and_plays() {
        let clock = NarrationClock::new(1);
        clock
            .resume_at(PlaybackPosition::new(4, 42.0))
            .expect("resume");
        assert!(clock.is_playing());
        let pos = clock.position();
        assert_eq!(pos.chapter_id, 4);
        assert!(pos.audio_time >= 42.0);
    }

    #[test]
    fn resume_past_chapter_end_is_rejected() {
        let clock = NarrationClock::new(1);
        clock.load(1, 0.0, Some(30.0));
        let err = clock
            .resume_at(PlaybackPosition::new(1, 31.0))
            .expect_err("past end");
        assert!(matches!(err, BardError::Narration(_)));
    }
}
