//! Voice-activity detection for question recording.
//!
//! Two small pieces, both pure and clock-free so they can be driven by the
//! sampling loop or by tests alike:
//!
//! - [`LevelMeter`] turns a frame of samples into a normalized level in [0, 1].
//! - [`SilenceDetector`] decides, from successive levels and the audio clock,
//!   when the speaker has gone quiet for long enough to stop recording.

pub mod level;
pub mod silence;

pub use level::LevelMeter;
pub use silence::{SilenceDetector, SilenceVerdict};
