//! Normalized signal level.
//!
//! ## Algorithm
//!
//! 1. Compute the RMS of the frame.
//! 2. Multiply by `gain` so ordinary speech lands well inside the range.
//! 3. Clamp to [0, 1].

/// Per-frame level meter feeding both silence detection and the level UI.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    /// Scale applied to the raw RMS before clamping. Default: `4.0`.
    gain: f32,
}

impl LevelMeter {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: gain.max(0.0),
        }
    }

    /// Compute the root-mean-square of a sample slice.
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    /// Normalized level of one frame in [0, 1].
    pub fn measure(&self, samples: &[f32]) -> f32 {
        (Self::rms(samples) * self.gain).clamp(0.0, 1.0)
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(4.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn silence_measures_zero() {
        assert_eq!(LevelMeter::default().measure(&[0.0; 160]), 0.0);
    }

    #[test]
    fn empty_frame_measures_zero() {
        assert_eq!(LevelMeter::default().measure(&[]), 0.0);
    }

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assert_relative_eq!(LevelMeter::rms(&samples), 0.5, epsilon = 1e-5);
    }

    #[test]
    fn gain_scales_the_level() {
        let meter = LevelMeter::new(4.0);
        assert_relative_eq!(meter.measure(&[0.05; 160]), 0.2, epsilon = 1e-5);
    }

    #[test]
    fn loud_frames_clamp_to_one() {
        let meter = LevelMeter::new(4.0);
        assert_eq!(meter.measure(&[0.9; 160]), 1.0);
    }
}
