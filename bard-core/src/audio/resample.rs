//! Sample-rate conversion for question clips using a rubato `FastFixedIn`
//! resampler.
//!
//! `cpal` captures at the device's native rate (commonly 44.1 or 48 kHz).
//! The transcription service only needs 16 kHz mono, so the recorder
//! converts the captured samples once, when the clip is packaged. When the
//! rates already match the converter is a passthrough and no rubato session
//! is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{BardError, Result};

/// Input frames per rubato call.
const CHUNK_SIZE: usize = 1024;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when capture rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    ratio: f64,
    /// Holds partial input chunks between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// Returns `BardError::AudioStream` if rubato fails to initialise.
    pub fn new(capture_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                ratio: 1.0,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| BardError::AudioStream(format!("resampler init: {e}")))?;
        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];

        debug!(capture_rate, target_rate, chunk_size, "clip resampler ready");

        Ok(Self {
            resampler: Some(resampler),
            ratio,
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    /// Any remainder shorter than one chunk is kept for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }
            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Flush the buffered remainder, zero-padded to a full chunk and trimmed
    /// back to its proportional output length.
    pub fn finish(&mut self) -> Vec<f32> {
        if self.resampler.is_none() || self.input_buf.is_empty() {
            return std::mem::take(&mut self.input_buf);
        }
        let remaining = self.input_buf.len();
        let wanted = (remaining as f64 * self.ratio).round() as usize;
        let pad = vec![0f32; self.chunk_size - remaining];
        let mut out = self.process(&pad);
        out.truncate(wanted);
        out
    }

    /// Returns `true` when capture rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Convert a complete recording in one pass.
pub fn resample_all(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    let mut rc = RateConverter::new(from_rate, to_rate, CHUNK_SIZE)?;
    let mut out = rc.process(samples);
    out.extend(rc.finish());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        let out = resample_all(&samples, 16_000, 16_000).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn ratio_48k_to_16k_correct_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(!rc.is_passthrough());
        let out = rc.process(&vec![0.0f32; 960]);
        assert!(!out.is_empty(), "expected non-empty output");
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "output len={} expected≈320",
            out.len()
        );
    }

    #[test]
    fn partial_chunk_is_held_until_finish() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
        let tail = rc.finish();
        assert!(
            (tail.len() as isize - 167).unsigned_abs() <= 2,
            "tail len={}",
            tail.len()
        );
    }

    #[test]
    fn whole_clip_keeps_its_duration() {
        // 1.5 s at 44.1 kHz → 1.5 s at 16 kHz.
        let out = resample_all(&vec![0.1f32; 66_150], 44_100, 16_000).unwrap();
        assert!(
            (out.len() as isize - 24_000).unsigned_abs() <= 400,
            "output len={}",
            out.len()
        );
    }
}
