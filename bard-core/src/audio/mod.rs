//! Microphone capture.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate on the hot path, block, or perform I/O. Captured
//! frames are down-mixed to mono and written into an SPSC ring buffer producer
//! whose `push_slice` is lock-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). [`Microphone::open`] is therefore called on the recorder's blocking
//! thread, and the returned [`OpenInput`] is dropped on that same thread,
//! which is what releases the device.

pub mod resample;

use std::any::Any;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, StreamConfig,
};
use tracing::{error, info, warn};

use crate::{
    buffering::{AudioProducer, Producer},
    error::{BardError, Result},
};

/// An opened input. Dropping it releases the device.
///
/// **Not `Send`**: create and drop it on the same OS thread.
pub struct OpenInput {
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
    _guard: Box<dyn Any>,
}

impl OpenInput {
    /// Wrap whatever keeps the device open (a stream handle, a test probe).
    pub fn new(sample_rate: u32, guard: Box<dyn Any>) -> Self {
        Self {
            sample_rate,
            _guard: guard,
        }
    }
}

/// Source of question audio.
pub trait Microphone: Send + Sync + 'static {
    /// Acquire the input device and start pushing mono f32 samples into
    /// `producer` while `running` is set.
    ///
    /// # Errors
    /// `DeviceDenied`, `DeviceNotFound` or `DeviceBusy` when acquisition fails.
    fn open(&self, producer: AudioProducer, running: Arc<AtomicBool>) -> Result<OpenInput>;
}

/// Map a backend error message onto the device-acquisition taxonomy.
pub fn classify_device_error(message: &str) -> BardError {
    let lowered = message.to_ascii_lowercase();
    const DENIED: &[&str] = &["permission", "denied", "not permitted", "not authorized"];
    const NOT_FOUND: &[&str] = &["not found", "no such", "no device", "not available", "no default"];

    if DENIED.iter().any(|k| lowered.contains(k)) {
        BardError::DeviceDenied
    } else if NOT_FOUND.iter().any(|k| lowered.contains(k)) {
        BardError::DeviceNotFound
    } else {
        BardError::DeviceBusy(message.to_string())
    }
}

/// The system microphone via cpal.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    preferred_device: Option<String>,
}

impl CpalMicrophone {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

/// Names of the available input devices.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            warn!("failed to enumerate input devices: {e}");
            vec![]
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<String> {
    vec![]
}

/// Average interleaved frames down to mono.
fn downmix_into<T: Copy>(data: &[T], channels: usize, out: &mut Vec<f32>, to_f32: impl Fn(T) -> f32) {
    let frames = data.len() / channels.max(1);
    out.resize(frames, 0.0);
    for (f, slot) in out.iter_mut().enumerate() {
        let base = f * channels;
        let sum: f32 = data[base..base + channels].iter().map(|s| to_f32(*s)).sum();
        *slot = sum / channels as f32;
    }
}

#[cfg(feature = "audio-cpal")]
impl Microphone for CpalMicrophone {
    fn open(&self, mut producer: AudioProducer, running: Arc<AtomicBool>) -> Result<OpenInput> {
        let host = cpal::default_host();

        let preferred = self.preferred_device.as_deref().and_then(|wanted| {
            let found = host
                .input_devices()
                .ok()?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false));
            if found.is_none() {
                warn!("preferred input device '{wanted}' not found, falling back");
            }
            found
        });
        let device = match preferred {
            Some(d) => d,
            None => host.default_input_device().ok_or(BardError::DeviceNotFound)?,
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| classify_device_error(&e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let mut mix_buf: Vec<f32> = Vec::new();
        let mut push = move |mono: &[f32]| {
            let written = producer.push_slice(mono);
            if written < mono.len() {
                warn!("ring buffer full: dropped {} frames", mono.len() - written);
            }
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    if channels == 1 {
                        push(data);
                    } else {
                        downmix_into(data, channels, &mut mix_buf, |s| s);
                        push(&mix_buf);
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    downmix_into(data, channels, &mut mix_buf, |s| s as f32 / 32768.0);
                    push(&mix_buf);
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),
            SampleFormat::U8 => device.build_input_stream(
                &config,
                move |data: &[u8], _info| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    downmix_into(data, channels, &mut mix_buf, |s| (s as f32 - 128.0) / 128.0);
                    push(&mix_buf);
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),
            fmt => {
                return Err(BardError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| classify_device_error(&e.to_string()))?;

        stream
            .play()
            .map_err(|e| classify_device_error(&e.to_string()))?;

        info!(sample_rate, channels, "microphone open");
        Ok(OpenInput::new(sample_rate, Box::new(stream)))
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl Microphone for CpalMicrophone {
    fn open(&self, _producer: AudioProducer, _running: Arc<AtomicBool>) -> Result<OpenInput> {
        Err(BardError::DeviceNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_permission_errors_as_denied() {
        assert!(matches!(
            classify_device_error("Permission denied (os error 13)"),
            BardError::DeviceDenied
        ));
    }

    #[test]
    fn classifies_missing_devices_as_not_found() {
        assert!(matches!(
            classify_device_error("The requested device is no longer available."),
            BardError::DeviceNotFound
        ));
    }

    #[test]
    fn anything_else_is_busy() {
        assert!(matches!(
            classify_device_error("Device or resource busy"),
            BardError::DeviceBusy(_)
        ));
    }

    #[test]
    fn downmix_averages_channels() {
        let mut out = Vec::new();
        downmix_into(&[0.5f32, -0.5, 1.0, 0.0], 2, &mut out, |s| s);
        assert_eq!(out, vec![0.0, 0.5]);
    }

    #[test]
    fn downmix_converts_i16() {
        let mut out = Vec::new();
        downmix_into(&[16384i16, 16384], 1, &mut out, |s| s as f32 / 32768.0);
        assert_eq!(out, vec![0.5, 0.5]);
    }
}
