//! Voice-activity recorder.
//!
//! ## Lifecycle
//!
//! ```text
//! Recorder::start()        → device opened on a blocking thread, session loop running
//!     ├─► silence after speech / hard cap → Finished(clip) | Discarded
//!     ├─► RecordingHandle::stop()          → Finished(clip) if speech was heard
//!     └─► RecordingHandle::cancel() / drop → Discarded, never a clip
//! ```
//!
//! The input device is opened and released on the same blocking thread
//! (`cpal::Stream` is `!Send`). A oneshot channel propagates open errors back
//! to `start()`, and [`RecordingControl::released`] resolves once the device
//! has actually been dropped.

pub mod session;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

use crate::{
    audio::Microphone,
    buffering::{clip::AudioClip, create_audio_ring},
    error::{BardError, Result},
};

/// Receives the normalized level of every analysed frame.
pub type LevelCallback = Box<dyn FnMut(f32) + Send>;

/// Recorder tuning.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Normalized level above which a frame counts as speech. Default: 0.08.
    pub silence_threshold: f32,
    /// Silence after speech that ends the recording. Default: 1.5 s.
    pub silence_duration: Duration,
    /// Analysis frame length. Default: 16 ms (one display frame).
    pub frame: Duration,
    /// Hard cap on a single recording. Default: 30 s.
    pub max_duration: Duration,
    /// Gain applied to frame RMS before clamping to [0, 1]. Default: 4.0.
    pub level_gain: f32,
    /// Sample rate of packaged clips. Default: 16 000 Hz.
    pub target_sample_rate: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.08,
            silence_duration: Duration::from_millis(1_500),
            frame: Duration::from_millis(16),
            max_duration: Duration::from_secs(30),
            level_gain: 4.0,
            target_sample_rate: 16_000,
        }
    }
}

/// How a recording ended.
#[derive(Debug)]
pub enum RecorderOutcome {
    /// Speech was heard and a non-empty clip was captured.
    Finished(AudioClip),
    /// No speech, empty capture, or cancelled. No clip is delivered.
    Discarded,
    Failed(BardError),
}

/// Cloneable control over a live recording.
#[derive(Debug, Clone)]
pub struct RecordingControl {
    running: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    released: watch::Receiver<bool>,
}

impl RecordingControl {
    /// End the recording, delivering a clip if speech was heard.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// End the recording and throw the capture away.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Resolves once the input device has been dropped.
    pub async fn released(&self) {
        let mut rx = self.released.clone();
        // The sender is dropped with the thread, which also means released.
        let _ = rx.wait_for(|released| *released).await;
    }
}

/// A live recording. Dropping the handle cancels it.
#[derive(Debug)]
pub struct RecordingHandle {
    control: RecordingControl,
    opened: Option<oneshot::Receiver<Result<u32>>>,
    outcome: Option<oneshot::Receiver<RecorderOutcome>>,
}

impl RecordingHandle {
    pub fn control(&self) -> RecordingControl {
        self.control.clone()
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Wait for the device to open, returning the capture sample rate.
    ///
    /// Only the first call observes the open result; later calls return
    /// `Ok(0)`.
    pub async fn opened(&mut self) -> Result<u32> {
        let Some(rx) = self.opened.take() else {
            return Ok(0);
        };
        match rx.await {
            Ok(Ok(rate)) => {
                info!(sample_rate = rate, "recording started");
                Ok(rate)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.control.cancel();
                Err(BardError::Other(anyhow::anyhow!(
                    "recorder task died before opening the device"
                )))
            }
        }
    }

    /// Wait for the recording to end.
    pub async fn outcome(&mut self) -> RecorderOutcome {
        let Some(rx) = self.outcome.take() else {
            return RecorderOutcome::Discarded;
        };
        rx.await.unwrap_or_else(|_| {
            RecorderOutcome::Failed(BardError::AudioStream("recorder thread died".into()))
        })
    }
}

impl Drop for RecordingHandle {
    fn drop(&mut self) {
        if self.control.is_running() {
            debug!("recording handle dropped while live, cancelling");
            self.control.cancel();
        }
    }
}

/// Starts recordings from a [`Microphone`].
#[derive(Clone)]
pub struct Recorder {
    config: RecorderConfig,
    microphone: Arc<dyn Microphone>,
}

impl Recorder {
    pub fn new(config: RecorderConfig, microphone: Arc<dyn Microphone>) -> Self {
        Self { config, microphone }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Acquire the microphone and start a recording session.
    ///
    /// Resolves once the device is confirmed open (or failed to open). The
    /// session keeps running on a blocking thread.
    ///
    /// # Errors
    /// `DeviceDenied`, `DeviceNotFound` or `DeviceBusy` from the microphone.
    pub async fn start(&self, on_level: LevelCallback) -> Result<RecordingHandle> {
        let mut handle = self.begin(on_level);
        handle.opened().await?;
        Ok(handle)
    }

    /// Spawn the recording thread without waiting for the device.
    ///
    /// The returned handle already controls the session, so a caller that is
    /// torn down while the device is still opening can cancel it and await
    /// its release. Call [`RecordingHandle::opened`] to learn the open result.
    pub fn begin(&self, on_level: LevelCallback) -> RecordingHandle {
        let (producer, consumer) = create_audio_ring();
        let running = Arc::new(AtomicBool::new(true));
        let cancelled = Arc::new(AtomicBool::new(false));
        let (released_tx, released_rx) = watch::channel(false);
        let (open_tx, open_rx) = oneshot::channel::<Result<u32>>();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let microphone = Arc::clone(&self.microphone);
        let config = self.config.clone();
        let thread_running = Arc::clone(&running);
        let thread_cancelled = Arc::clone(&cancelled);

        tokio::task::spawn_blocking(move || {
            if !thread_running.load(Ordering::Acquire) {
                let _ = open_tx.send(Err(BardError::AudioStream(
                    "recording cancelled before the device opened".into(),
                )));
                let _ = released_tx.send(true);
                return;
            }

            // ── Open device (must happen on THIS thread) ──────────────────
            let input = match microphone.open(producer, Arc::clone(&thread_running)) {
                Ok(input) => {
                    let _ = open_tx.send(Ok(input.sample_rate));
                    input
                }
                Err(e) => {
                    thread_running.store(false, Ordering::Release);
                    let _ = open_tx.send(Err(e));
                    let _ = released_tx.send(true);
                    return;
                }
            };

            let outcome = session::run(session::SessionContext {
                config,
                consumer,
                running: thread_running,
                cancelled: thread_cancelled,
                sample_rate: input.sample_rate,
                on_level,
            });

            // Stream drops here, releasing the device on this thread.
            drop(input);
            let _ = released_tx.send(true);
            let _ = outcome_tx.send(outcome);
        });

        RecordingHandle {
            control: RecordingControl {
                running,
                cancelled,
                released: released_rx,
            },
            opened: Some(open_rx),
            outcome: Some(outcome_rx),
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OpenInput;
    use crate::buffering::{AudioProducer, Producer};
    use parking_lot::Mutex;

    struct ScriptedMic {
        samples: Vec<f32>,
        fail: Option<fn() -> BardError>,
        opened: Arc<Mutex<u32>>,
        released: Arc<Mutex<u32>>,
    }

    struct Probe(Arc<Mutex<u32>>);

    impl Drop for Probe {
        fn drop(&mut self) {
            *self.0.lock() += 1;
        }
    }

    impl Microphone for ScriptedMic {
        fn open(&self, mut producer: AudioProducer, _running: Arc<AtomicBool>) -> Result<OpenInput> {
            if let Some(fail) = self.fail {
                return Err(fail());
            }
            *self.opened.lock() += 1;
            producer.push_slice(&self.samples);
            Ok(OpenInput::new(16_000, Box::new(Probe(Arc::clone(&self.released)))))
        }
    }

    fn mic(samples: Vec<f32>) -> (Arc<ScriptedMic>, Arc<Mutex<u32>>, Arc<Mutex<u32>>) {
        let opened = Arc::new(Mutex::new(0));
        let released = Arc::new(Mutex::new(0));
        let mic = Arc::new(ScriptedMic {
            samples,
            fail: None,
            opened: Arc::clone(&opened),
            released: Arc::clone(&released),
        });
        (mic, opened, released)
    }

    #[tokio::test]
    async fn open_failure_is_reported_by_start() {
        let mic = Arc::new(ScriptedMic {
            samples: vec![],
            fail: Some(|| BardError::DeviceDenied),
            opened: Arc::new(Mutex::new(0)),
            released: Arc::new(Mutex::new(0)),
        });
        let recorder = Recorder::new(RecorderConfig::default(), mic);
        let err = recorder.start(Box::new(|_| {})).await.expect_err("denied");
        assert!(matches!(err, BardError::DeviceDenied));
    }

    #[tokio::test]
    async fn finished_recording_releases_the_device() {
        let mut samples = vec![0.3f32; 32_000];
        samples.extend(vec![0.0f32; 32_000]);
        let (mic, opened, released) = mic(samples);
        let recorder = Recorder::new(RecorderConfig::default(), mic);

        let mut handle = recorder.start(Box::new(|_| {})).await.expect("start");
        assert!(matches!(handle.outcome().await, RecorderOutcome::Finished(_)));
        handle.control().released().await;
        assert_eq!(*opened.lock(), 1);
        assert_eq!(*released.lock(), 1);
    }

    #[tokio::test]
    async fn repeated_cancels_do_not_leak_devices() {
        let (mic, opened, released) = mic(vec![0.3f32; 16_000]);
        let recorder = Recorder::new(RecorderConfig::default(), mic);

        for _ in 0..3 {
            let mut handle = recorder.start(Box::new(|_| {})).await.expect("start");
            handle.cancel();
            handle.cancel();
            assert!(matches!(handle.outcome().await, RecorderOutcome::Discarded));
            handle.control().released().await;
        }
        assert_eq!(*opened.lock(), 3);
        assert_eq!(*released.lock(), 3);
    }

    #[tokio::test]
    async fn handle_from_begin_can_cancel_before_open_completes() {
        let (mic, _, released) = mic(vec![0.3f32; 16_000]);
        let recorder = Recorder::new(RecorderConfig::default(), mic);
        let handle = recorder.begin(Box::new(|_| {}));
        let control = handle.control();
        control.cancel();
        control.released().await;
        drop(handle);
        assert!(*released.lock() <= 1);
    }

    #[tokio::test]
    async fn dropping_the_handle_cancels() {
        let (mic, _, released) = mic(vec![0.3f32; 16_000]);
        let recorder = Recorder::new(RecorderConfig::default(), mic);
        let handle = recorder.start(Box::new(|_| {})).await.expect("start");
        let control = handle.control();
        drop(handle);
        control.released().await;
        assert!(!control.is_running());
        assert_eq!(*released.lock(), 1);
    }
}
