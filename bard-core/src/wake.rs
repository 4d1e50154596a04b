//! Wake-word gating.
//!
//! The acoustic detector is external: it is loaded once with a channel to
//! push detections into, then switched on and off. The gate decides when it
//! may listen (narration playing and no interaction in progress) and filters
//! detections so each one can start at most one interaction.

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{BardError, Result};

/// One "wake word heard" event from the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct WakeWordDetection {
    pub keyword: String,
    pub score: Option<f32>,
    /// When the detector heard it.
    pub heard_at: Instant,
}

impl WakeWordDetection {
    /// A detection heard just now.
    pub fn new(keyword: impl Into<String>, score: Option<f32>) -> Self {
        Self {
            keyword: keyword.into(),
            score,
            heard_at: Instant::now(),
        }
    }
}

pub type DetectionSender = mpsc::UnboundedSender<WakeWordDetection>;

/// Contract for wake-word detector backends.
pub trait WakeWordDetector: Send + 'static {
    /// One-time initialisation; detections are pushed into `detections`.
    fn load(&mut self, detections: DetectionSender) -> Result<()>;

    /// Start or stop listening. Called repeatedly after a successful `load`.
    fn set_listening(&mut self, listening: bool) -> Result<()>;
}

/// Owns the detector and its enabled flag.
pub struct WakeWordGate {
    detector: Option<Box<dyn WakeWordDetector>>,
    loaded: bool,
    enabled: bool,
    /// When listening last started. Older detections were queued while the
    /// gate was closed.
    opened_at: Option<Instant>,
}

impl WakeWordGate {
    pub fn new(detector: Option<Box<dyn WakeWordDetector>>) -> Self {
        Self {
            detector,
            loaded: false,
            enabled: false,
            opened_at: None,
        }
    }

    /// Load the detector. Failure leaves the gate permanently disabled.
    pub fn load(&mut self, detections: DetectionSender) -> Result<()> {
        let Some(detector) = self.detector.as_mut() else {
            return Ok(());
        };
        match detector.load(detections) {
            Ok(()) => {
                self.loaded = true;
                info!("wake word detector loaded");
                Ok(())
            }
            Err(e) => {
                warn!("wake word detector failed to load: {e}");
                self.detector = None;
                Err(BardError::WakeWord(e.to_string()))
            }
        }
    }

    /// Enable or disable listening. Idempotent.
    ///
    /// A detector error disables the gate and is returned for display; it
    /// never affects narration.
    pub fn configure(&mut self, enabled: bool) -> Result<()> {
        if enabled == self.enabled {
            return Ok(());
        }
        let Some(detector) = self.detector.as_mut().filter(|_| self.loaded) else {
            self.enabled = false;
            return Ok(());
        };
        match detector.set_listening(enabled) {
            Ok(()) => {
                self.enabled = enabled;
                if enabled {
                    self.opened_at = Some(Instant::now());
                }
                debug!(enabled, "wake word gate configured");
                Ok(())
            }
            Err(e) => {
                warn!(enabled, "wake word detector error: {e}");
                self.enabled = false;
                Err(BardError::WakeWord(e.to_string()))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_available(&self) -> bool {
        self.detector.is_some() && self.loaded
    }

    /// Accept a detection if the gate is open, closing it immediately so
    /// the same utterance cannot fire twice.
    pub fn accept(&mut self, detection: &WakeWordDetection) -> bool {
        if !self.enabled {
            debug!(keyword = %detection.keyword, "wake word ignored while gate is closed");
            return false;
        }
        if self.opened_at.is_some_and(|opened| detection.heard_at < opened) {
            debug!(keyword = %detection.keyword, "stale wake word dropped");
            return false;
        }
        if let Err(e) = self.configure(false) {
            warn!("failed to close wake word gate after detection: {e}");
            self.enabled = false;
        }
        info!(keyword = %detection.keyword, score = ?detection.score, "wake word accepted");
        true
    }
}

impl std::fmt::Debug for WakeWordGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeWordGate")
            .field("loaded", &self.loaded)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Detector driven by an external source (a sidecar process, a test, a
/// keyboard shortcut) through [`ChannelWakeWord::trigger`].
#[derive(Debug, Default)]
pub struct ChannelWakeWord {
    shared: std::sync::Arc<parking_lot::Mutex<ChannelState>>,
}

#[derive(Debug, Default)]
struct ChannelState {
    sender: Option<DetectionSender>,
    listening: bool,
}

/// Cloneable trigger side of a [`ChannelWakeWord`].
#[derive(Debug, Clone)]
pub struct WakeWordTrigger {
    shared: std::sync::Arc<parking_lot::Mutex<ChannelState>>,
}

impl ChannelWakeWord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger_handle(&self) -> WakeWordTrigger {
        WakeWordTrigger {
            shared: std::sync::Arc::clone(&self.shared),
        }
    }
}

impl WakeWordTrigger {
    /// Report a detection. Dropped unless the detector is listening.
    pub fn trigger(&self, keyword: &str) -> bool {
        let state = self.shared.lock();
        match (&state.sender, state.listening) {
            (Some(tx), true) => tx
                .send(WakeWordDetection::new(keyword, None))
                .is_ok(),
            _ => false,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.shared.lock().listening
    }
}

impl WakeWordDetector for ChannelWakeWord {
    fn load(&mut self, detections: DetectionSender) -> Result<()> {
        self.shared.lock().sender = Some(detections);
        Ok(())
    }

    fn set_listening(&mut self, listening: bool) -> Result<()> {
        self.shared.lock().listening = listening;
        Ok(())
    }
}
