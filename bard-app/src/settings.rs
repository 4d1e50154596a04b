//! Persistent application settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bard_core::{LegacyConfig, OrchestratorConfig, RecorderConfig};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub api_url: String,
    pub preferred_input_device: Option<String>,
    /// Normalized level above which the microphone counts as speech.
    pub silence_threshold: f32,
    pub silence_duration_ms: u64,
    pub max_recording_secs: u64,
    pub preview_seconds: u32,
    pub answer_text_hold_ms: u64,
    pub wake_word_enabled: bool,
    pub history_limit: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            preferred_input_device: None,
            silence_threshold: 0.08,
            silence_duration_ms: 1_500,
            max_recording_secs: 30,
            preview_seconds: 0,
            answer_text_hold_ms: 8_000,
            wake_word_enabled: true,
            history_limit: 50,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.api_url = normalize_api_url(&self.api_url);
        self.silence_threshold = self.silence_threshold.clamp(0.01, 0.5);
        self.silence_duration_ms = self.silence_duration_ms.clamp(300, 10_000);
        self.max_recording_secs = self.max_recording_secs.clamp(5, 120);
        self.preview_seconds = self.preview_seconds.min(10);
        self.answer_text_hold_ms = self.answer_text_hold_ms.min(60_000);
        self.history_limit = self.history_limit.clamp(1, 500);
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    /// `BARD_API_URL` wins over the stored URL.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("BARD_API_URL") {
            self.api_url = normalize_api_url(&url);
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            recorder: RecorderConfig {
                silence_threshold: self.silence_threshold,
                silence_duration: Duration::from_millis(self.silence_duration_ms),
                max_duration: Duration::from_secs(self.max_recording_secs),
                ..RecorderConfig::default()
            },
            legacy: LegacyConfig {
                preview_seconds: self.preview_seconds,
                answer_text_hold: Duration::from_millis(self.answer_text_hold_ms),
                ..LegacyConfig::default()
            },
            conversation: None,
            fallback_to_legacy: true,
        }
    }
}

pub fn normalize_api_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_API_URL.into()
    } else {
        trimmed.into()
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Bard")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("bard")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: AppSettings =
            serde_json::from_str(r#"{"previewSeconds":3}"#).expect("partial settings");
        assert_eq!(settings.preview_seconds, 3);
        assert_eq!(settings.api_url, DEFAULT_API_URL);
        assert_eq!(settings.silence_duration_ms, 1_500);
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let mut settings = AppSettings {
            api_url: "  http://bard.local:9000/ ".into(),
            preferred_input_device: Some("   ".into()),
            silence_threshold: 3.0,
            silence_duration_ms: 10,
            max_recording_secs: 1_000,
            preview_seconds: 99,
            answer_text_hold_ms: 600_000,
            wake_word_enabled: true,
            history_limit: 0,
        };
        settings.normalize();
        assert_eq!(settings.api_url, "http://bard.local:9000");
        assert_eq!(settings.preferred_input_device, None);
        assert_eq!(settings.silence_threshold, 0.5);
        assert_eq!(settings.silence_duration_ms, 300);
        assert_eq!(settings.max_recording_secs, 120);
        assert_eq!(settings.preview_seconds, 10);
        assert_eq!(settings.answer_text_hold_ms, 60_000);
        assert_eq!(settings.history_limit, 1);
    }

    #[test]
    fn orchestrator_config_carries_recorder_tuning() {
        let settings = AppSettings {
            silence_duration_ms: 2_000,
            preview_seconds: 2,
            ..AppSettings::default()
        };
        let config = settings.orchestrator_config();
        assert_eq!(config.recorder.silence_duration, Duration::from_secs(2));
        assert_eq!(config.legacy.preview_seconds, 2);
        assert!(config.conversation.is_none());
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = std::env::temp_dir().join(format!("bard-settings-{}", std::process::id()));
        let path = dir.join("settings.json");
        let settings = AppSettings {
            preview_seconds: 4,
            preferred_input_device: Some("USB Mic".into()),
            ..AppSettings::default()
        };
        save_settings(&path, &settings).expect("save");
        assert_eq!(load_settings(&path), settings);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_file_loads_defaults() {
        let dir = std::env::temp_dir().join(format!("bard-corrupt-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("settings.json");
        fs::write(&path, "{not json").expect("write");
        assert_eq!(load_settings(&path), AppSettings::default());
        let _ = fs::remove_dir_all(dir);
    }
}
