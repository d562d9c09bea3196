use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::CaptureTimings;
use crate::shared::paths::get_config_dir;

/// Defaults read from `settings.json`. Command-line values win over these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub host: Option<String>,
    pub fps: u32,
    pub max_output_size_mb: f64,
    pub scale: f64,
    pub max_consecutive_poll_failures: u32,
    pub fallback_total_secs: u64,
    pub status_refresh_secs: u64,
    pub completed_grace_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            host: None,
            fps: 10,
            max_output_size_mb: 100.0,
            scale: 1.0,
            max_consecutive_poll_failures: 10,
            fallback_total_secs: 3600,
            status_refresh_secs: 30,
            completed_grace_secs: 10,
        }
    }
}

impl AppSettings {
    pub fn timings(&self) -> CaptureTimings {
        CaptureTimings {
            max_consecutive_poll_failures: self.max_consecutive_poll_failures.max(1),
            fallback_total_time: Duration::from_secs(self.fallback_total_secs),
            status_refresh_interval: Duration::from_secs(self.status_refresh_secs.max(1)),
            completed_grace_period: Duration::from_secs(self.completed_grace_secs),
            ..CaptureTimings::default()
        }
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    ParseError(#[from] serde_json::Error),
}

pub fn get_settings_path() -> PathBuf {
    get_config_dir().join("settings.json")
}

/// Load settings, falling back to defaults when the file is missing or broken.
pub fn load_settings() -> AppSettings {
    let path = get_settings_path();

    if !path.exists() {
        return AppSettings::default();
    }

    match load_settings_from_file(&path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(target: "system", "Ignoring settings at {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

pub fn load_settings_from_file(path: &Path) -> Result<AppSettings, SettingsError> {
    let contents = std::fs::read_to_string(path)?;
    let settings = serde_json::from_str(&contents)?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "host": "192.168.1.50", "fps": 15 }"#).unwrap();

        let settings = load_settings_from_file(&path).unwrap();

        assert_eq!(settings.host.as_deref(), Some("192.168.1.50"));
        assert_eq!(settings.fps, 15);
        assert_eq!(settings.max_output_size_mb, 100.0);
        assert_eq!(settings.fallback_total_secs, 3600);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            load_settings_from_file(&path),
            Err(SettingsError::ParseError(_))
        ));
    }

    #[test]
    fn test_timings_from_settings() {
        let settings = AppSettings {
            status_refresh_secs: 5,
            max_consecutive_poll_failures: 0,
            ..AppSettings::default()
        };
        let timings = settings.timings();

        assert_eq!(timings.status_refresh_interval, Duration::from_secs(5));
        assert_eq!(timings.max_consecutive_poll_failures, 1);
        assert_eq!(timings.startup_grace, Duration::from_secs(5));
    }
}
