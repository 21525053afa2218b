use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::manual::DEFAULT_IMMEDIATE_INTERVAL;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    #[serde(default = "DeviceConfig::default_left_port")]
    pub left_port: String,
    #[serde(default = "DeviceConfig::default_right_port")]
    pub right_port: String,
    #[serde(default = "DeviceConfig::default_baud_rate")]
    pub baud_rate: u32,
}

impl DeviceConfig {
    fn default_left_port() -> String {
        "/dev/ttyUSB0".to_string()
    }
    fn default_right_port() -> String {
        "/dev/ttyUSB1".to_string()
    }
    fn default_baud_rate() -> u32 {
        9600
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            left_port: Self::default_left_port(),
            right_port: Self::default_right_port(),
            baud_rate: Self::default_baud_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackConfig {
    /// Seconds between re-sends of a held finger in manual mode.
    #[serde(default = "PlaybackConfig::default_immediate_interval")]
    pub immediate_interval: f64,
    #[serde(default = "PlaybackConfig::default_frame_rate")]
    pub frame_rate: f64,
}

impl PlaybackConfig {
    fn default_immediate_interval() -> f64 {
        DEFAULT_IMMEDIATE_INTERVAL
    }
    fn default_frame_rate() -> f64 {
        60.0
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            immediate_interval: Self::default_immediate_interval(),
            frame_rate: Self::default_frame_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryConfig {
    #[serde(default = "LibraryConfig::default_song_dir")]
    pub song_dir: PathBuf,
    #[serde(default = "LibraryConfig::default_audio_dir")]
    pub audio_dir: PathBuf,
}

impl LibraryConfig {
    fn default_song_dir() -> PathBuf {
        PathBuf::from("haptic_outputs")
    }
    fn default_audio_dir() -> PathBuf {
        PathBuf::from("songs")
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            song_dir: Self::default_song_dir(),
            audio_dir: Self::default_audio_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlConfig {
    #[serde(default = "ControlConfig::default_socket_path")]
    pub socket_path: PathBuf,
}

impl ControlConfig {
    fn default_socket_path() -> PathBuf {
        PathBuf::from(glove_protocol::SOCKET_PATH)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: Self::default_socket_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PanelConfig {
    #[serde(default)]
    pub devices: DeviceConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

impl PanelConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PanelConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config.sanitized())
    }

    /// Reads `path`, or writes a fully commented default file there when it does not exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            return match Self::load(path) {
                Ok(config) => config,
                Err(err) => {
                    warn!(%err, "using default config");
                    Self::default()
                }
            };
        }

        let defaults = Self::default();
        match toml::to_string_pretty(&defaults) {
            Ok(text) => {
                if let Err(err) = fs::write(path, commented(&text)) {
                    warn!(path = %path.display(), %err, "failed to write default config");
                } else {
                    info!(path = %path.display(), "wrote default config");
                }
            }
            Err(err) => warn!(%err, "failed to serialize default config"),
        }
        defaults
    }

    fn sanitized(mut self) -> Self {
        let interval = self.playback.immediate_interval;
        if !(interval.is_finite() && interval > 0.0) {
            warn!(interval, "immediate_interval must be positive, using default");
            self.playback.immediate_interval = PlaybackConfig::default_immediate_interval();
        }
        let rate = self.playback.frame_rate;
        if !(rate.is_finite() && rate > 0.0) {
            warn!(rate, "frame_rate must be positive, using default");
            self.playback.frame_rate = PlaybackConfig::default_frame_rate();
        }
        self
    }
}

// Keeps section headers live and comments out every key so the file documents the defaults.
fn commented(text: &str) -> String {
    let mut out = String::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || (trimmed.starts_with('[') && trimmed.ends_with(']')) {
            out.push_str(line);
        } else {
            out.push_str("# ");
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}
