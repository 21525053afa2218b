use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device channel is not open")]
    NotOpen,

    #[error("serial write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Whole-document failures. Bad individual records are skipped, not reported here.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("cannot open song {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("song {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("song {path} must contain a top-level array of events")]
    NotAnArray { path: PathBuf },
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no companion audio for '{base}' in {dir}")]
    NotFound { base: String, dir: PathBuf },

    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: symphonia::core::errors::Error,
    },

    #[error("{path} contains no decodable audio track")]
    NoTrack { path: PathBuf },

    #[error("audio output unavailable: {0}")]
    Output(String),
}

#[derive(Error, Debug)]
pub enum StartError {
    #[error("no song selected")]
    NoSongSelected,

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("'{song}' has no haptic events and no playable audio")]
    NothingToPlay { song: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
