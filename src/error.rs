//! Error types for the capture → transmit pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Modality;

/// Failure to obtain a frame. Always fatal for the pipeline.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    #[error("camera read failed: {0}")]
    Read(String),

    #[error("failed to decode camera frame: {0}")]
    Decode(String),

    #[error("camera stream ended")]
    EndOfStream,
}

/// Failure inside the landmark detector. The frame is skipped.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("{modality} inference failed: {source:#}")]
    Inference {
        modality: Modality,
        #[source]
        source: anyhow::Error,
    },
}

/// Failure to put a packet on the wire. Logged, never fatal.
#[derive(Error, Debug)]
pub enum TransmissionError {
    #[error("failed to serialize packet: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("packet of {len} bytes exceeds the {max} byte datagram limit")]
    Oversize { len: usize, max: usize },

    #[error("socket send failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to turn datagram bytes back into landmark sets.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed packet: {0}")]
    Json(#[from] serde_json::Error),

    #[error("packet has no landmarks")]
    Empty,

    #[error("{modality} set truncated: expected {expected} entries, found {found}")]
    Truncated {
        modality: Modality,
        expected: usize,
        found: usize,
    },

    #[error("entry {index} breaks a {modality} set")]
    MixedSet { modality: Modality, index: usize },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}
