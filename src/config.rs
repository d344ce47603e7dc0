//! Run configuration, loaded from TOML with per-field defaults.

use std::{
    net::{SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, pipeline::encoder::BatchPolicy, types::Modality};

const CONFIG_SEARCH_PATHS: &[&str] = &["landmark-relay.toml", "config/landmark-relay.toml"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub transport: TransportConfig,
    pub encoder: EncoderConfig,
    pub normalizer: NormalizerConfig,
    pub detector: DetectorConfig,
    pub preview: PreviewConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub index: u32,
    pub mirror: bool,
    /// Consecutive undecodable buffers tolerated before the source gives up.
    pub max_decode_failures: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            mirror: true,
            max_decode_failures: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5052,
        }
    }
}

impl TransportConfig {
    pub fn destination(&self) -> Result<SocketAddr, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            field: "transport.host".to_string(),
            message,
        };
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|err| invalid(format!("cannot resolve {}: {err}", self.host)))?
            .next()
            .ok_or_else(|| invalid(format!("{} resolved to no addresses", self.host)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub policy: BatchPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Handedness labels scoring below this are dropped; 0 forwards every label.
    pub handedness_min_confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_dir: PathBuf,
    pub intra_threads: usize,
    pub pose: ModelConfig,
    pub hand: ModelConfig,
    pub face: ModelConfig,
    /// Palm detector that locates hands for the hand model.
    pub palm: PalmConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            intra_threads: 2,
            pose: ModelConfig::default(),
            hand: ModelConfig::default(),
            face: ModelConfig {
                enabled: false,
                ..ModelConfig::default()
            },
            palm: PalmConfig::default(),
        }
    }
}

impl DetectorConfig {
    pub fn model(&self, modality: Modality) -> &ModelConfig {
        match modality {
            Modality::Pose => &self.pose,
            Modality::Hand => &self.hand,
            Modality::Face => &self.face,
        }
    }
}

/// Overrides for one landmark model. Unset fields fall back to the
/// modality's built-in model description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub input_size: Option<u32>,
    pub min_presence: Option<f32>,
    pub score_activation: Option<ScoreActivation>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            url: None,
            input_size: None,
            min_presence: None,
            score_activation: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PalmConfig {
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub score_threshold: f32,
    /// Overlap above which a weaker palm box is suppressed.
    pub nms_threshold: f32,
}

impl Default for PalmConfig {
    fn default() -> Self {
        Self {
            path: None,
            url: None,
            score_threshold: 0.5,
            nms_threshold: 0.3,
        }
    }
}

/// How a model's presence output maps to a probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreActivation {
    None,
    Sigmoid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Annotated frames are written here as PNG when set.
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_interval_ms: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            snapshot_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_frames: Option<u64>,
    /// Typing `q` + Enter on stdin stops the run.
    pub quit_on_stdin: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_frames: None,
            quit_on_stdin: true,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Loads `explicit` if given, otherwise the first config found on the
    /// search path, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            log::info!("loading config from {}", path.display());
            return Self::from_file(path);
        }

        for candidate in CONFIG_SEARCH_PATHS {
            let path = Path::new(candidate);
            if path.exists() {
                log::info!("loading config from {}", path.display());
                return Self::from_file(path);
            }
        }

        log::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.host.trim().is_empty() {
            return Err(invalid("transport.host", "host must not be empty"));
        }
        if self.transport.port == 0 {
            return Err(invalid("transport.port", "port must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.normalizer.handedness_min_confidence) {
            return Err(invalid(
                "normalizer.handedness_min_confidence",
                "confidence must be between 0.0 and 1.0",
            ));
        }
        if self.detector.intra_threads == 0 {
            return Err(invalid(
                "detector.intra_threads",
                "thread count must be greater than 0",
            ));
        }

        for modality in [Modality::Pose, Modality::Hand, Modality::Face] {
            let model = self.detector.model(modality);
            if model.input_size == Some(0) {
                return Err(invalid(
                    &format!("detector.{modality}.input_size"),
                    "input size must be greater than 0",
                ));
            }
            if let Some(presence) = model.min_presence {
                if !(0.0..=1.0).contains(&presence) {
                    return Err(invalid(
                        &format!("detector.{modality}.min_presence"),
                        "presence threshold must be between 0.0 and 1.0",
                    ));
                }
            }
        }

        for (field, value) in [
            ("detector.palm.score_threshold", self.detector.palm.score_threshold),
            ("detector.palm.nms_threshold", self.detector.palm.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, "threshold must be between 0.0 and 1.0"));
            }
        }

        if self.preview.snapshot_path.is_some() && self.preview.snapshot_interval_ms == 0 {
            return Err(invalid(
                "preview.snapshot_interval_ms",
                "interval must be greater than 0",
            ));
        }
        if self.pipeline.max_frames == Some(0) {
            return Err(invalid(
                "pipeline.max_frames",
                "frame limit must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}
