pub mod common;
mod ort;
pub mod palm;

use std::path::PathBuf;

use crate::{
    config::{DetectorConfig, ScoreActivation},
    error::DetectionError,
    types::{DetectionResult, Frame, MAX_HANDS, Modality},
};

pub use self::ort::OrtDetector;

/// Turns one frame into zero or more landmark sets per modality.
pub trait LandmarkDetector {
    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult, DetectionError>;
}

impl<D: LandmarkDetector + ?Sized> LandmarkDetector for Box<D> {
    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult, DetectionError> {
        (**self).detect(frame)
    }
}

const HAND_MODEL_FILENAME: &str = "handpose_estimation_mediapipe_2023feb.onnx";
const HAND_MODEL_URL: &str = "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/handpose_estimation_mediapipe_2023feb.onnx";
const PALM_MODEL_FILENAME: &str = "palm_detection_mediapipe_2023feb.onnx";
const PALM_MODEL_URL: &str = "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/palm_detection_mediapipe_2023feb.onnx";
const PALM_INPUT_SIZE: u32 = 192;
const POSE_MODEL_FILENAME: &str = "pose_landmark_full.onnx";
const FACE_MODEL_FILENAME: &str = "face_landmark.onnx";

/// Fully resolved description of one landmark model.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSpec {
    pub modality: Modality,
    pub path: PathBuf,
    pub url: Option<String>,
    pub input_size: u32,
    pub min_presence: f32,
    pub activation: ScoreActivation,
}

impl ModelSpec {
    /// Applies the configured overrides to the modality's built-in model.
    /// Returns `None` when the modality is disabled.
    pub fn resolve(modality: Modality, config: &DetectorConfig) -> Option<Self> {
        let overrides = config.model(modality);
        if !overrides.enabled {
            return None;
        }

        let (filename, url, input_size, min_presence, activation) = match modality {
            Modality::Pose => (POSE_MODEL_FILENAME, None, 256, 0.5, ScoreActivation::None),
            Modality::Hand => (
                HAND_MODEL_FILENAME,
                Some(HAND_MODEL_URL),
                224,
                0.2,
                ScoreActivation::None,
            ),
            Modality::Face => (FACE_MODEL_FILENAME, None, 192, 0.5, ScoreActivation::Sigmoid),
        };

        Some(Self {
            modality,
            path: overrides
                .path
                .clone()
                .unwrap_or_else(|| config.model_dir.join(filename)),
            url: overrides.url.clone().or_else(|| url.map(str::to_string)),
            input_size: overrides.input_size.unwrap_or(input_size),
            min_presence: overrides.min_presence.unwrap_or(min_presence),
            activation: overrides.score_activation.unwrap_or(activation),
        })
    }
}

/// Palm detector run ahead of the hand model.
#[derive(Clone, Debug, PartialEq)]
pub struct PalmSpec {
    pub path: PathBuf,
    pub url: Option<String>,
    pub input_size: u32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    /// Palms kept per frame, best first.
    pub max_regions: usize,
}

impl PalmSpec {
    pub fn resolve(config: &DetectorConfig) -> Self {
        let palm = &config.palm;
        Self {
            path: palm
                .path
                .clone()
                .unwrap_or_else(|| config.model_dir.join(PALM_MODEL_FILENAME)),
            url: Some(palm.url.clone().unwrap_or_else(|| PALM_MODEL_URL.to_string())),
            input_size: PALM_INPUT_SIZE,
            score_threshold: palm.score_threshold,
            nms_threshold: palm.nms_threshold,
            max_regions: MAX_HANDS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn disabled_modalities_resolve_to_none() {
        let config = Config::default();
        assert!(ModelSpec::resolve(Modality::Face, &config.detector).is_none());
        assert!(ModelSpec::resolve(Modality::Pose, &config.detector).is_some());
    }

    #[test]
    fn overrides_replace_builtin_values() {
        let config = Config::from_toml(
            r#"
            [detector]
            model_dir = "weights"

            [detector.hand]
            input_size = 256
            min_presence = 0.7
            score_activation = "sigmoid"
            "#,
        )
        .unwrap();

        let hand = ModelSpec::resolve(Modality::Hand, &config.detector).unwrap();
        assert_eq!(hand.path, PathBuf::from("weights").join(HAND_MODEL_FILENAME));
        assert_eq!(hand.url.as_deref(), Some(HAND_MODEL_URL));
        assert_eq!(hand.input_size, 256);
        assert_eq!(hand.min_presence, 0.7);
        assert_eq!(hand.activation, ScoreActivation::Sigmoid);

        let palm = PalmSpec::resolve(&config.detector);
        assert_eq!(palm.path, PathBuf::from("weights").join(PALM_MODEL_FILENAME));
        assert_eq!(palm.max_regions, MAX_HANDS);

        let pose = ModelSpec::resolve(Modality::Pose, &config.detector).unwrap();
        assert_eq!(pose.input_size, 256);
        assert!(pose.url.is_none());
    }
}
