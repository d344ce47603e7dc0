use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    LandmarkDetector, ModelSpec, PalmSpec,
    common::{self, Decoded},
    palm::{self, PalmRegion},
};
use crate::{
    config::DetectorConfig,
    error::DetectionError,
    model_download::ensure_model_ready,
    types::{DetectedHand, DetectionResult, Frame, Modality},
};

/// ONNX Runtime landmark detection. Pose and face models run on the
/// letterboxed frame; hands are located by a palm detector first and the
/// hand model runs once per palm crop.
pub struct OrtDetector {
    pose: Option<LandmarkModel>,
    hand: Option<HandTracker>,
    face: Option<LandmarkModel>,
}

struct LandmarkModel {
    spec: ModelSpec,
    session: Session,
}

struct HandTracker {
    palm: PalmModel,
    landmarks: LandmarkModel,
}

struct PalmModel {
    spec: PalmSpec,
    anchors: Vec<[f32; 2]>,
    session: Session,
}

impl OrtDetector {
    pub fn load(config: &DetectorConfig) -> Result<Self> {
        let threads = config.intra_threads;
        let load_model = |modality: Modality| -> Result<Option<LandmarkModel>> {
            match ModelSpec::resolve(modality, config) {
                Some(spec) => LandmarkModel::load(spec, threads).map(Some),
                None => {
                    log::info!("{modality} detection disabled");
                    Ok(None)
                }
            }
        };

        let pose = load_model(Modality::Pose)?;
        let hand = match load_model(Modality::Hand)? {
            Some(landmarks) => Some(HandTracker {
                palm: PalmModel::load(PalmSpec::resolve(config), threads)?,
                landmarks,
            }),
            None => None,
        };
        let face = load_model(Modality::Face)?;

        Ok(Self { pose, hand, face })
    }

    pub fn modalities(&self) -> Vec<Modality> {
        let mut modalities = Vec::new();
        if self.pose.is_some() {
            modalities.push(Modality::Pose);
        }
        if self.hand.is_some() {
            modalities.push(Modality::Hand);
        }
        if self.face.is_some() {
            modalities.push(Modality::Face);
        }
        modalities
    }
}

fn build_session(path: &Path, intra_threads: usize) -> Result<Session> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .commit_from_file(path)
        .with_context(|| format!("failed to load ORT session from {}", path.display()))
}

/// Runs a single-input session and flattens every output.
fn run_flat(session: &mut Session, input: Array4<f32>) -> Result<Vec<Vec<f32>>> {
    let tensor = Tensor::from_array(input)?;
    let outputs = session
        .run(ort::inputs![tensor])
        .context("failed to run ORT session")?;

    let mut flattened = Vec::with_capacity(outputs.len());
    for index in 0..outputs.len() {
        let values = outputs[index].try_extract_array::<f32>()?;
        flattened.push(values.iter().copied().collect::<Vec<f32>>());
    }
    Ok(flattened)
}

impl LandmarkModel {
    fn load(spec: ModelSpec, intra_threads: usize) -> Result<Self> {
        let status = ensure_model_ready(spec.modality.label(), &spec.path, spec.url.as_deref())
            .with_context(|| format!("failed to prepare {} model", spec.modality))?;
        log::debug!("{} model status: {status:?}", spec.modality);

        let session = build_session(&spec.path, intra_threads)?;
        log::info!(
            "{} landmark model ready using {} ({}px input)",
            spec.modality,
            spec.path.display(),
            spec.input_size
        );
        Ok(Self { spec, session })
    }

    fn infer_full_frame(&mut self, frame: &Frame) -> Result<Option<Decoded>> {
        let (input, letterbox) = common::prepare_frame_with_size(frame, self.spec.input_size)?;
        let outputs = run_flat(&mut self.session, input)?;
        common::decode_outputs(&self.spec, &outputs, &letterbox)
    }
}

impl PalmModel {
    fn load(spec: PalmSpec, intra_threads: usize) -> Result<Self> {
        ensure_model_ready("palm", &spec.path, spec.url.as_deref())
            .context("failed to prepare palm detector model")?;
        let session = build_session(&spec.path, intra_threads)?;
        log::info!("palm detector ready using {}", spec.path.display());

        Ok(Self {
            anchors: palm::generate_anchors(spec.input_size),
            spec,
            session,
        })
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<PalmRegion>> {
        let (input, letterbox) = common::prepare_frame_with_size(frame, self.spec.input_size)?;
        let outputs = run_flat(&mut self.session, input)?;
        let [boxes, scores, ..] = outputs.as_slice() else {
            return Err(anyhow!(
                "palm detector returned {} outputs, expected 2",
                outputs.len()
            ));
        };
        palm::decode_palm_outputs(boxes, scores, &self.anchors, &letterbox, &self.spec)
    }
}

impl HandTracker {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedHand>> {
        let regions = self.palm.detect(frame).context("palm detection failed")?;

        let mut crops = Vec::with_capacity(regions.len());
        for region in &regions {
            let crop = palm::crop_from_palm(region);
            let (input, transform) =
                common::prepare_rotated_crop(frame, &crop, self.landmarks.spec.input_size)?;
            crops.push((run_flat(&mut self.landmarks.session, input)?, transform));
        }

        common::decode_hand_crops(&self.landmarks.spec, &crops)
    }
}

fn inference_error(modality: Modality) -> impl FnOnce(anyhow::Error) -> DetectionError {
    move |source| DetectionError::Inference { modality, source }
}

impl LandmarkDetector for OrtDetector {
    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult, DetectionError> {
        if frame.rgba.len() != frame.width as usize * frame.height as usize * 4 {
            return Err(DetectionError::InvalidFrame(format!(
                "{} bytes for {}x{} RGBA",
                frame.rgba.len(),
                frame.width,
                frame.height
            )));
        }

        let mut result = DetectionResult::default();
        if let Some(model) = self.pose.as_mut() {
            if let Some(Decoded::Pose(points)) = model
                .infer_full_frame(frame)
                .map_err(inference_error(Modality::Pose))?
            {
                result.pose = Some(points);
            }
        }
        if let Some(tracker) = self.hand.as_mut() {
            result.hands = tracker.detect(frame).map_err(inference_error(Modality::Hand))?;
        }
        if let Some(model) = self.face.as_mut() {
            if let Some(Decoded::Face(points)) = model
                .infer_full_frame(frame)
                .map_err(inference_error(Modality::Face))?
            {
                result.faces.push(points);
            }
        }
        Ok(result)
    }
}
