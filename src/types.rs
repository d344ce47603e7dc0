use std::time::Instant;

use serde::{Deserialize, Serialize};

pub const POSE_LANDMARKS: usize = 33;
pub const HAND_LANDMARKS: usize = 21;
pub const FACE_LANDMARKS: usize = 468;
pub const MAX_HANDS: usize = 2;

#[derive(Clone, Debug)]
pub struct Frame {
    /// Position of this frame in the run, starting at zero.
    pub index: u64,
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Pose,
    Hand,
    Face,
}

impl Modality {
    pub fn label(&self) -> &'static str {
        match self {
            Modality::Pose => "pose",
            Modality::Hand => "hand",
            Modality::Face => "face",
        }
    }

    /// Number of points in one set of this modality.
    pub fn point_count(&self) -> usize {
        match self {
            Modality::Pose => POSE_LANDMARKS,
            Modality::Hand => HAND_LANDMARKS,
            Modality::Face => FACE_LANDMARKS,
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn label(&self) -> &'static str {
        match self {
            Handedness::Left => "Left",
            Handedness::Right => "Right",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        if label.eq_ignore_ascii_case("left") {
            Some(Handedness::Left)
        } else if label.eq_ignore_ascii_case("right") {
            Some(Handedness::Right)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PoseLandmark {
    pub landmark: Landmark,
    pub visibility: f32,
}

/// Landmarks of one detected entity, in detector topology order.
#[derive(Clone, Debug, PartialEq)]
pub enum LandmarkSet {
    Pose(Box<[PoseLandmark; POSE_LANDMARKS]>),
    Hand {
        handedness: Option<Handedness>,
        landmarks: Box<[Landmark; HAND_LANDMARKS]>,
    },
    Face(Box<[Landmark; FACE_LANDMARKS]>),
}

impl LandmarkSet {
    pub fn modality(&self) -> Modality {
        match self {
            LandmarkSet::Pose(_) => Modality::Pose,
            LandmarkSet::Hand { .. } => Modality::Hand,
            LandmarkSet::Face(_) => Modality::Face,
        }
    }

    pub fn len(&self) -> usize {
        self.modality().point_count()
    }

    /// Iterates the positional part of every landmark in order.
    pub fn points(&self) -> Box<dyn Iterator<Item = &Landmark> + '_> {
        match self {
            LandmarkSet::Pose(points) => Box::new(points.iter().map(|p| &p.landmark)),
            LandmarkSet::Hand { landmarks, .. } => Box::new(landmarks.iter()),
            LandmarkSet::Face(points) => Box::new(points.iter()),
        }
    }
}

/// A keypoint as reported by a detector, before validation.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RawLandmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: Option<f32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub label: String,
    pub score: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectedHand {
    pub landmarks: Vec<RawLandmark>,
    /// Handedness candidates, best first.
    pub classifications: Vec<Classification>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    pub pose: Option<Vec<RawLandmark>>,
    pub hands: Vec<DetectedHand>,
    pub faces: Vec<Vec<RawLandmark>>,
}

impl DetectionResult {
    pub fn is_empty(&self) -> bool {
        self.pose.is_none() && self.hands.is_empty() && self.faces.is_empty()
    }
}
