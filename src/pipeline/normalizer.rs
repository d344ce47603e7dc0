use crate::{
    config::NormalizerConfig,
    pipeline::encoder::fixed,
    types::{
        Classification, DetectedHand, DetectionResult, Handedness, Landmark, LandmarkSet,
        MAX_HANDS, Modality, PoseLandmark, RawLandmark,
    },
};

/// Maps detector-native keypoints to canonical landmark sets.
#[derive(Clone, Debug)]
pub struct Normalizer {
    handedness_min_confidence: f32,
}

impl Normalizer {
    pub fn new(config: &NormalizerConfig) -> Self {
        Self {
            handedness_min_confidence: config.handedness_min_confidence,
        }
    }

    /// Returns the pose set first, then hands in detector order, then faces.
    pub fn normalize(&self, detection: &DetectionResult) -> Vec<LandmarkSet> {
        let mut sets = Vec::with_capacity(1 + detection.hands.len() + detection.faces.len());

        if let Some(points) = &detection.pose {
            if let Some(set) = self.pose_set(points) {
                sets.push(set);
            }
        }

        if detection.hands.len() > MAX_HANDS {
            log::warn!(
                "detector reported {} hands, forwarding the first {MAX_HANDS}",
                detection.hands.len()
            );
        }
        for hand in detection.hands.iter().take(MAX_HANDS) {
            if let Some(set) = self.hand_set(hand) {
                sets.push(set);
            }
        }

        for points in &detection.faces {
            if let Some(set) = self.face_set(points) {
                sets.push(set);
            }
        }

        sets
    }

    fn pose_set(&self, points: &[RawLandmark]) -> Option<LandmarkSet> {
        let points = checked_points(Modality::Pose, points)?;
        let landmarks: Vec<PoseLandmark> = points
            .iter()
            .map(|raw| PoseLandmark {
                landmark: clamp_landmark(raw),
                visibility: raw.visibility.unwrap_or(0.0).clamp(0.0, 1.0),
            })
            .collect();
        fixed(landmarks, Modality::Pose).ok().map(LandmarkSet::Pose)
    }

    fn hand_set(&self, hand: &DetectedHand) -> Option<LandmarkSet> {
        let points = checked_points(Modality::Hand, &hand.landmarks)?;
        let landmarks: Vec<Landmark> = points.iter().map(clamp_landmark).collect();
        let landmarks = fixed(landmarks, Modality::Hand).ok()?;
        Some(LandmarkSet::Hand {
            handedness: self.handedness(&hand.classifications),
            landmarks,
        })
    }

    fn face_set(&self, points: &[RawLandmark]) -> Option<LandmarkSet> {
        let points = checked_points(Modality::Face, points)?;
        let landmarks: Vec<Landmark> = points.iter().map(clamp_landmark).collect();
        fixed(landmarks, Modality::Face).ok().map(LandmarkSet::Face)
    }

    fn handedness(&self, classifications: &[Classification]) -> Option<Handedness> {
        let top = classifications.first()?;
        if !(top.score >= self.handedness_min_confidence) {
            log::debug!(
                "dropping handedness {} with score {:.2}",
                top.label,
                top.score
            );
            return None;
        }
        let handedness = Handedness::from_label(&top.label);
        if handedness.is_none() {
            log::warn!("unrecognised handedness label {:?}", top.label);
        }
        handedness
    }
}

fn checked_points(modality: Modality, points: &[RawLandmark]) -> Option<&[RawLandmark]> {
    let expected = modality.point_count();
    if points.len() != expected {
        log::warn!(
            "dropping {modality} set with {} points, expected {expected}",
            points.len()
        );
        return None;
    }
    let finite = points.iter().all(|p| {
        p.x.is_finite() && p.y.is_finite() && p.z.is_finite() && p.visibility.is_none_or(f32::is_finite)
    });
    if !finite {
        log::warn!("dropping {modality} set with non-finite coordinates");
        return None;
    }
    Some(points)
}

fn clamp_landmark(raw: &RawLandmark) -> Landmark {
    Landmark {
        x: raw.x.clamp(0.0, 1.0),
        y: raw.y.clamp(0.0, 1.0),
        z: raw.z,
    }
}
