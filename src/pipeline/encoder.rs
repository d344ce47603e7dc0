//! Packet batching and the JSON wire schema.
//!
//! Every datagram is one object of the form
//! `{"landmarks": [{"type": "pose", "x": .., "y": .., "z": .., "visibility": ..}, ..]}`.
//! Entries are flat; a receiver regroups them into sets using the fixed point
//! count of each modality.

use serde::{Deserialize, Serialize};

use crate::{
    error::DecodeError,
    types::{
        FACE_LANDMARKS, HAND_LANDMARKS, Handedness, Landmark, LandmarkSet, Modality,
        POSE_LANDMARKS, PoseLandmark,
    },
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchPolicy {
    /// One packet per frame holding every detected set.
    #[default]
    Aggregate,
    /// One packet per detected set.
    PerEntity,
}

/// One or more landmark sets taken from a single frame. Never empty.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    sets: Vec<LandmarkSet>,
}

impl Packet {
    fn new(sets: Vec<LandmarkSet>) -> Option<Self> {
        if sets.is_empty() {
            None
        } else {
            Some(Self { sets })
        }
    }

    pub fn sets(&self) -> &[LandmarkSet] {
        &self.sets
    }

    pub fn into_sets(self) -> Vec<LandmarkSet> {
        self.sets
    }

    /// The shared modality of all sets, or `None` for a mixed packet.
    pub fn modality(&self) -> Option<Modality> {
        let first = self.sets.first()?.modality();
        self.sets
            .iter()
            .all(|set| set.modality() == first)
            .then_some(first)
    }

    pub fn landmark_count(&self) -> usize {
        self.sets.iter().map(LandmarkSet::len).sum()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&WirePacket::from_sets(&self.sets))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let wire: WirePacket = serde_json::from_slice(bytes)?;
        let sets = wire.into_sets()?;
        Self::new(sets).ok_or(DecodeError::Empty)
    }
}

#[derive(Clone, Debug)]
pub struct Encoder {
    policy: BatchPolicy,
}

impl Encoder {
    pub fn new(policy: BatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> BatchPolicy {
        self.policy
    }

    pub fn encode(&self, sets: Vec<LandmarkSet>) -> Vec<Packet> {
        match self.policy {
            BatchPolicy::Aggregate => Packet::new(sets).into_iter().collect(),
            BatchPolicy::PerEntity => sets
                .into_iter()
                .filter_map(|set| Packet::new(vec![set]))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WirePacket {
    landmarks: Vec<WireLandmark>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireLandmark {
    Pose {
        x: f32,
        y: f32,
        z: f32,
        visibility: f32,
    },
    Hand {
        x: f32,
        y: f32,
        z: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handedness: Option<Handedness>,
    },
    Face {
        x: f32,
        y: f32,
        z: f32,
    },
}

impl WireLandmark {
    fn modality(&self) -> Modality {
        match self {
            WireLandmark::Pose { .. } => Modality::Pose,
            WireLandmark::Hand { .. } => Modality::Hand,
            WireLandmark::Face { .. } => Modality::Face,
        }
    }

    fn position(&self) -> Landmark {
        let (x, y, z) = match *self {
            WireLandmark::Pose { x, y, z, .. }
            | WireLandmark::Hand { x, y, z, .. }
            | WireLandmark::Face { x, y, z } => (x, y, z),
        };
        Landmark { x, y, z }
    }
}

impl WirePacket {
    fn from_sets(sets: &[LandmarkSet]) -> Self {
        let total = sets.iter().map(LandmarkSet::len).sum();
        let mut landmarks = Vec::with_capacity(total);

        for set in sets {
            match set {
                LandmarkSet::Pose(points) => {
                    landmarks.extend(points.iter().map(|p| WireLandmark::Pose {
                        x: p.landmark.x,
                        y: p.landmark.y,
                        z: p.landmark.z,
                        visibility: p.visibility,
                    }));
                }
                LandmarkSet::Hand {
                    handedness,
                    landmarks: points,
                } => {
                    landmarks.extend(points.iter().map(|p| WireLandmark::Hand {
                        x: p.x,
                        y: p.y,
                        z: p.z,
                        handedness: *handedness,
                    }));
                }
                LandmarkSet::Face(points) => {
                    landmarks.extend(points.iter().map(|p| WireLandmark::Face {
                        x: p.x,
                        y: p.y,
                        z: p.z,
                    }));
                }
            }
        }

        Self { landmarks }
    }

    fn into_sets(self) -> Result<Vec<LandmarkSet>, DecodeError> {
        let entries = self.landmarks;
        let mut sets = Vec::new();
        let mut start = 0;

        while start < entries.len() {
            let modality = entries[start].modality();
            let expected = modality.point_count();
            let end = start + expected;
            if end > entries.len() {
                return Err(DecodeError::Truncated {
                    modality,
                    expected,
                    found: entries.len() - start,
                });
            }

            let chunk = &entries[start..end];
            if let Some(offset) = chunk.iter().position(|e| e.modality() != modality) {
                return Err(DecodeError::MixedSet {
                    modality,
                    index: start + offset,
                });
            }

            sets.push(decode_set(modality, chunk, start)?);
            start = end;
        }

        Ok(sets)
    }
}

fn decode_set(
    modality: Modality,
    chunk: &[WireLandmark],
    start: usize,
) -> Result<LandmarkSet, DecodeError> {
    let set = match modality {
        Modality::Pose => {
            let points: Vec<PoseLandmark> = chunk
                .iter()
                .map(|entry| PoseLandmark {
                    landmark: entry.position(),
                    visibility: match entry {
                        WireLandmark::Pose { visibility, .. } => *visibility,
                        _ => 0.0,
                    },
                })
                .collect();
            LandmarkSet::Pose(fixed::<PoseLandmark, POSE_LANDMARKS>(points, modality)?)
        }
        Modality::Hand => {
            let handedness = match chunk[0] {
                WireLandmark::Hand { handedness, .. } => handedness,
                _ => None,
            };
            if let Some(offset) = chunk.iter().position(|entry| {
                !matches!(entry, WireLandmark::Hand { handedness: h, .. } if *h == handedness)
            }) {
                return Err(DecodeError::MixedSet {
                    modality,
                    index: start + offset,
                });
            }
            let points: Vec<Landmark> = chunk.iter().map(WireLandmark::position).collect();
            LandmarkSet::Hand {
                handedness,
                landmarks: fixed::<Landmark, HAND_LANDMARKS>(points, modality)?,
            }
        }
        Modality::Face => {
            let points: Vec<Landmark> = chunk.iter().map(WireLandmark::position).collect();
            LandmarkSet::Face(fixed::<Landmark, FACE_LANDMARKS>(points, modality)?)
        }
    };
    Ok(set)
}

/// Converts a vector of exactly `N` points into a boxed fixed-size array.
pub(crate) fn fixed<T, const N: usize>(
    points: Vec<T>,
    modality: Modality,
) -> Result<Box<[T; N]>, DecodeError> {
    let found = points.len();
    points
        .into_boxed_slice()
        .try_into()
        .map_err(|_| DecodeError::Truncated {
            modality,
            expected: N,
            found,
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn pose_set() -> LandmarkSet {
        let points: Vec<PoseLandmark> = (0..POSE_LANDMARKS)
            .map(|i| PoseLandmark {
                landmark: Landmark {
                    x: i as f32 / 64.0,
                    y: 1.0 - i as f32 / 64.0,
                    z: -(i as f32) / 8.0,
                },
                visibility: 0.75,
            })
            .collect();
        LandmarkSet::Pose(fixed(points, Modality::Pose).unwrap())
    }

    pub(crate) fn hand_set(handedness: Option<Handedness>) -> LandmarkSet {
        let points: Vec<Landmark> = (0..HAND_LANDMARKS)
            .map(|i| Landmark {
                x: 0.25 + i as f32 / 128.0,
                y: 0.5,
                z: i as f32 / 32.0,
            })
            .collect();
        LandmarkSet::Hand {
            handedness,
            landmarks: fixed(points, Modality::Hand).unwrap(),
        }
    }

    pub(crate) fn face_set() -> LandmarkSet {
        let points: Vec<Landmark> = (0..FACE_LANDMARKS)
            .map(|i| Landmark {
                x: (i % 16) as f32 / 16.0,
                y: (i / 16) as f32 / 32.0,
                z: 0.125,
            })
            .collect();
        LandmarkSet::Face(fixed(points, Modality::Face).unwrap())
    }

    fn body_and_two_hands() -> Vec<LandmarkSet> {
        vec![
            pose_set(),
            hand_set(Some(Handedness::Left)),
            hand_set(Some(Handedness::Right)),
        ]
    }

    #[test]
    fn aggregate_produces_one_packet_with_every_landmark() {
        let packets = Encoder::new(BatchPolicy::Aggregate).encode(body_and_two_hands());
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].landmark_count(), 75);
        assert_eq!(packets[0].modality(), None);

        let json: serde_json::Value = serde_json::from_slice(&packets[0].to_bytes().unwrap()).unwrap();
        let entries = json["landmarks"].as_array().unwrap();
        assert_eq!(entries.len(), 75);
        assert!(entries[..33].iter().all(|e| e["type"] == "pose"));
        assert!(entries[33..54].iter().all(|e| e["handedness"] == "Left"));
        assert!(entries[54..].iter().all(|e| e["handedness"] == "Right"));
    }

    #[test]
    fn per_entity_produces_one_packet_per_set() {
        let packets = Encoder::new(BatchPolicy::PerEntity).encode(body_and_two_hands());
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].modality(), Some(Modality::Pose));
        assert_eq!(packets[1].modality(), Some(Modality::Hand));
        assert_eq!(packets[2].modality(), Some(Modality::Hand));
        assert_eq!(packets[1].landmark_count(), HAND_LANDMARKS);
    }

    #[test]
    fn empty_input_produces_no_packets() {
        for policy in [BatchPolicy::Aggregate, BatchPolicy::PerEntity] {
            assert!(Encoder::new(policy).encode(Vec::new()).is_empty());
        }
    }

    #[test]
    fn decoding_restores_sets_in_order() {
        let sets = vec![
            pose_set(),
            hand_set(Some(Handedness::Right)),
            hand_set(None),
            face_set(),
        ];
        let packets = Encoder::new(BatchPolicy::Aggregate).encode(sets.clone());
        let bytes = packets[0].to_bytes().unwrap();
        let decoded = Packet::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.into_sets(), sets);
    }

    #[test]
    fn per_entity_packets_decode_back_to_each_set() {
        let mut deep_face = face_set();
        if let LandmarkSet::Face(points) = &mut deep_face {
            points[0].z = f32::MAX;
            points[1].z = f32::MIN_POSITIVE;
            points[2].z = -1.0e-30;
        }
        let mut deep_pose = pose_set();
        if let LandmarkSet::Pose(points) = &mut deep_pose {
            points[32].landmark.z = -3.4e38;
        }
        let sets = vec![
            deep_pose,
            hand_set(None),
            hand_set(Some(Handedness::Left)),
            hand_set(Some(Handedness::Right)),
            deep_face,
        ];

        let packets = Encoder::new(BatchPolicy::PerEntity).encode(sets.clone());
        assert_eq!(packets.len(), sets.len());

        let decoded: Vec<LandmarkSet> = packets
            .iter()
            .map(|packet| Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap())
            .inspect(|packet| assert_eq!(packet.sets().len(), 1))
            .flat_map(Packet::into_sets)
            .collect();
        assert_eq!(decoded, sets);
    }

    #[test]
    fn pose_entries_carry_visibility_and_hands_omit_missing_handedness() {
        let bytes = Encoder::new(BatchPolicy::Aggregate)
            .encode(vec![pose_set(), hand_set(None)])
            .remove(0)
            .to_bytes()
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let entries = json["landmarks"].as_array().unwrap();
        assert_eq!(entries[0]["visibility"], 0.75);
        assert!(entries[40].get("visibility").is_none());
        assert!(entries[40].get("handedness").is_none());
    }

    #[test]
    fn truncated_set_is_rejected() {
        let entries: Vec<String> = (0..5)
            .map(|_| r#"{"type":"hand","x":0.5,"y":0.5,"z":0.0}"#.to_string())
            .collect();
        let json = format!(r#"{{"landmarks":[{}]}}"#, entries.join(","));
        let err = Packet::from_bytes(json.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Truncated {
                modality: Modality::Hand,
                expected: HAND_LANDMARKS,
                found: 5
            }
        ));
    }

    #[test]
    fn empty_landmark_list_is_rejected() {
        let err = Packet::from_bytes(br#"{"landmarks":[]}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Empty));
    }

    #[test]
    fn unknown_handedness_label_is_rejected() {
        let json = r#"{"landmarks":[{"type":"hand","x":0.5,"y":0.5,"z":0.0,"handedness":"Both"}]}"#;
        assert!(matches!(
            Packet::from_bytes(json.as_bytes()),
            Err(DecodeError::Json(_))
        ));
    }
}
