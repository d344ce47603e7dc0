//! Palm detection decoding and hand crop geometry.
//!
//! The palm model is an SSD-style detector: every anchor predicts a box and
//! seven palm keypoints as offsets in input pixels. Regions are mapped back to
//! frame pixels through the letterbox and reduced with NMS. Each kept region
//! becomes a rotated square crop for the hand landmark model.

use std::{cmp::Ordering, f32::consts::PI};

use anyhow::{Result, anyhow};

use super::{PalmSpec, common::LetterboxInfo};

pub const PALM_KEYPOINTS: usize = 7;

/// Feature map strides of the palm model; consecutive equal strides share a grid.
const ANCHOR_STRIDES: [u32; 4] = [8, 16, 16, 16];
const ANCHORS_PER_LAYER: usize = 2;
/// Smallest crop side in frame pixels, before expansion.
const MIN_PALM_EXTENT: f32 = 80.0;
const CROP_EXPANSION: f32 = 2.4;

/// A detected palm in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct PalmRegion {
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    pub keypoints: Vec<(f32, f32)>,
    pub score: f32,
}

/// Square, rotated region of the frame fed to the hand landmark model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HandCrop {
    pub center: (f32, f32),
    pub side: f32,
    /// Radians, rotating crop axes into frame axes.
    pub angle: f32,
}

/// Anchor centers in normalized input coordinates, in model output order.
pub fn generate_anchors(input_size: u32) -> Vec<[f32; 2]> {
    let mut anchors = Vec::new();
    let mut layer = 0;
    while layer < ANCHOR_STRIDES.len() {
        let stride = ANCHOR_STRIDES[layer];
        let mut per_cell = 0;
        while layer < ANCHOR_STRIDES.len() && ANCHOR_STRIDES[layer] == stride {
            per_cell += ANCHORS_PER_LAYER;
            layer += 1;
        }

        let grid = input_size.div_ceil(stride);
        for y in 0..grid {
            for x in 0..grid {
                let center = [
                    (x as f32 + 0.5) / grid as f32,
                    (y as f32 + 0.5) / grid as f32,
                ];
                anchors.extend(std::iter::repeat_n(center, per_cell));
            }
        }
    }
    anchors
}

/// Decodes raw palm outputs into at most `spec.max_regions` regions, highest
/// score first.
///
/// `boxes` is `[anchors, features]` flattened with features
/// `cx, cy, w, h, (kx, ky) * 7`; `scores` holds one logit per anchor.
pub fn decode_palm_outputs(
    boxes: &[f32],
    scores: &[f32],
    anchors: &[[f32; 2]],
    letterbox: &LetterboxInfo,
    spec: &PalmSpec,
) -> Result<Vec<PalmRegion>> {
    if scores.len() != anchors.len() {
        return Err(anyhow!(
            "palm model returned {} scores for {} anchors",
            scores.len(),
            anchors.len()
        ));
    }
    if boxes.len() % anchors.len().max(1) != 0 {
        return Err(anyhow!("palm box tensor of {} values is ragged", boxes.len()));
    }
    let features = boxes.len() / anchors.len().max(1);
    if features < 4 + PALM_KEYPOINTS * 2 {
        return Err(anyhow!("palm box feature dimension too small: {features}"));
    }

    let input = spec.input_size as f32;
    let mut candidates = Vec::new();
    for ((anchor, raw), &logit) in anchors
        .iter()
        .zip(boxes.chunks_exact(features))
        .zip(scores)
    {
        let score = super::common::sigmoid(logit);
        if !(score >= spec.score_threshold) {
            continue;
        }

        // Offsets are in input pixels relative to the anchor center.
        let to_frame = |dx: f32, dy: f32| {
            letterbox.to_frame_pixels((anchor[0] + dx / input) * input, (anchor[1] + dy / input) * input)
        };
        let (cx, cy) = to_frame(raw[0], raw[1]);
        let half_w = raw[2] / 2.0 / letterbox.scale;
        let half_h = raw[3] / 2.0 / letterbox.scale;
        if !(half_w > 0.0 && half_h > 0.0) {
            continue;
        }

        let max_x = letterbox.orig_w.saturating_sub(1) as f32;
        let max_y = letterbox.orig_h.saturating_sub(1) as f32;
        let bbox = [
            (cx - half_w).clamp(0.0, max_x),
            (cy - half_h).clamp(0.0, max_y),
            (cx + half_w).clamp(0.0, max_x),
            (cy + half_h).clamp(0.0, max_y),
        ];

        let keypoints = raw[4..4 + PALM_KEYPOINTS * 2]
            .chunks_exact(2)
            .map(|k| to_frame(k[0], k[1]))
            .collect();

        candidates.push(PalmRegion {
            bbox,
            keypoints,
            score,
        });
    }

    Ok(non_max_suppression(candidates, spec.nms_threshold, spec.max_regions))
}

fn non_max_suppression(
    mut candidates: Vec<PalmRegion>,
    threshold: f32,
    limit: usize,
) -> Vec<PalmRegion> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<PalmRegion> = Vec::new();
    for candidate in candidates {
        if kept.len() >= limit {
            break;
        }
        if kept
            .iter()
            .all(|k| iou(&k.bbox, &candidate.bbox) < threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }

    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Expands a palm into a square crop that covers the whole hand, rotated so
/// the palm points up.
pub fn crop_from_palm(region: &PalmRegion) -> HandCrop {
    let center = match mean(&region.keypoints) {
        Some(center) => center,
        None => (
            (region.bbox[0] + region.bbox[2]) * 0.5,
            (region.bbox[1] + region.bbox[3]) * 0.5,
        ),
    };

    let box_extent = (region.bbox[2] - region.bbox[0])
        .abs()
        .max((region.bbox[3] - region.bbox[1]).abs());
    let keypoint_extent = region
        .keypoints
        .iter()
        .fold(None, |acc: Option<[f32; 4]>, &(x, y)| {
            Some(match acc {
                None => [x, x, y, y],
                Some([x0, x1, y0, y1]) => [x0.min(x), x1.max(x), y0.min(y), y1.max(y)],
            })
        })
        .map_or(0.0, |[x0, x1, y0, y1]| (x1 - x0).max(y1 - y0));

    HandCrop {
        center,
        side: box_extent.max(keypoint_extent).max(MIN_PALM_EXTENT) * CROP_EXPANSION,
        angle: palm_orientation(&region.keypoints),
    }
}

fn mean(points: &[(f32, f32)]) -> Option<(f32, f32)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x, sy + y));
    Some((sx / n, sy / n))
}

/// Angle of the keypoints' principal axis, offset so a vertical palm gives 0.
fn palm_orientation(keypoints: &[(f32, f32)]) -> f32 {
    let Some((mx, my)) = mean(keypoints).filter(|_| keypoints.len() >= 2) else {
        return 0.0;
    };

    let n = keypoints.len() as f32;
    let (xx, xy, yy) = keypoints.iter().fold((0.0, 0.0, 0.0), |(xx, xy, yy), &(x, y)| {
        let (dx, dy) = (x - mx, y - my);
        (xx + dx * dx, xy + dx * dy, yy + dy * dy)
    });
    let (xx, xy, yy) = (xx / n, xy / n, yy / n);

    let half_trace = (xx + yy) * 0.5;
    let major = half_trace + (half_trace * half_trace - (xx * yy - xy * xy)).max(0.0).sqrt();
    let (vx, vy) = if xy.abs() > 1e-6 {
        (major - yy, xy)
    } else if xx >= yy {
        (1.0, 0.0)
    } else {
        (0.0, 1.0)
    };

    vy.atan2(vx) - PI * 0.5
}
