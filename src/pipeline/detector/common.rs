use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::{
    config::ScoreActivation,
    types::{Classification, DetectedHand, Frame, Modality, RawLandmark},
};

use super::{ModelSpec, palm::HandCrop};

/// Floats per point in each model's landmark tensor.
pub fn point_stride(modality: Modality) -> usize {
    match modality {
        // x, y, z, visibility, presence
        Modality::Pose => 5,
        Modality::Hand | Modality::Face => 3,
    }
}

/// Maps model input pixels back to the source frame.
#[derive(Clone, Debug, PartialEq)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

/// Maps a point in model input pixels to frame-relative coordinates.
/// `z` shares the x scale, as MediaPipe models report it.
pub trait FrameProjection {
    fn to_frame_relative(&self, x: f32, y: f32, z: f32) -> (f32, f32, f32);
}

impl LetterboxInfo {
    pub fn to_frame_pixels(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

impl FrameProjection for LetterboxInfo {
    fn to_frame_relative(&self, x: f32, y: f32, z: f32) -> (f32, f32, f32) {
        let (px, py) = self.to_frame_pixels(x, y);
        (
            px / self.orig_w.max(1) as f32,
            py / self.orig_h.max(1) as f32,
            z / self.scale / self.orig_w.max(1) as f32,
        )
    }
}

/// Maps hand model input pixels back through a rotated crop.
#[derive(Clone, Debug, PartialEq)]
pub struct CropTransform {
    pub crop: HandCrop,
    pub output_size: u32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl CropTransform {
    /// Frame pixels per crop pixel.
    fn scale(&self) -> f32 {
        self.crop.side / self.output_size as f32
    }

    pub fn to_frame_pixels(&self, x: f32, y: f32) -> (f32, f32) {
        let half = self.output_size as f32 / 2.0;
        let scale = self.scale();
        let (dx, dy) = ((x - half) * scale, (y - half) * scale);
        let (sin, cos) = self.crop.angle.sin_cos();
        (
            self.crop.center.0 + dx * cos - dy * sin,
            self.crop.center.1 + dx * sin + dy * cos,
        )
    }
}

impl FrameProjection for CropTransform {
    fn to_frame_relative(&self, x: f32, y: f32, z: f32) -> (f32, f32, f32) {
        let (px, py) = self.to_frame_pixels(x, y);
        let w = self.orig_w.max(1) as f32;
        (px / w, py / self.orig_h.max(1) as f32, z * self.scale() / w)
    }
}

/// Letterboxes the frame into a `target_size` square NHWC tensor in [0, 1].
pub fn prepare_frame_with_size(
    frame: &Frame,
    target_size: u32,
) -> Result<(Array4<f32>, LetterboxInfo)> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.width == 0 || frame.height == 0 || frame.rgba.len() != expected_len {
        return Err(anyhow!(
            "frame buffer size mismatch: got {} bytes for {}x{}",
            frame.rgba.len(),
            frame.width,
            frame.height
        ));
    }

    let scale = target_size as f32 / (frame.width.max(frame.height) as f32);
    let new_w = ((frame.width as f32 * scale).round().max(1.0) as u32).min(target_size);
    let new_h = ((frame.height as f32 * scale).round().max(1.0) as u32).min(target_size);

    let src_image = fir::images::ImageRef::new(
        frame.width,
        frame.height,
        &frame.rgba,
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    fir::Resizer::new()
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let pad_x = ((target_size - new_w) / 2) as usize;
    let pad_y = ((target_size - new_h) / 2) as usize;
    let side = target_size as usize;

    let mut input = vec![0f32; side * side * 3];
    let src_stride = new_w as usize * 4;
    input
        .par_chunks_exact_mut(side * 3)
        .enumerate()
        .skip(pad_y)
        .take(new_h as usize)
        .for_each(|(row, dst)| {
            let src = &resized[(row - pad_y) * src_stride..(row - pad_y + 1) * src_stride];
            for (x, px) in src.chunks_exact(4).enumerate() {
                let offset = (pad_x + x) * 3;
                dst[offset] = px[0] as f32 / 255.0;
                dst[offset + 1] = px[1] as f32 / 255.0;
                dst[offset + 2] = px[2] as f32 / 255.0;
            }
        });

    let input = Array4::<f32>::from_shape_vec((1, side, side, 3), input)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    let letterbox = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    Ok((input, letterbox))
}

/// Samples a rotated square crop of the frame into an `output_size` NHWC
/// tensor in [0, 1]. Areas outside the frame are black.
pub fn prepare_rotated_crop(
    frame: &Frame,
    crop: &HandCrop,
    output_size: u32,
) -> Result<(Array4<f32>, CropTransform)> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.width == 0 || frame.height == 0 || frame.rgba.len() != expected_len {
        return Err(anyhow!(
            "frame buffer size mismatch: got {} bytes for {}x{}",
            frame.rgba.len(),
            frame.width,
            frame.height
        ));
    }

    let transform = CropTransform {
        crop: *crop,
        output_size,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    let side = output_size as usize;
    let mut data = vec![0f32; side * side * 3];
    data.par_chunks_exact_mut(side * 3)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                // sample at pixel centers
                let (sx, sy) = transform.to_frame_pixels(x as f32 + 0.5, y as f32 + 0.5);
                px.copy_from_slice(&sample_bilinear(frame, sx, sy));
            }
        });

    let input = Array4::<f32>::from_shape_vec((1, side, side, 3), data)
        .map_err(|err| anyhow!("failed to build crop tensor: {err}"))?;
    Ok((input, transform))
}

fn sample_bilinear(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    if !(x.is_finite() && y.is_finite()) {
        return [0.0; 3];
    }
    // shift so integer coordinates land on pixel centers
    let (x, y) = (x - 0.5, y - 0.5);
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);

    let texel = |tx: f32, ty: f32| -> [f32; 3] {
        if tx < 0.0 || ty < 0.0 || tx >= frame.width as f32 || ty >= frame.height as f32 {
            return [0.0; 3];
        }
        let idx = (ty as usize * frame.width as usize + tx as usize) * 4;
        [
            frame.rgba[idx] as f32 / 255.0,
            frame.rgba[idx + 1] as f32 / 255.0,
            frame.rgba[idx + 2] as f32 / 255.0,
        ]
    };

    let (c00, c10) = (texel(x0, y0), texel(x0 + 1.0, y0));
    let (c01, c11) = (texel(x0, y0 + 1.0), texel(x0 + 1.0, y0 + 1.0));
    std::array::from_fn(|c| {
        let top = c00[c] + (c10[c] - c00[c]) * fx;
        let bottom = c01[c] + (c11[c] - c01[c]) * fx;
        top + (bottom - top) * fy
    })
}

pub fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

fn activate(value: f32, activation: ScoreActivation) -> f32 {
    match activation {
        ScoreActivation::None => value,
        ScoreActivation::Sigmoid => sigmoid(value),
    }
}

/// Output of one landmark model for one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Pose(Vec<RawLandmark>),
    Hand(DetectedHand),
    Face(Vec<RawLandmark>),
}

/// Decodes flattened model outputs: `[landmarks, presence, handedness?]`.
/// Returns `None` when the presence score is below the model's threshold.
pub fn decode_outputs(
    spec: &ModelSpec,
    outputs: &[Vec<f32>],
    projection: &impl FrameProjection,
) -> Result<Option<Decoded>> {
    let coords = outputs
        .first()
        .ok_or_else(|| anyhow!("model returned no outputs"))?;

    // Models without a presence head always report.
    let presence = outputs
        .get(1)
        .and_then(|scores| scores.first().copied())
        .map(|raw| activate(raw, spec.activation))
        .unwrap_or(1.0);
    if !(presence >= spec.min_presence) {
        return Ok(None);
    }

    let count = spec.modality.point_count();
    let stride = point_stride(spec.modality);
    if coords.len() < count * stride {
        return Err(anyhow!(
            "unexpected {} landmarks length: got {}, need {}",
            spec.modality,
            coords.len(),
            count * stride
        ));
    }

    let points: Vec<RawLandmark> = coords
        .chunks_exact(stride)
        .take(count)
        .map(|chunk| {
            let (x, y, z) = projection.to_frame_relative(chunk[0], chunk[1], chunk[2]);
            RawLandmark {
                x,
                y,
                z,
                visibility: (spec.modality == Modality::Pose).then(|| sigmoid(chunk[3])),
            }
        })
        .collect();

    let decoded = match spec.modality {
        Modality::Pose => Decoded::Pose(points),
        Modality::Face => Decoded::Face(points),
        Modality::Hand => {
            let classifications = outputs
                .get(2)
                .and_then(|values| values.first().copied())
                .map(|right| {
                    let (label, score) = if right >= 0.5 {
                        ("Right", right)
                    } else {
                        ("Left", 1.0 - right)
                    };
                    vec![Classification {
                        label: label.to_string(),
                        score,
                    }]
                })
                .unwrap_or_default();
            Decoded::Hand(DetectedHand {
                landmarks: points,
                classifications,
            })
        }
    };

    Ok(Some(decoded))
}

/// Decodes one hand model run per palm crop. Crops whose presence falls
/// below the threshold are dropped; order follows `crops`.
pub fn decode_hand_crops(
    spec: &ModelSpec,
    crops: &[(Vec<Vec<f32>>, CropTransform)],
) -> Result<Vec<DetectedHand>> {
    let mut hands = Vec::with_capacity(crops.len());
    for (outputs, transform) in crops {
        match decode_outputs(spec, outputs, transform)? {
            Some(Decoded::Hand(hand)) => hands.push(hand),
            Some(_) => return Err(anyhow!("{} model decoded as a hand crop", spec.modality)),
            None => {}
        }
    }
    Ok(hands)
}
