//! Local preview: skeleton overlays drawn onto a copy of each frame.
//!
//! Rendering never blocks the transmit path; annotated frames are offered to
//! a bounded channel and dropped when the consumer is busy.

use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::types::{Frame, Landmark, LandmarkSet};

const HAND_CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (5, 9),
    (9, 13),
    (13, 17),
];

const POSE_CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 7),
    (0, 4),
    (4, 5),
    (5, 6),
    (6, 8),
    (9, 10),
    (11, 12),
    (11, 13),
    (13, 15),
    (15, 17),
    (15, 19),
    (15, 21),
    (17, 19),
    (12, 14),
    (14, 16),
    (16, 18),
    (16, 20),
    (16, 22),
    (18, 20),
    (11, 23),
    (12, 24),
    (23, 24),
    (23, 25),
    (24, 26),
    (25, 27),
    (26, 28),
    (27, 29),
    (28, 30),
    (29, 31),
    (30, 32),
    (27, 31),
    (28, 32),
];

const LINE_THICKNESS: i32 = 3;
const POSE_LINE_COLOR: [u8; 4] = [56, 189, 248, 255];
const HAND_LINE_COLOR: [u8; 4] = [16, 185, 129, 255];
const POINT_COLOR: [u8; 4] = [248, 113, 113, 255];
const FACE_POINT_COLOR: [u8; 4] = [244, 114, 182, 230];
/// Pose points this faint are left undrawn.
const MIN_DRAW_VISIBILITY: f32 = 0.5;

pub trait PreviewRenderer {
    fn render(&mut self, frame: &Frame, sets: &[LandmarkSet]);
}

#[derive(Clone, Debug)]
pub struct PreviewFrame {
    pub index: u64,
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Draws overlays and hands the result to whoever holds the receiver.
pub struct OverlayPreview {
    tx: Sender<PreviewFrame>,
}

impl OverlayPreview {
    pub fn new() -> (Self, Receiver<PreviewFrame>) {
        let (tx, rx) = bounded(1);
        (Self { tx }, rx)
    }
}

impl PreviewRenderer for OverlayPreview {
    fn render(&mut self, frame: &Frame, sets: &[LandmarkSet]) {
        let mut rgba = frame.rgba.clone();
        draw_landmarks(&mut rgba, frame.width, frame.height, sets);
        // Drop the frame if the consumer has not caught up.
        let _ = self.tx.try_send(PreviewFrame {
            index: frame.index,
            rgba,
            width: frame.width,
            height: frame.height,
        });
    }
}

/// Writes the latest annotated frame to a PNG at most once per interval.
pub struct SnapshotWriter {
    handle: Option<thread::JoinHandle<()>>,
}

impl SnapshotWriter {
    pub fn spawn(path: PathBuf, interval: Duration, rx: Receiver<PreviewFrame>) -> Self {
        let handle = thread::spawn(move || {
            let mut last_write: Option<Instant> = None;
            while let Ok(frame) = rx.recv() {
                if last_write.is_some_and(|at| at.elapsed() < interval) {
                    continue;
                }
                last_write = Some(Instant::now());

                let Some(image) = image::RgbaImage::from_raw(frame.width, frame.height, frame.rgba)
                else {
                    log::warn!("preview frame {} has a malformed buffer", frame.index);
                    continue;
                };
                if let Err(err) = image.save(&path) {
                    log::warn!("failed to write preview to {}: {err}", path.display());
                }
            }
            log::debug!("preview writer stopped");
        });

        Self {
            handle: Some(handle),
        }
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn draw_landmarks(buffer: &mut [u8], width: u32, height: u32, sets: &[LandmarkSet]) {
    let to_pixel = |p: &Landmark| (p.x * width as f32, p.y * height as f32);

    for set in sets {
        match set {
            LandmarkSet::Pose(points) => {
                let pixels: Vec<Option<(f32, f32)>> = points
                    .iter()
                    .map(|p| (p.visibility >= MIN_DRAW_VISIBILITY).then(|| to_pixel(&p.landmark)))
                    .collect();
                draw_skeleton(buffer, width, height, &pixels, POSE_CONNECTIONS, POSE_LINE_COLOR);
            }
            LandmarkSet::Hand { landmarks, .. } => {
                let pixels: Vec<Option<(f32, f32)>> =
                    landmarks.iter().map(|p| Some(to_pixel(p))).collect();
                draw_skeleton(buffer, width, height, &pixels, HAND_CONNECTIONS, HAND_LINE_COLOR);
            }
            LandmarkSet::Face(points) => {
                for p in points.iter() {
                    let (x, y) = to_pixel(p);
                    draw_circle(buffer, width, height, (x as i32, y as i32), 1, FACE_POINT_COLOR);
                }
            }
        }
    }
}

fn draw_skeleton(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    points: &[Option<(f32, f32)>],
    connections: &[(usize, usize)],
    line_color: [u8; 4],
) {
    for &(a, b) in connections {
        if let (Some(Some(pa)), Some(Some(pb))) = (points.get(a), points.get(b)) {
            draw_line(buffer, width, height, pa, pb, line_color, LINE_THICKNESS);
        }
    }

    let point_radius = LINE_THICKNESS + 1;
    for &(x, y) in points.iter().flatten() {
        draw_circle(
            buffer,
            width,
            height,
            (x as i32, y as i32),
            point_radius,
            POINT_COLOR,
        );
    }
}

fn draw_line(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    p0: &(f32, f32),
    p1: &(f32, f32),
    color: [u8; 4],
    thickness: i32,
) {
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        for ox in -radius..=radius {
            for oy in -radius..=radius {
                if ox.abs() + oy.abs() <= radius {
                    put_pixel_safe(buffer, width, height, x0 + ox, y0 + oy, color);
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    center: (i32, i32),
    radius: i32,
    color: [u8; 4],
) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(buffer, width, height, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel_safe(buffer: &mut [u8], width: u32, height: u32, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    if ux >= width || uy >= height {
        return;
    }
    let idx = ((uy * width + ux) as usize) * 4;
    if idx + 3 < buffer.len() {
        buffer[idx..idx + 4].copy_from_slice(&color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::encoder::tests::{hand_set, pose_set},
        types::Handedness,
    };

    fn blank_frame(width: u32, height: u32) -> Frame {
        Frame {
            index: 7,
            rgba: vec![0; (width * height * 4) as usize],
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn overlay_leaves_source_frame_untouched() {
        let frame = blank_frame(64, 64);
        let (mut preview, rx) = OverlayPreview::new();
        preview.render(&frame, &[hand_set(Some(Handedness::Right))]);

        let annotated = rx.try_recv().unwrap();
        assert_eq!(annotated.index, 7);
        assert!(frame.rgba.iter().all(|&b| b == 0));
        assert!(annotated.rgba.chunks_exact(4).any(|px| px == POINT_COLOR));
    }

    #[test]
    fn render_never_blocks_when_consumer_is_busy() {
        let frame = blank_frame(8, 8);
        let (mut preview, rx) = OverlayPreview::new();
        for _ in 0..5 {
            preview.render(&frame, &[]);
        }
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn invisible_pose_points_are_skipped() {
        let LandmarkSet::Pose(mut points) = pose_set() else {
            unreachable!()
        };
        for p in points.iter_mut() {
            p.visibility = 0.1;
        }
        let mut buffer = vec![0u8; 32 * 32 * 4];
        draw_landmarks(&mut buffer, 32, 32, &[LandmarkSet::Pose(points)]);
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn out_of_bounds_pixels_are_ignored() {
        let mut buffer = vec![0u8; 4 * 4 * 4];
        draw_circle(&mut buffer, 4, 4, (-10, -10), 2, POINT_COLOR);
        draw_line(&mut buffer, 4, 4, &(0.0, 0.0), &(3.0, 3.0), POINT_COLOR, 1);
        assert_eq!(&buffer[0..4], &POINT_COLOR);
        assert_eq!(&buffer[(3 * 4 + 3) * 4..], &POINT_COLOR);
    }
}
