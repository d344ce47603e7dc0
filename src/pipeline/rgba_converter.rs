use std::convert::TryFrom;

use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::error::CaptureError;

/// Pixel layouts a camera may hand us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Nv12,
    Yuyv,
    Mjpeg,
    Rgb,
    Bgr,
    Gray,
}

#[derive(Debug)]
pub struct RgbaImage {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[cfg(feature = "camera-nokhwa")]
pub fn convert_camera_buffer(buffer: &nokhwa::Buffer) -> Result<RgbaImage, CaptureError> {
    use nokhwa::utils::FrameFormat;

    let layout = match buffer.source_frame_format() {
        FrameFormat::NV12 => PixelLayout::Nv12,
        FrameFormat::YUYV => PixelLayout::Yuyv,
        FrameFormat::MJPEG => PixelLayout::Mjpeg,
        FrameFormat::RAWRGB => PixelLayout::Rgb,
        FrameFormat::RAWBGR => PixelLayout::Bgr,
        FrameFormat::GRAY => PixelLayout::Gray,
    };
    let resolution = buffer.resolution();
    to_rgba(
        layout,
        buffer.buffer(),
        resolution.width_x,
        resolution.height_y,
    )
}

pub fn to_rgba(
    layout: PixelLayout,
    data: &[u8],
    width: u32,
    height: u32,
) -> Result<RgbaImage, CaptureError> {
    if width == 0 || height == 0 {
        return Err(decode_err(format!("empty {layout:?} frame {width}x{height}")));
    }

    let (rgba, width, height) = match layout {
        PixelLayout::Nv12 => (nv12_to_rgba(data, width, height)?, width, height),
        PixelLayout::Yuyv => (yuyv_to_rgba(data, width, height)?, width, height),
        PixelLayout::Mjpeg => mjpeg_to_rgba(data)?,
        PixelLayout::Rgb => (packed_to_rgba(data, width, height, false)?, width, height),
        PixelLayout::Bgr => (packed_to_rgba(data, width, height, true)?, width, height),
        PixelLayout::Gray => (gray_to_rgba(data, width, height)?, width, height),
    };

    Ok(RgbaImage {
        rgba,
        width,
        height,
    })
}

fn decode_err(message: String) -> CaptureError {
    CaptureError::Decode(message)
}

fn ensure_len(label: &str, data: &[u8], expected: usize) -> Result<(), CaptureError> {
    if data.len() < expected {
        return Err(decode_err(format!(
            "{label} buffer too small: got {}, expected {expected}",
            data.len()
        )));
    }
    Ok(())
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CaptureError> {
    let y_plane_len = width as usize * height as usize;
    let uv_plane_len = y_plane_len / 2;
    ensure_len("NV12", data, y_plane_len + uv_plane_len)?;

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_plane_len],
        y_stride: width,
        uv_plane: &data[y_plane_len..y_plane_len + uv_plane_len],
        uv_stride: width,
        width,
        height,
    };

    let mut rgba = vec![0u8; y_plane_len * 4];
    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| decode_err(format!("NV12→RGBA failed: {err:?}")))?;

    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CaptureError> {
    ensure_len("YUYV", data, width as usize * height as usize * 2)?;

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    let mut rgba = vec![0u8; width as usize * height as usize * 4];
    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| decode_err(format!("YUYV422→RGBA failed: {err:?}")))?;

    Ok(rgba)
}

/// MJPEG carries its own dimensions, which win over the negotiated ones.
fn mjpeg_to_rgba(data: &[u8]) -> Result<(Vec<u8>, u32, u32), CaptureError> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| decode_err(format!("MJPEG decode failed: {err:?}")))?;

    let info = decoder
        .info()
        .ok_or_else(|| decode_err("MJPEG header missing".to_string()))?;
    let width = u32::try_from(info.width)
        .map_err(|_| decode_err("MJPEG width does not fit u32".to_string()))?;
    let height = u32::try_from(info.height)
        .map_err(|_| decode_err("MJPEG height does not fit u32".to_string()))?;
    let expected = usize::try_from(u64::from(width) * u64::from(height) * 4)
        .map_err(|_| decode_err("MJPEG dimensions do not fit usize".to_string()))?;
    ensure_len("MJPEG output", &rgba, expected)?;

    Ok((rgba, width, height))
}

fn packed_to_rgba(
    data: &[u8],
    width: u32,
    height: u32,
    swap_rb: bool,
) -> Result<Vec<u8>, CaptureError> {
    let label = if swap_rb { "BGR" } else { "RGB" };
    ensure_len(label, data, width as usize * height as usize * 3)?;

    let mut rgba = vec![0u8; width as usize * height as usize * 4];
    rgba.par_chunks_exact_mut(4)
        .zip(data.par_chunks_exact(3))
        .for_each(|(dst, src)| {
            let (r, b) = if swap_rb {
                (src[2], src[0])
            } else {
                (src[0], src[2])
            };
            dst.copy_from_slice(&[r, src[1], b, 255]);
        });

    Ok(rgba)
}

fn gray_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CaptureError> {
    let pixels = width as usize * height as usize;
    ensure_len("GRAY", data, pixels)?;

    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_exact_mut(4)
        .zip(data[..pixels].par_iter().copied())
        .for_each(|(dst, value)| dst.copy_from_slice(&[value, value, value, 255]));

    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swaps_channels_for_bgr() {
        let bgr = [10u8, 20, 30, 40, 50, 60];
        let image = to_rgba(PixelLayout::Bgr, &bgr, 2, 1).unwrap();
        assert_eq!(image.rgba, vec![30, 20, 10, 255, 60, 50, 40, 255]);
    }

    #[test]
    fn keeps_channels_for_rgb() {
        let rgb = [1u8, 2, 3];
        let image = to_rgba(PixelLayout::Rgb, &rgb, 1, 1).unwrap();
        assert_eq!(image.rgba, vec![1, 2, 3, 255]);
    }

    #[test]
    fn expands_gray() {
        let image = to_rgba(PixelLayout::Gray, &[7u8, 9], 2, 1).unwrap();
        assert_eq!(image.rgba, vec![7, 7, 7, 255, 9, 9, 9, 255]);
        assert_eq!((image.width, image.height), (2, 1));
    }

    #[test]
    fn short_buffers_are_decode_errors() {
        let err = to_rgba(PixelLayout::Yuyv, &[0u8; 4], 4, 4).unwrap_err();
        assert!(matches!(err, CaptureError::Decode(_)));
    }

    #[test]
    fn garbage_mjpeg_is_a_decode_error() {
        let err = to_rgba(PixelLayout::Mjpeg, &[0u8, 1, 2, 3], 2, 2).unwrap_err();
        assert!(matches!(err, CaptureError::Decode(_)));
    }
}
