use rayon::prelude::*;

use crate::{error::CaptureError, types::Frame};

#[cfg(feature = "camera-nokhwa")]
pub use self::device::{CameraDevice, CameraSource, available_cameras};

/// Produces one frame per call, blocking until it is available.
pub trait FrameSource {
    fn read(&mut self) -> Result<Frame, CaptureError>;
}

/// Flips an RGBA frame around its vertical axis in place.
pub fn mirror_horizontal(rgba: &mut [u8], width: u32) {
    let stride = width as usize * 4;
    if stride == 0 {
        return;
    }
    rgba.par_chunks_exact_mut(stride).for_each(|row| {
        let pixels = width as usize;
        for x in 0..pixels / 2 {
            let (left, right) = row.split_at_mut((pixels - 1 - x) * 4);
            left[x * 4..x * 4 + 4].swap_with_slice(&mut right[..4]);
        }
    });
}

#[cfg(feature = "camera-nokhwa")]
mod device {
    use std::time::Instant;

    use nokhwa::{
        Camera,
        pixel_format::RgbFormat,
        query,
        utils::{
            ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat,
            RequestedFormatType,
        },
    };

    use super::{FrameSource, mirror_horizontal};
    use crate::{
        config::CameraConfig, error::CaptureError, pipeline::rgba_converter, types::Frame,
    };

    // Built-in macOS cameras often reject YUYV even though Nokhwa reports it.
    const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
        FrameFormat::RAWRGB,
        FrameFormat::RAWBGR,
        FrameFormat::GRAY,
        FrameFormat::YUYV,
        FrameFormat::NV12,
        FrameFormat::MJPEG,
    ];

    fn requested_formats() -> [RequestedFormat<'static>; 4] {
        [
            RequestedFormat::with_formats(
                RequestedFormatType::AbsoluteHighestFrameRate,
                PREFERRED_PIXEL_FORMATS,
            ),
            RequestedFormat::with_formats(
                RequestedFormatType::AbsoluteHighestResolution,
                PREFERRED_PIXEL_FORMATS,
            ),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
        ]
    }

    #[derive(Clone, Debug)]
    pub struct CameraDevice {
        pub index: CameraIndex,
        pub label: String,
    }

    pub fn available_cameras() -> Result<Vec<CameraDevice>, CaptureError> {
        let cameras =
            query(ApiBackend::Auto).map_err(|err| CaptureError::Unavailable(err.to_string()))?;
        Ok(cameras
            .into_iter()
            .map(|info: CameraInfo| CameraDevice {
                index: info.index().clone(),
                label: info.human_name(),
            })
            .collect())
    }

    fn open_camera(index: CameraIndex) -> Result<Camera, CaptureError> {
        let mut last_err = None;

        for requested in requested_formats() {
            match Camera::new(index.clone(), requested) {
                Ok(mut camera) => match camera.open_stream() {
                    Ok(()) => return Ok(camera),
                    Err(err) => last_err = Some(err),
                },
                Err(err) => last_err = Some(err),
            }
        }

        Err(CaptureError::Unavailable(match last_err {
            Some(err) => format!("camera {index}: {err}"),
            None => format!("camera {index}: no supported format"),
        }))
    }

    /// Exclusive owner of one capture device; the stream is closed on drop.
    pub struct CameraSource {
        camera: Camera,
        mirror: bool,
        max_decode_failures: u32,
        next_index: u64,
    }

    impl CameraSource {
        pub fn open(config: &CameraConfig) -> Result<Self, CaptureError> {
            let camera = open_camera(CameraIndex::Index(config.index))?;
            log::info!(
                "camera {} opened: {} @ {} fps",
                config.index,
                camera.camera_format(),
                camera.frame_rate()
            );
            Ok(Self {
                camera,
                mirror: config.mirror,
                max_decode_failures: config.max_decode_failures,
                next_index: 0,
            })
        }
    }

    impl FrameSource for CameraSource {
        fn read(&mut self) -> Result<Frame, CaptureError> {
            let mut decode_failures = 0;
            loop {
                let buffer = self
                    .camera
                    .frame()
                    .map_err(|err| CaptureError::Read(err.to_string()))?;
                let timestamp = Instant::now();

                let image = match rgba_converter::convert_camera_buffer(&buffer) {
                    Ok(image) => image,
                    Err(err) if decode_failures < self.max_decode_failures => {
                        decode_failures += 1;
                        log::warn!("skipping undecodable camera buffer: {err}");
                        continue;
                    }
                    Err(err) => return Err(err),
                };

                let mut rgba = image.rgba;
                if self.mirror {
                    mirror_horizontal(&mut rgba, image.width);
                }

                let index = self.next_index;
                self.next_index += 1;
                return Ok(Frame {
                    index,
                    rgba,
                    width: image.width,
                    height: image.height,
                    timestamp,
                });
            }
        }
    }

    impl Drop for CameraSource {
        fn drop(&mut self) {
            if let Err(err) = self.camera.stop_stream() {
                log::warn!("failed to stop camera stream: {err}");
            } else {
                log::debug!("camera stream closed");
            }
        }
    }
}
