//! Webcam capture using nokhwa
//!
//! Opens a native camera, asks for the configured format and reports back
//! whatever the device negotiated. Frames are decoded to RGB on read.

use crate::capture::traits::{
    CameraBackend, CameraFormat, CameraInfo, CaptureError, CaptureResult, Frame, FrameSource,
    Resolution,
};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat as NokhwaFormat, CameraIndex, FrameFormat,
    RequestedFormat, RequestedFormatType, Resolution as NokhwaResolution,
};
use nokhwa::Camera;

/// Get list of available cameras
pub fn get_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };

                // Common resolutions
                let resolutions = vec![
                    Resolution {
                        width: 1920,
                        height: 1080,
                    },
                    Resolution {
                        width: 1280,
                        height: 720,
                    },
                    Resolution {
                        width: 640,
                        height: 480,
                    },
                ];

                CameraInfo {
                    id,
                    name: info.human_name().to_string(),
                    supported_resolutions: resolutions,
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// Native camera backend
#[derive(Debug, Default, Clone)]
pub struct WebcamBackend;

impl WebcamBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CameraBackend for WebcamBackend {
    fn name(&self) -> &str {
        "webcam"
    }

    fn open(&self, device: u32, requested: CameraFormat) -> CaptureResult<Box<dyn FrameSource>> {
        let open_failed = |reason: String| CaptureError::OpenFailed { device, reason };

        let wanted = NokhwaFormat::new(
            NokhwaResolution::new(requested.width, requested.height),
            FrameFormat::MJPEG,
            requested.fps,
        );
        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));

        let mut camera = Camera::new(CameraIndex::Index(device), format)
            .map_err(|e| open_failed(format!("{e:?}")))?;

        if let Err(e) = camera.open_stream() {
            return Err(open_failed(format!("failed to open stream: {e:?}")));
        }

        // The device may not honor the request; read back what it chose
        let negotiated = camera.camera_format();
        let actual = CameraFormat::new(
            negotiated.resolution().width(),
            negotiated.resolution().height(),
            negotiated.frame_rate(),
        );

        tracing::info!(
            "Webcam opened: {}x{} @ {}fps, format={:?} (requested {}x{} @ {}fps)",
            actual.width,
            actual.height,
            actual.fps,
            negotiated.format(),
            requested.width,
            requested.height,
            requested.fps
        );

        Ok(Box::new(WebcamStream {
            camera,
            format: actual,
        }))
    }

    fn list_cameras(&self) -> Vec<CameraInfo> {
        get_cameras()
    }
}

/// An open nokhwa stream
struct WebcamStream {
    camera: Camera,
    format: CameraFormat,
}

impl FrameSource for WebcamStream {
    fn format(&self) -> CameraFormat {
        self.format
    }

    fn read_frame(&mut self) -> CaptureResult<Frame> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| CaptureError::ReadFailed(format!("{e:?}")))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CaptureError::ReadFailed(format!("decode failed: {e:?}")))?;

        // Rebuild through raw bytes so nokhwa's image version does not leak out
        let (width, height) = (decoded.width(), decoded.height());
        Frame::from_raw(width, height, decoded.into_raw()).ok_or_else(|| {
            CaptureError::ReadFailed(format!("frame buffer does not match {width}x{height}"))
        })
    }
}

impl Drop for WebcamStream {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("Error stopping camera stream: {:?}", e);
        }
    }
}
