//! Capture trait definitions
//!
//! Device-agnostic seams between the capture engine and camera implementations.

use crate::capture::buffer::BufferError;
use crate::export::ExportError;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A decoded frame, RGB8
pub type Frame = RgbImage;

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Capture parameters, either requested or negotiated with the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CameraFormat {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    /// Time between frames; a zero fps is treated as 1
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

/// Information about a camera/webcam
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Supported resolutions
    pub supported_resolutions: Vec<Resolution>,
}

/// Capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open camera {device}: {reason}")]
    OpenFailed { device: u32, reason: String },

    #[error("Failed to read frame: {0}")]
    ReadFailed(String),

    #[error("No frames available for the clip")]
    EmptyClip,

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// An opened camera stream.
///
/// Created and owned by the capture thread (some platform handles cannot
/// cross threads); dropping it releases the device.
pub trait FrameSource {
    /// Parameters the device actually agreed to
    fn format(&self) -> CameraFormat;

    /// Block until the next frame is available
    fn read_frame(&mut self) -> CaptureResult<Frame>;
}

/// Opens cameras. Selected once when the engine is built; `open` runs on
/// the capture thread.
pub trait CameraBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Open `device` asking for `requested`. The returned source reports the
    /// negotiated format, which may differ from the request.
    fn open(&self, device: u32, requested: CameraFormat) -> CaptureResult<Box<dyn FrameSource>>;

    fn list_cameras(&self) -> Vec<CameraInfo> {
        Vec::new()
    }
}
