//! Camera capture
//!
//! Camera backends, the byte-budgeted frame buffer and the capture engine
//! that ties them together.

pub mod buffer;
pub mod engine;
pub mod synthetic;
pub mod traits;

#[cfg(feature = "webcam")]
pub mod webcam;

pub use buffer::{BufferError, EncodedFrame, FrameBuffer};
pub use engine::{CaptureEngine, CaptureSettings, Clip, SaveReport};
pub use synthetic::SyntheticBackend;
pub use traits::{
    CameraBackend, CameraFormat, CameraInfo, CaptureError, CaptureResult, Frame, FrameSource,
    Resolution,
};

#[cfg(feature = "webcam")]
pub use webcam::{get_cameras, WebcamBackend};

use std::sync::Arc;

/// Backend used when none is chosen explicitly: the real webcam when the
/// crate is built with it, the test pattern otherwise.
pub fn default_backend() -> Arc<dyn CameraBackend> {
    #[cfg(feature = "webcam")]
    {
        Arc::new(WebcamBackend::new())
    }
    #[cfg(not(feature = "webcam"))]
    {
        tracing::warn!("Built without the webcam feature, using the synthetic camera");
        Arc::new(SyntheticBackend::new())
    }
}
