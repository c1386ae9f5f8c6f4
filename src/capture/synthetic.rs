//! Test-pattern camera
//!
//! Produces a moving gradient so the whole pipeline can run without hardware.
//! Also used by the tests to simulate devices that negotiate different
//! parameters, refuse to open, or stop delivering frames.

use crate::capture::traits::{
    CameraBackend, CameraFormat, CameraInfo, CaptureError, CaptureResult, Frame, FrameSource,
    Resolution,
};
use image::Rgb;
use std::time::Duration;

/// Camera backend producing synthetic frames
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    /// Largest format the fake device accepts; requests are clamped to it
    limits: CameraFormat,

    /// Fail every read after this many frames
    fail_after: Option<u64>,

    /// Refuse to open at all
    fail_open: bool,

    /// Time each read blocks, simulating a device slower than requested
    read_delay: Duration,

    /// Time `open` blocks before the device answers
    open_delay: Duration,

    /// Every Nth frame is full-size noise that compresses badly
    noise_every: Option<u64>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self {
            limits: CameraFormat::new(1920, 1080, 60),
            fail_after: None,
            fail_open: false,
            read_delay: Duration::ZERO,
            open_delay: Duration::ZERO,
            noise_every: None,
        }
    }

    pub fn with_limits(mut self, limits: CameraFormat) -> Self {
        self.limits = limits;
        self
    }

    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Make every `n`th frame an 8x larger noise image
    pub fn with_noise_every(mut self, n: u64) -> Self {
        self.noise_every = Some(n.max(1));
        self
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&self, device: u32, requested: CameraFormat) -> CaptureResult<Box<dyn FrameSource>> {
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        if self.fail_open {
            return Err(CaptureError::OpenFailed {
                device,
                reason: "synthetic device configured to fail".to_string(),
            });
        }

        let format = CameraFormat::new(
            requested.width.clamp(1, self.limits.width),
            requested.height.clamp(1, self.limits.height),
            requested.fps.clamp(1, self.limits.fps),
        );
        tracing::info!(
            "Synthetic camera {} opened: {}x{} @ {}fps (requested {}x{} @ {}fps)",
            device,
            format.width,
            format.height,
            format.fps,
            requested.width,
            requested.height,
            requested.fps
        );

        Ok(Box::new(SyntheticCamera {
            format,
            frame_index: 0,
            fail_after: self.fail_after,
            read_delay: self.read_delay,
            noise_every: self.noise_every,
        }))
    }

    fn list_cameras(&self) -> Vec<CameraInfo> {
        vec![CameraInfo {
            id: "0".to_string(),
            name: "Synthetic test pattern".to_string(),
            supported_resolutions: vec![self.limits.resolution(), Resolution { width: 640, height: 480 }],
        }]
    }
}

/// An open synthetic stream
pub struct SyntheticCamera {
    format: CameraFormat,
    frame_index: u64,
    fail_after: Option<u64>,
    read_delay: Duration,
    noise_every: Option<u64>,
}

/// Pseudo-random noise at 8x the negotiated size
fn noise_frame(format: CameraFormat, seed: u64) -> Frame {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    Frame::from_fn(format.width * 8, format.height * 8, |_, _| {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let bytes = (state >> 32).to_le_bytes();
        Rgb([bytes[0], bytes[1], bytes[2]])
    })
}

impl FrameSource for SyntheticCamera {
    fn format(&self) -> CameraFormat {
        self.format
    }

    fn read_frame(&mut self) -> CaptureResult<Frame> {
        if self.fail_after.is_some_and(|limit| self.frame_index >= limit) {
            return Err(CaptureError::ReadFailed("synthetic device unplugged".to_string()));
        }
        if !self.read_delay.is_zero() {
            std::thread::sleep(self.read_delay);
        }

        if self
            .noise_every
            .is_some_and(|n| self.frame_index % n == n - 1)
        {
            self.frame_index += 1;
            return Ok(noise_frame(self.format, self.frame_index));
        }

        let shift = (self.frame_index % 256) as u32;
        let frame = Frame::from_fn(self.format.width, self.format.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                (shift * 3 % 256) as u8,
            ])
        });
        self.frame_index += 1;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_are_clamped_to_limits() {
        let backend = SyntheticBackend::new().with_limits(CameraFormat::new(320, 240, 15));
        let camera = backend.open(0, CameraFormat::new(640, 480, 30)).unwrap();
        assert_eq!(camera.format(), CameraFormat::new(320, 240, 15));
    }

    #[test]
    fn test_frames_match_negotiated_size() {
        let backend = SyntheticBackend::new();
        let mut camera = backend.open(0, CameraFormat::new(64, 48, 30)).unwrap();
        let frame = camera.read_frame().unwrap();
        assert_eq!(frame.dimensions(), (64, 48));
    }

    #[test]
    fn test_fail_after() {
        let backend = SyntheticBackend::new().failing_after(2);
        let mut camera = backend.open(0, CameraFormat::new(16, 16, 30)).unwrap();
        assert!(camera.read_frame().is_ok());
        assert!(camera.read_frame().is_ok());
        assert!(matches!(camera.read_frame(), Err(CaptureError::ReadFailed(_))));
    }

    #[test]
    fn test_noise_frames_are_oversized() {
        let backend = SyntheticBackend::new().with_noise_every(2);
        let mut camera = backend.open(0, CameraFormat::new(16, 8, 30)).unwrap();
        assert_eq!(camera.read_frame().unwrap().dimensions(), (16, 8));
        assert_eq!(camera.read_frame().unwrap().dimensions(), (128, 64));
        assert_eq!(camera.read_frame().unwrap().dimensions(), (16, 8));
    }

    #[test]
    fn test_fail_open() {
        let backend = SyntheticBackend::new().failing_open();
        assert!(matches!(
            backend.open(3, CameraFormat::new(16, 16, 30)),
            Err(CaptureError::OpenFailed { device: 3, .. })
        ));
    }
}
