//! FFmpeg encoder wrapper
//!
//! Raw RGB frames are piped into an `ffmpeg` child process. Output goes to a
//! hidden sibling file that is renamed onto the requested path only once
//! FFmpeg exits successfully, so a failed save never leaves a file that looks
//! like a finished clip.

use crate::capture::traits::Frame;
use crate::export::types::{ExportError, CONTAINER, VIDEO_CODEC, VIDEO_QSCALE};
use image::imageops::{self, FilterType};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// Check whether an `ffmpeg` binary can be started
pub fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Path FFmpeg writes to before the clip is complete
fn partial_path(output_path: &Path) -> PathBuf {
    let name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "clip".to_string());
    output_path.with_file_name(format!(".{name}.part"))
}

/// Build the FFmpeg argument list for a raw rgb24 stdin stream
fn build_encoder_args(width: u32, height: u32, fps: u32, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "-s".to_string(),
        format!("{}x{}", width, height),
        "-r".to_string(),
        fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
    ];
    // yuv420p needs even dimensions; pad odd ones by a pixel
    if width % 2 != 0 || height % 2 != 0 {
        args.push("-vf".to_string());
        args.push("pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string());
    }
    args.extend([
        "-c:v".to_string(),
        VIDEO_CODEC.to_string(),
        "-q:v".to_string(),
        VIDEO_QSCALE.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-f".to_string(),
        CONTAINER.to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

/// Video encoder writing one clip
pub struct VideoEncoder {
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    width: u32,
    height: u32,
    frame_count: u64,
    partial_path: PathBuf,
    output_path: PathBuf,
}

impl VideoEncoder {
    /// Start FFmpeg for a `width`x`height` clip at `fps`
    pub fn create(output_path: &Path, width: u32, height: u32, fps: u32) -> Result<Self, ExportError> {
        if width == 0 || height == 0 || fps == 0 {
            return Err(ExportError::InvalidConfig(format!(
                "cannot encode {}x{} @ {}fps",
                width, height, fps
            )));
        }
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let partial_path = partial_path(output_path);
        let args = build_encoder_args(width, height, fps, &partial_path);
        tracing::info!("Starting FFmpeg encoder: {:?}", args);

        let mut process = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExportError::Ffmpeg(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| ExportError::Ffmpeg("Failed to capture FFmpeg stdin".to_string()))?;

        Ok(Self {
            process: Some(process),
            stdin: Some(stdin),
            width,
            height,
            frame_count: 0,
            partial_path,
            output_path: output_path.to_path_buf(),
        })
    }

    /// Write a frame, scaling it first if it does not match the clip size
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), ExportError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ExportError::Encoding("encoder already finished".to_string()))?;

        let write_result = if frame.dimensions() == (self.width, self.height) {
            stdin.write_all(frame.as_raw())
        } else {
            let scaled = imageops::resize(frame, self.width, self.height, FilterType::Triangle);
            stdin.write_all(scaled.as_raw())
        };
        write_result.map_err(|e| ExportError::Encoding(format!("Failed to write frame: {}", e)))?;

        self.frame_count += 1;
        Ok(())
    }

    /// Get number of frames written
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Close the stream, wait for FFmpeg and move the clip into place.
    ///
    /// Returns the number of frames written.
    pub fn finish(mut self) -> Result<u64, ExportError> {
        // Close stdin to signal EOF to FFmpeg
        drop(self.stdin.take());

        let process = self
            .process
            .take()
            .ok_or_else(|| ExportError::Ffmpeg("encoder process missing".to_string()))?;
        let output = process
            .wait_with_output()
            .map_err(|e| ExportError::Ffmpeg(format!("Failed to wait for FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExportError::Ffmpeg(format!(
                "FFmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        std::fs::rename(&self.partial_path, &self.output_path)?;

        tracing::info!(
            "FFmpeg encoder finished: {} frames written to {:?}",
            self.frame_count,
            self.output_path
        );
        Ok(self.frame_count)
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut process) = self.process.take() {
            // Not finished: abandon the clip
            let _ = process.kill();
            let _ = process.wait();
        }
        if self.partial_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.partial_path) {
                tracing::warn!("Failed to remove partial clip {:?}: {}", self.partial_path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::tempdir;

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        let partial = partial_path(Path::new("/tmp/clips/record_1.mp4"));
        assert_eq!(partial, PathBuf::from("/tmp/clips/.record_1.mp4.part"));
    }

    #[test]
    fn test_encoder_args() {
        let args = build_encoder_args(640, 480, 30, Path::new("out.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-s 640x480"));
        assert!(joined.contains("-r 30"));
        assert!(joined.contains("-c:v mpeg4"));
        assert!(joined.contains("-f mp4"));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_odd_dimensions_are_padded() {
        let args = build_encoder_args(639, 479, 30, Path::new("out.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-s 639x479"));
        assert!(joined.contains("-vf pad=ceil(iw/2)*2:ceil(ih/2)*2"));

        let even = build_encoder_args(640, 480, 30, Path::new("out.mp4"));
        assert!(!even.iter().any(|a| a == "-vf"));
    }

    #[test]
    fn test_rejects_zero_dimensions() {
        let dir = tempdir().unwrap();
        let result = VideoEncoder::create(&dir.path().join("x.mp4"), 0, 480, 30);
        assert!(matches!(result, Err(ExportError::InvalidConfig(_))));
    }

    #[test]
    fn test_encode_odd_size_clip() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not found, skipping");
            return;
        }
        let dir = tempdir().unwrap();
        let output = dir.path().join("odd.mp4");

        let mut encoder = VideoEncoder::create(&output, 63, 47, 10).unwrap();
        for _ in 0..5 {
            encoder
                .write_frame(&Frame::from_pixel(63, 47, Rgb([40, 80, 120])))
                .unwrap();
        }
        assert_eq!(encoder.finish().unwrap(), 5);
        assert!(output.exists());
    }

    #[test]
    fn test_encode_clip() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not found, skipping");
            return;
        }
        let dir = tempdir().unwrap();
        let output = dir.path().join("clip.mp4");

        let mut encoder = VideoEncoder::create(&output, 64, 48, 10).unwrap();
        for i in 0..10u8 {
            encoder
                .write_frame(&Frame::from_pixel(64, 48, Rgb([i * 20, 0, 0])))
                .unwrap();
        }
        // A mismatched frame is scaled rather than corrupting the stream
        encoder
            .write_frame(&Frame::from_pixel(32, 24, Rgb([0, 255, 0])))
            .unwrap();
        assert_eq!(encoder.finish().unwrap(), 11);

        assert!(output.exists());
        assert!(!partial_path(&output).exists());
    }

    #[test]
    fn test_dropped_encoder_leaves_no_file() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not found, skipping");
            return;
        }
        let dir = tempdir().unwrap();
        let output = dir.path().join("abandoned.mp4");
        {
            let mut encoder = VideoEncoder::create(&output, 64, 48, 10).unwrap();
            encoder
                .write_frame(&Frame::from_pixel(64, 48, Rgb([1, 2, 3])))
                .unwrap();
        }
        assert!(!output.exists());
        assert!(!partial_path(&output).exists());
    }
}
