//! Export types
//!
//! Output format constants and errors for writing saved clips.

use thiserror::Error;

/// Container of every saved clip
pub const CONTAINER: &str = "mp4";

/// FFmpeg video codec for saved clips (MPEG-4 Part 2, fourcc `mp4v`)
pub const VIDEO_CODEC: &str = "mpeg4";

/// Fixed encoder quantizer for `mpeg4` (2 = best, 31 = worst)
pub const VIDEO_QSCALE: u8 = 3;

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Encoding error: {0}")]
    Encoding(String),
}
