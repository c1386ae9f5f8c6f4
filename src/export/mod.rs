//! Clip export module
//!
//! Encodes assembled frame sequences into video files.

pub mod ffmpeg;
pub mod types;

pub use ffmpeg::{ffmpeg_available, VideoEncoder};
pub use types::ExportError;
