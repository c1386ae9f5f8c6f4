//! Event recorder
//!
//! Caller-side glue between the trigger manager and the capture engine:
//! every trigger becomes one clip file.

pub mod coordinator;
pub mod state;

pub use coordinator::{clip_file_name, RecorderCoordinator};
pub use state::{RecorderEvent, RecorderState, SaveWindow};
