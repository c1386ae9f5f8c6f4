//! Recorder state management
//!
//! The recorder state machine and the events broadcast while it runs.

use crate::capture::SaveReport;
use crate::trigger::TriggerEvent;
use crate::utils::ErrorResponse;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Current state of the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    /// Not capturing
    #[default]
    Idle,
    /// Capturing into the buffer and waiting for triggers
    Armed,
    /// Writing a clip; capture continues
    Saving,
}

/// Events emitted by the recorder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RecorderEvent {
    /// A trigger was taken off the queue
    TriggerReceived(TriggerEvent),

    /// Clip assembly started
    SaveStarted { path: PathBuf },

    /// Clip written
    SaveCompleted(SaveReport),

    /// Clip could not be written
    SaveFailed { path: PathBuf, error: ErrorResponse },
}

/// Pre/post trigger window in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveWindow {
    pub before_seconds: u32,
    pub after_seconds: u32,
}
