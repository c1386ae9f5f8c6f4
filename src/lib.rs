//! eventcam - event-triggered camera recording.
//!
//! Frames from a camera are kept in a byte-budgeted buffer. When a trigger
//! arrives (keyboard, GPIO button, HTTP request, raw socket or a manual
//! call) a video spanning a window before and after the trigger is written.

pub mod capture;
pub mod config;
pub mod export;
pub mod recorder;
pub mod trigger;
pub mod utils;

pub use capture::{CaptureEngine, CaptureSettings, FrameBuffer};
pub use config::Config;
pub use recorder::RecorderCoordinator;
pub use trigger::{TriggerManager, TriggerType};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`, defaulting to `eventcam=info`. Meant for binaries;
/// the library itself only emits events.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eventcam=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
