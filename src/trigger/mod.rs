//! Trigger sources
//!
//! Keyboard, GPIO, HTTP, raw socket and manual triggers, normalized into one
//! FIFO of [`TriggerEvent`]s by the [`TriggerManager`].

pub mod gpio;
pub mod http;
pub mod keyboard;
pub mod manager;
pub mod socket;
pub mod source;
pub mod types;

pub use manager::TriggerManager;
pub use source::TriggerSource;
pub use types::{TriggerError, TriggerEvent, TriggerKind, TriggerResult, TriggerType};
