//! Shared utilities

pub mod error;
pub mod thread;

pub use error::{AppError, AppResult, ErrorResponse};
