//! Trigger event types
//!
//! Shared by every trigger source and by the manager's event queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Selectable trigger mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Keyboard,
    Gpio,
    Http,
    Websocket,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Keyboard => "keyboard",
            TriggerType::Gpio => "gpio",
            TriggerType::Http => "http",
            TriggerType::Websocket => "websocket",
            TriggerType::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyboard" => Ok(TriggerType::Keyboard),
            "gpio" => Ok(TriggerType::Gpio),
            "http" => Ok(TriggerType::Http),
            "websocket" => Ok(TriggerType::Websocket),
            "manual" => Ok(TriggerType::Manual),
            other => Err(TriggerError::UnsupportedType(other.to_string())),
        }
    }
}

/// Origin of a trigger event. Same names as [`TriggerType`]; a manual event
/// can arrive while any type is selected.
pub type TriggerKind = TriggerType;

/// A single trigger occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: TriggerKind,

    /// Sub-origin, e.g. "space", "pin17", "http_post"
    pub source: String,

    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(kind: TriggerKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Trigger subsystem errors
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Unsupported trigger type: {0}")]
    UnsupportedType(String),

    #[error("Trigger type '{0}' is not in the allowed list")]
    NotAllowed(TriggerType),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("GPIO backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Trigger source error: {0}")]
    Source(String),
}

impl TriggerError {
    /// Configuration errors are the caller's to fix; everything else is a
    /// resource problem on the host.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TriggerError::UnsupportedType(_)
                | TriggerError::NotAllowed(_)
                | TriggerError::Configuration(_)
                | TriggerError::BackendUnavailable(_)
        )
    }
}

pub type TriggerResult<T> = Result<T, TriggerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trigger_type() {
        assert_eq!("http".parse::<TriggerType>().unwrap(), TriggerType::Http);
        assert_eq!(" GPIO ".parse::<TriggerType>().unwrap(), TriggerType::Gpio);
        assert!(matches!(
            "carrier-pigeon".parse::<TriggerType>(),
            Err(TriggerError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_serde_names_match_display() {
        for kind in [
            TriggerType::Keyboard,
            TriggerType::Gpio,
            TriggerType::Http,
            TriggerType::Websocket,
            TriggerType::Manual,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn test_error_classification() {
        assert!(TriggerError::NotAllowed(TriggerType::Gpio).is_configuration());
        assert!(!TriggerError::Source("boom".into()).is_configuration());
    }
}
