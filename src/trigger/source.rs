//! Trigger source variants
//!
//! Exactly one [`TriggerSource`] is active at a time. Each variant owns its
//! OS resources and releases them in `stop`.

use crate::config::TriggerConfig;
use crate::trigger::gpio::GpioTrigger;
use crate::trigger::http::HttpTrigger;
use crate::trigger::keyboard::KeyboardTrigger;
use crate::trigger::socket::SocketTrigger;
use crate::trigger::types::{TriggerEvent, TriggerResult, TriggerType};
use crossbeam_channel::Sender;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on how long a source's `stop` waits for its thread
pub const SOURCE_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// How often source loops re-check their running flag
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Channels from a source back to the manager
#[derive(Clone)]
pub struct SourceChannels {
    /// Trigger event queue
    pub events: Sender<TriggerEvent>,

    /// Reconfiguration requests, applied on the manager caller's thread
    pub control: Sender<TriggerType>,

    /// Type reported to remote callers
    pub reported_type: Arc<RwLock<TriggerType>>,
}

/// Drops repeats that arrive within `window` of the last accepted one
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Returns true if an input at `now` should produce an event
    pub fn accept(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// The active trigger mechanism
pub enum TriggerSource {
    Keyboard(KeyboardTrigger),
    Gpio(GpioTrigger),
    Http(HttpTrigger),
    Websocket(SocketTrigger),
    /// Nothing to listen to; events come from `manual_trigger`
    Manual,
}

impl TriggerSource {
    /// Construct (but do not start) the source for `kind`
    pub fn build(
        kind: TriggerType,
        config: &TriggerConfig,
        channels: &SourceChannels,
    ) -> TriggerResult<Self> {
        Ok(match kind {
            TriggerType::Keyboard => TriggerSource::Keyboard(KeyboardTrigger::new(
                &config.keyboard_key,
                config.keyboard_raw_mode,
                Duration::from_millis(config.keyboard_debounce_ms),
                channels.events.clone(),
            )?),
            TriggerType::Gpio => TriggerSource::Gpio(GpioTrigger::new(
                config.gpio_chip.clone(),
                config.gpio_pin,
                config.gpio_backend,
                Duration::from_millis(config.gpio_debounce_ms),
                channels.events.clone(),
            )),
            TriggerType::Http => TriggerSource::Http(HttpTrigger::new(
                &config.bind_address,
                config.http_port,
                config.available_types.clone(),
                channels.clone(),
            )),
            TriggerType::Websocket => TriggerSource::Websocket(SocketTrigger::new(
                &config.bind_address,
                config.websocket_port,
                channels.events.clone(),
            )),
            TriggerType::Manual => TriggerSource::Manual,
        })
    }

    pub fn kind(&self) -> TriggerType {
        match self {
            TriggerSource::Keyboard(_) => TriggerType::Keyboard,
            TriggerSource::Gpio(_) => TriggerType::Gpio,
            TriggerSource::Http(_) => TriggerType::Http,
            TriggerSource::Websocket(_) => TriggerType::Websocket,
            TriggerSource::Manual => TriggerType::Manual,
        }
    }

    pub fn start(&mut self) -> TriggerResult<()> {
        match self {
            TriggerSource::Keyboard(s) => s.start(),
            TriggerSource::Gpio(s) => s.start(),
            TriggerSource::Http(s) => s.start(),
            TriggerSource::Websocket(s) => s.start(),
            TriggerSource::Manual => Ok(()),
        }
    }

    /// Release everything the source holds. Safe on a source that never
    /// started or only partly started.
    pub fn stop(&mut self) -> TriggerResult<()> {
        match self {
            TriggerSource::Keyboard(s) => s.stop(),
            TriggerSource::Gpio(s) => s.stop(),
            TriggerSource::Http(s) => s.stop(),
            TriggerSource::Websocket(s) => s.stop(),
            TriggerSource::Manual => Ok(()),
        }
    }

    /// Bound address of a network source
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            TriggerSource::Http(s) => s.local_addr(),
            TriggerSource::Websocket(s) => s.local_addr(),
            _ => None,
        }
    }
}
