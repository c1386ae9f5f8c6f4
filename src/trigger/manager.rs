//! Trigger manager
//!
//! Owns the single active trigger source and the shared event queue. Sources
//! push from their own threads; the caller pulls with [`TriggerManager::get_trigger`].

use crate::config::TriggerConfig;
use crate::trigger::source::{SourceChannels, TriggerSource};
use crate::trigger::types::{TriggerError, TriggerEvent, TriggerResult, TriggerType};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::Arc;

struct ManagerState {
    trigger_type: TriggerType,
    active: Option<TriggerSource>,
    running: bool,
}

pub struct TriggerManager {
    config: TriggerConfig,
    state: Mutex<ManagerState>,
    channels: SourceChannels,
    events: Receiver<TriggerEvent>,
    control: Receiver<TriggerType>,
}

impl TriggerManager {
    pub fn new(config: TriggerConfig) -> Self {
        let (events_tx, events) = crossbeam_channel::unbounded();
        let (control_tx, control) = crossbeam_channel::unbounded();
        let trigger_type = config.default_type;

        Self {
            config,
            state: Mutex::new(ManagerState {
                trigger_type,
                active: None,
                running: false,
            }),
            channels: SourceChannels {
                events: events_tx,
                control: control_tx,
                reported_type: Arc::new(RwLock::new(trigger_type)),
            },
            events,
            control,
        }
    }

    /// Currently selected trigger type
    pub fn trigger_type(&self) -> TriggerType {
        self.state.lock().trigger_type
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Types that may be selected
    pub fn available_types(&self) -> &[TriggerType] {
        &self.config.available_types
    }

    /// Bound address of the active network source, if any
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().active.as_ref().and_then(|s| s.local_addr())
    }

    /// Sender for injecting events from outside the active source
    pub fn event_sender(&self) -> Sender<TriggerEvent> {
        self.channels.events.clone()
    }

    /// Start the source for the selected type. No-op when already running.
    pub fn start_listening(&self) -> TriggerResult<()> {
        let mut state = self.state.lock();
        if state.running {
            return Ok(());
        }
        self.start_locked(&mut state)
    }

    /// Stop the active source, if any. Cleanup continues past errors.
    pub fn stop_listening(&self) {
        let mut state = self.state.lock();
        Self::stop_locked(&mut state);
    }

    /// Select another trigger type, restarting the source if running.
    ///
    /// Types outside the allow-list are rejected and nothing changes. If the
    /// new source fails to start, the new type stays selected and the
    /// manager is left stopped.
    pub fn set_trigger_type(&self, trigger_type: TriggerType) -> TriggerResult<()> {
        if !self.config.available_types.contains(&trigger_type) {
            tracing::warn!("Rejected trigger type '{}'", trigger_type);
            return Err(TriggerError::NotAllowed(trigger_type));
        }

        let mut state = self.state.lock();
        let was_running = state.running;
        if was_running {
            Self::stop_locked(&mut state);
        }

        tracing::info!("Trigger type {} -> {}", state.trigger_type, trigger_type);
        state.trigger_type = trigger_type;
        *self.channels.reported_type.write() = trigger_type;

        if was_running {
            self.start_locked(&mut state)?;
        }
        Ok(())
    }

    /// Queue a manual trigger. Ignored unless listening.
    pub fn manual_trigger(&self) {
        if !self.state.lock().running {
            tracing::debug!("Manual trigger ignored, not listening");
            return;
        }
        tracing::info!("Manual trigger");
        let _ = self
            .channels
            .events
            .send(TriggerEvent::new(TriggerType::Manual, "manual"));
    }

    /// Next queued event, without blocking.
    ///
    /// Applies any pending remote reconfiguration first.
    pub fn get_trigger(&self) -> Option<TriggerEvent> {
        self.apply_pending_config();
        self.events.try_recv().ok()
    }

    /// Apply the latest type change requested by a remote source.
    ///
    /// Returns the type switched to, if any.
    pub fn apply_pending_config(&self) -> Option<TriggerType> {
        let requested = self.control.try_iter().last()?;
        if requested == self.trigger_type() {
            return None;
        }

        match self.set_trigger_type(requested) {
            Ok(()) => Some(requested),
            Err(e) => {
                tracing::error!("Failed to switch trigger type to {}: {}", requested, e);
                None
            }
        }
    }

    fn start_locked(&self, state: &mut ManagerState) -> TriggerResult<()> {
        let kind = state.trigger_type;
        let mut source = TriggerSource::build(kind, &self.config, &self.channels)?;

        if let Err(e) = source.start() {
            tracing::error!("Failed to start {} trigger: {}", kind, e);
            if let Err(cleanup) = source.stop() {
                tracing::warn!("Cleanup after failed start: {}", cleanup);
            }
            return Err(e);
        }

        state.active = Some(source);
        state.running = true;
        *self.channels.reported_type.write() = kind;
        tracing::info!("Listening for {} triggers", kind);
        Ok(())
    }

    fn stop_locked(state: &mut ManagerState) {
        state.running = false;
        if let Some(mut source) = state.active.take() {
            let kind = source.kind();
            if let Err(e) = source.stop() {
                tracing::warn!("Error stopping {} trigger: {}", kind, e);
            }
            tracing::info!("Stopped {} trigger", kind);
        }
    }
}

impl Drop for TriggerManager {
    fn drop(&mut self) {
        Self::stop_locked(self.state.get_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GpioBackendKind;
    use crate::trigger::http::tests::request;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    fn config(default_type: TriggerType) -> TriggerConfig {
        TriggerConfig {
            default_type,
            available_types: vec![
                TriggerType::Gpio,
                TriggerType::Http,
                TriggerType::Websocket,
                TriggerType::Manual,
            ],
            bind_address: "127.0.0.1".to_string(),
            http_port: 0,
            websocket_port: 0,
            gpio_chip: PathBuf::from("/nonexistent/gpiochip9"),
            gpio_backend: GpioBackendKind::Cdev,
            ..TriggerConfig::default()
        }
    }

    fn wait_for_event(manager: &TriggerManager) -> TriggerEvent {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            if let Some(event) = manager.get_trigger() {
                return event;
            }
            assert!(Instant::now() < deadline, "no trigger event arrived");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_disallowed_type_leaves_state_unchanged() {
        let mut cfg = config(TriggerType::Manual);
        cfg.available_types = vec![TriggerType::Manual, TriggerType::Http];
        let manager = TriggerManager::new(cfg);

        let err = manager.set_trigger_type(TriggerType::Gpio).unwrap_err();
        assert!(matches!(err, TriggerError::NotAllowed(TriggerType::Gpio)));
        assert!(err.is_configuration());
        assert_eq!(manager.trigger_type(), TriggerType::Manual);
    }

    #[test]
    fn test_manual_trigger_only_while_running() {
        let manager = TriggerManager::new(config(TriggerType::Manual));

        manager.manual_trigger();
        assert!(manager.get_trigger().is_none());

        manager.start_listening().unwrap();
        manager.manual_trigger();
        let event = manager.get_trigger().unwrap();
        assert_eq!(event.kind, TriggerType::Manual);
        assert!(manager.get_trigger().is_none());

        manager.stop_listening();
        manager.stop_listening();
        assert!(!manager.is_running());
    }

    #[test]
    fn test_events_are_fifo() {
        let manager = TriggerManager::new(config(TriggerType::Manual));
        manager.start_listening().unwrap();

        let sender = manager.event_sender();
        sender.send(TriggerEvent::new(TriggerType::Http, "first")).unwrap();
        manager.manual_trigger();
        sender.send(TriggerEvent::new(TriggerType::Http, "third")).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| manager.get_trigger())
            .map(|e| e.source)
            .collect();
        assert_eq!(order, vec!["first", "manual", "third"]);
    }

    #[test]
    fn test_socket_trigger_reaches_queue() {
        let manager = TriggerManager::new(config(TriggerType::Websocket));
        manager.start_listening().unwrap();
        let addr = manager.local_addr().unwrap();

        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"trigger\n").unwrap();
        drop(stream);

        let event = wait_for_event(&manager);
        assert_eq!(event.kind, TriggerType::Websocket);
        manager.stop_listening();
    }

    #[test]
    fn test_switch_releases_previous_port() {
        let manager = TriggerManager::new(config(TriggerType::Websocket));
        manager.start_listening().unwrap();
        let socket_addr = manager.local_addr().unwrap();

        manager.set_trigger_type(TriggerType::Http).unwrap();
        assert!(manager.is_running());
        assert_eq!(manager.trigger_type(), TriggerType::Http);
        let http_addr = manager.local_addr().unwrap();

        // Old port is free, the new one is served
        TcpListener::bind(socket_addr).unwrap();
        let (status, _) = request(http_addr, "GET", "/status", None);
        assert_eq!(status, 200);

        manager.stop_listening();
        TcpListener::bind(http_addr).unwrap();
    }

    #[test]
    fn test_unavailable_gpio_rolls_back() {
        let manager = TriggerManager::new(config(TriggerType::Gpio));
        let err = manager.start_listening().unwrap_err();
        assert!(matches!(err, TriggerError::BackendUnavailable(_)));
        assert!(err.is_configuration());
        assert!(!manager.is_running());
        assert!(manager.local_addr().is_none());
    }

    #[test]
    fn test_http_config_applied_on_caller_thread() {
        let manager = TriggerManager::new(config(TriggerType::Http));
        manager.start_listening().unwrap();
        let addr = manager.local_addr().unwrap();

        let (status, _) = request(addr, "POST", "/trigger", Some(r#"{"source":"test"}"#));
        assert_eq!(status, 200);
        let (status, _) = request(
            addr,
            "POST",
            "/config",
            Some(r#"{"trigger_type":"websocket"}"#),
        );
        assert_eq!(status, 200);
        let (_, body) = request(addr, "GET", "/status", None);
        assert_eq!(body["trigger_type"], "websocket");

        // Switch happens on the next poll
        assert_eq!(manager.trigger_type(), TriggerType::Http);
        let event = manager.get_trigger().unwrap();
        assert_eq!(event.kind, TriggerType::Http);
        assert_eq!(event.source, "test");
        assert_eq!(manager.trigger_type(), TriggerType::Websocket);
        assert!(manager.is_running());

        // HTTP listener is gone
        TcpListener::bind(addr).unwrap();
        manager.stop_listening();
    }
}
