//! GPIO button trigger
//!
//! A falling edge on an active-low, pulled-up input line fires a trigger.
//! The line is read through one of two backends; debounce and edge polarity
//! are handled here so both behave the same.

#[cfg(target_os = "linux")]
pub mod cdev;
pub mod sysfs;

use crate::config::GpioBackendKind;
use crate::trigger::source::{Debouncer, POLL_INTERVAL, SOURCE_STOP_TIMEOUT};
use crate::trigger::types::{TriggerError, TriggerEvent, TriggerResult, TriggerType};
use crate::utils::thread::join_with_timeout;
use crossbeam_channel::Sender;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Consumer label registered with the kernel for the requested line
pub const GPIO_CONSUMER: &str = "eventcam";

/// An input line configured for falling-edge detection.
///
/// Dropping the line releases it.
pub trait GpioLine: Send {
    fn backend_name(&self) -> &'static str;

    /// Wait up to `timeout` for a falling edge. Returns `Ok(false)` on timeout.
    fn wait_falling_edge(&mut self, timeout: Duration) -> TriggerResult<bool>;
}

/// Open `pin` with the requested backend, resolving `Auto` by what the host
/// provides.
pub fn open_line(
    kind: GpioBackendKind,
    chip: &Path,
    pin: u32,
) -> TriggerResult<Box<dyn GpioLine>> {
    match kind {
        GpioBackendKind::Cdev => open_cdev(chip, pin),
        GpioBackendKind::Sysfs => Ok(Box::new(sysfs::SysfsLine::open(pin)?)),
        GpioBackendKind::Auto => {
            if cfg!(target_os = "linux") && chip.exists() {
                open_cdev(chip, pin)
            } else if Path::new(sysfs::SYSFS_GPIO_ROOT).exists() {
                Ok(Box::new(sysfs::SysfsLine::open(pin)?))
            } else {
                Err(TriggerError::BackendUnavailable(format!(
                    "neither {:?} nor {} exists on this host",
                    chip,
                    sysfs::SYSFS_GPIO_ROOT
                )))
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn open_cdev(chip: &Path, pin: u32) -> TriggerResult<Box<dyn GpioLine>> {
    Ok(Box::new(cdev::CdevLine::open(chip, pin)?))
}

#[cfg(not(target_os = "linux"))]
fn open_cdev(_chip: &Path, _pin: u32) -> TriggerResult<Box<dyn GpioLine>> {
    Err(TriggerError::BackendUnavailable(
        "GPIO character devices are only available on Linux".to_string(),
    ))
}

/// GPIO button trigger
pub struct GpioTrigger {
    chip: PathBuf,
    pin: u32,
    backend: GpioBackendKind,
    debounce: Duration,
    events: Sender<TriggerEvent>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl GpioTrigger {
    pub fn new(
        chip: PathBuf,
        pin: u32,
        backend: GpioBackendKind,
        debounce: Duration,
        events: Sender<TriggerEvent>,
    ) -> Self {
        Self {
            chip,
            pin,
            backend,
            debounce,
            events,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn start(&mut self) -> TriggerResult<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        let line = open_line(self.backend, &self.chip, self.pin)?;
        self.start_with_line(line)
    }

    /// Start watching an already opened line
    pub fn start_with_line(&mut self, mut line: Box<dyn GpioLine>) -> TriggerResult<()> {
        tracing::info!(
            "GPIO trigger on pin {} via {} (debounce {:?})",
            self.pin,
            line.backend_name(),
            self.debounce
        );

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let events = self.events.clone();
        let label = format!("pin{}", self.pin);
        let mut debouncer = Debouncer::new(self.debounce);

        let spawned = thread::Builder::new()
            .name("gpio-trigger".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match line.wait_falling_edge(POLL_INTERVAL) {
                        Ok(true) => {
                            if !debouncer.accept(Instant::now()) {
                                continue;
                            }
                            tracing::info!("GPIO trigger: {}", label);
                            if events
                                .send(TriggerEvent::new(TriggerType::Gpio, label.clone()))
                                .is_err()
                            {
                                break;
                            }
                        }
                        Ok(false) => {}
                        Err(e) => {
                            tracing::error!("GPIO read failed, trigger stopped: {}", e);
                            break;
                        }
                    }
                }
                // Releases the line
                drop(line);
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(TriggerError::Io(e))
            }
        }
    }

    pub fn stop(&mut self) -> TriggerResult<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if !join_with_timeout(handle, SOURCE_STOP_TIMEOUT, "gpio-trigger") {
                return Err(TriggerError::Source(format!(
                    "GPIO pin {} not released within {:?}",
                    self.pin, SOURCE_STOP_TIMEOUT
                )));
            }
        }
        Ok(())
    }
}

impl Drop for GpioTrigger {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{Receiver, RecvTimeoutError};

    /// Line driven by the test through a channel
    struct ScriptedLine {
        edges: Receiver<()>,
        released: Arc<AtomicBool>,
    }

    impl GpioLine for ScriptedLine {
        fn backend_name(&self) -> &'static str {
            "scripted"
        }

        fn wait_falling_edge(&mut self, timeout: Duration) -> TriggerResult<bool> {
            match self.edges.recv_timeout(timeout) {
                Ok(()) => Ok(true),
                Err(RecvTimeoutError::Timeout) => Ok(false),
                Err(RecvTimeoutError::Disconnected) => {
                    thread::sleep(timeout);
                    Ok(false)
                }
            }
        }
    }

    impl Drop for ScriptedLine {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn scripted_trigger(
        debounce: Duration,
    ) -> (GpioTrigger, Sender<()>, Receiver<TriggerEvent>, Arc<AtomicBool>) {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (edge_tx, edge_rx) = crossbeam_channel::unbounded();
        let released = Arc::new(AtomicBool::new(false));
        let mut trigger = GpioTrigger::new(
            PathBuf::from("/dev/null"),
            17,
            GpioBackendKind::Cdev,
            debounce,
            events_tx,
        );
        trigger
            .start_with_line(Box::new(ScriptedLine {
                edges: edge_rx,
                released: released.clone(),
            }))
            .unwrap();
        (trigger, edge_tx, events_rx, released)
    }

    #[test]
    fn test_bounce_produces_single_event() {
        let (mut trigger, edges, events, _) = scripted_trigger(Duration::from_millis(200));

        for _ in 0..5 {
            edges.send(()).unwrap();
        }
        let event = events.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.kind, TriggerType::Gpio);
        assert_eq!(event.source, "pin17");
        assert!(events.recv_timeout(Duration::from_millis(100)).is_err());

        thread::sleep(Duration::from_millis(250));
        edges.send(()).unwrap();
        assert!(events.recv_timeout(Duration::from_secs(1)).is_ok());

        trigger.stop().unwrap();
    }

    #[test]
    fn test_stop_releases_line() {
        let (mut trigger, _edges, _events, released) = scripted_trigger(Duration::from_millis(50));
        trigger.stop().unwrap();
        assert!(released.load(Ordering::SeqCst));
        trigger.stop().unwrap();
    }

    #[test]
    fn test_missing_chip_is_unavailable() {
        let result = open_line(
            GpioBackendKind::Cdev,
            Path::new("/nonexistent/gpiochip9"),
            17,
        );
        match result {
            Err(e) => assert!(matches!(e, TriggerError::BackendUnavailable(_))),
            Ok(_) => panic!("opened a nonexistent chip"),
        }
    }
}
