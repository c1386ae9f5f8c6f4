//! Keyboard trigger
//!
//! Reads terminal key events on a listener thread and emits one event per
//! press of the configured key.

use crate::trigger::source::{Debouncer, POLL_INTERVAL, SOURCE_STOP_TIMEOUT};
use crate::trigger::types::{TriggerError, TriggerEvent, TriggerResult, TriggerType};
use crate::utils::thread::join_with_timeout;
use crossbeam_channel::Sender;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Parse a key name from the configuration.
///
/// Accepts "space", "enter", "tab", "esc", "backspace", "f1".."f12" or a
/// single character. Returns the key and its canonical label.
pub fn parse_key(name: &str) -> TriggerResult<(KeyCode, String)> {
    let trimmed = name.trim();
    let lower = trimmed.to_ascii_lowercase();

    let code = match lower.as_str() {
        "space" => KeyCode::Char(' '),
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "esc" | "escape" => KeyCode::Esc,
        "backspace" => KeyCode::Backspace,
        _ => {
            let mut chars = trimmed.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => return Ok((KeyCode::Char(c), c.to_string())),
                _ => match lower.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                    Some(n @ 1..=12) => KeyCode::F(n),
                    _ => {
                        return Err(TriggerError::Configuration(format!(
                            "unknown keyboard key '{}'",
                            name
                        )))
                    }
                },
            }
        }
    };

    let label = match lower.as_str() {
        "return" => "enter".to_string(),
        "escape" => "esc".to_string(),
        other => other.to_string(),
    };
    Ok((code, label))
}

/// Run one non-blocking poll so a missing terminal fails the start
fn check_input(poll: impl FnOnce(Duration) -> std::io::Result<bool>) -> TriggerResult<()> {
    poll(Duration::ZERO)
        .map(|_| ())
        .map_err(|e| TriggerError::Source(format!("Keyboard input unavailable: {}", e)))
}

fn is_ctrl_c(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('C'))
}

/// Terminal key trigger
pub struct KeyboardTrigger {
    key: KeyCode,
    label: String,
    raw_mode: bool,
    debounce: Duration,
    events: Sender<TriggerEvent>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    raw_enabled: bool,
}

impl KeyboardTrigger {
    pub fn new(
        key_name: &str,
        raw_mode: bool,
        debounce: Duration,
        events: Sender<TriggerEvent>,
    ) -> TriggerResult<Self> {
        let (key, label) = parse_key(key_name)?;
        Ok(Self {
            key,
            label,
            raw_mode,
            debounce,
            events,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            raw_enabled: false,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn start(&mut self) -> TriggerResult<()> {
        if self.thread.is_some() {
            return Ok(());
        }

        check_input(event::poll)?;

        if self.raw_mode {
            terminal::enable_raw_mode()
                .map_err(|e| TriggerError::Source(format!("Failed to enable raw mode: {}", e)))?;
            self.raw_enabled = true;
        }

        // Fresh flag so a listener detached by an earlier stop stays stopped
        self.running = Arc::new(AtomicBool::new(true));
        let running = self.running.clone();
        let events = self.events.clone();
        let key = self.key;
        let label = self.label.clone();
        let raw_mode = self.raw_mode;
        let mut debouncer = Debouncer::new(self.debounce);

        let spawned = thread::Builder::new()
            .name("keyboard-trigger".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match event::poll(POLL_INTERVAL) {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(e) => {
                            tracing::error!("Keyboard input unavailable: {}", e);
                            break;
                        }
                    }

                    let key_event = match event::read() {
                        Ok(Event::Key(k)) if k.kind == KeyEventKind::Press => k,
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::error!("Failed to read key event: {}", e);
                            break;
                        }
                    };

                    if raw_mode && is_ctrl_c(&key_event) {
                        // Raw mode swallows the terminal's own SIGINT
                        #[cfg(unix)]
                        unsafe {
                            libc::raise(libc::SIGINT);
                        }
                        continue;
                    }

                    if key_event.code == key && debouncer.accept(Instant::now()) {
                        tracing::info!("Keyboard trigger: {}", label);
                        if events
                            .send(TriggerEvent::new(TriggerType::Keyboard, label.clone()))
                            .is_err()
                        {
                            break;
                        }
                    }
                }
                tracing::debug!("Keyboard listener exited");
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                tracing::info!("Keyboard trigger listening for '{}'", self.label);
                Ok(())
            }
            Err(e) => {
                let _ = self.stop();
                Err(TriggerError::Io(e))
            }
        }
    }

    pub fn stop(&mut self) -> TriggerResult<()> {
        self.running.store(false, Ordering::SeqCst);
        let mut result = Ok(());
        if let Some(handle) = self.thread.take() {
            if !join_with_timeout(handle, SOURCE_STOP_TIMEOUT, "keyboard-trigger") {
                result = Err(TriggerError::Source(format!(
                    "keyboard listener did not exit within {:?}",
                    SOURCE_STOP_TIMEOUT
                )));
            }
        }

        if self.raw_enabled {
            self.raw_enabled = false;
            terminal::disable_raw_mode()
                .map_err(|e| TriggerError::Source(format!("Failed to restore terminal: {}", e)))?;
        }
        result
    }
}

impl Drop for KeyboardTrigger {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("Keyboard trigger cleanup failed: {}", e);
        }
    }
}
