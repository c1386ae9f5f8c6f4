//! Recorder coordinator
//!
//! Polls the trigger manager on its own thread and saves a clip around every
//! trigger it receives.

use super::state::{RecorderEvent, RecorderState, SaveWindow};
use crate::capture::{CameraFormat, CaptureEngine, SaveReport};
use crate::config::Config;
use crate::trigger::{TriggerEvent, TriggerManager};
use crate::utils::thread::join_with_timeout;
use crate::utils::{AppError, AppResult, ErrorResponse};
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::broadcast;

/// How often the trigger queue is polled
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Clip file name for a trigger at `at`
pub fn clip_file_name(at: DateTime<Local>) -> String {
    format!("record_{}.mp4", at.format("%Y%m%d_%H%M%S"))
}

/// First free path for a clip in `dir`; a second trigger within the same
/// second gets a numeric suffix.
fn unique_clip_path(dir: &Path, at: DateTime<Local>) -> PathBuf {
    let path = dir.join(clip_file_name(at));
    if !path.exists() {
        return path;
    }
    let stem = format!("record_{}", at.format("%Y%m%d_%H%M%S"));
    (1u32..)
        .map(|n| dir.join(format!("{}_{}.mp4", stem, n)))
        .find(|p| !p.exists())
        .unwrap_or(path)
}

/// Shared between the coordinator handle and its polling thread
struct Inner {
    engine: Arc<CaptureEngine>,
    triggers: Arc<TriggerManager>,
    output_dir: PathBuf,
    min_time: u32,
    max_time: u32,
    window: RwLock<SaveWindow>,
    state: RwLock<RecorderState>,
    event_tx: broadcast::Sender<RecorderEvent>,
}

/// Connects trigger events to clip saves
pub struct RecorderCoordinator {
    inner: Arc<Inner>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,

    /// How long `stop` waits for a save in progress
    stop_timeout: Duration,
}

impl RecorderCoordinator {
    pub fn new(engine: Arc<CaptureEngine>, triggers: Arc<TriggerManager>, config: &Config) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let rec = &config.recording;
        let stop_timeout = Duration::from_secs(rec.max_time as u64 * 2)
            + Duration::from_millis(rec.post_trigger_grace_ms)
            + Duration::from_secs(10);

        Self {
            inner: Arc::new(Inner {
                engine,
                triggers,
                output_dir: rec.output_dir.clone(),
                min_time: rec.min_time,
                max_time: rec.max_time,
                window: RwLock::new(SaveWindow {
                    before_seconds: rec.default_before_time,
                    after_seconds: rec.default_after_time,
                }),
                state: RwLock::new(RecorderState::Idle),
                event_tx,
            }),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            stop_timeout,
        }
    }

    pub fn state(&self) -> RecorderState {
        *self.inner.state.read()
    }

    /// Subscribe to recorder events
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn window(&self) -> SaveWindow {
        *self.inner.window.read()
    }

    /// Change the save window. Both values must lie within `min_time..=max_time`.
    pub fn set_window(&self, before_seconds: u32, after_seconds: u32) -> AppResult<()> {
        let range = self.inner.min_time..=self.inner.max_time;
        for (name, value) in [("before", before_seconds), ("after", after_seconds)] {
            if !range.contains(&value) {
                return Err(AppError::Recorder(format!(
                    "{} time {}s outside {}..={}s",
                    name, value, self.inner.min_time, self.inner.max_time
                )));
            }
        }
        *self.inner.window.write() = SaveWindow {
            before_seconds,
            after_seconds,
        };
        Ok(())
    }

    pub fn output_dir(&self) -> &Path {
        &self.inner.output_dir
    }

    /// Start capture on `device`, start listening for triggers and begin
    /// polling. Capture is stopped again if the trigger source fails.
    pub fn start(&self, device: u32) -> AppResult<CameraFormat> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(AppError::Recorder("recorder already running".to_string()));
        }

        std::fs::create_dir_all(&self.inner.output_dir)?;

        let format = self.inner.engine.start_capture(device)?;
        if let Err(e) = self.inner.triggers.start_listening() {
            self.inner.engine.stop_capture();
            return Err(e.into());
        }

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name("recorder".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match inner.triggers.get_trigger() {
                        Some(event) => {
                            let _ = inner.handle_trigger(event);
                        }
                        None => thread::sleep(POLL_INTERVAL),
                    }
                }
            });

        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.inner.triggers.stop_listening();
                self.inner.engine.stop_capture();
                return Err(e.into());
            }
        }

        *self.inner.state.write() = RecorderState::Armed;
        tracing::info!(
            "Recorder armed: {}x{} @ {}fps, saving to {:?}",
            format.width,
            format.height,
            format.fps,
            self.inner.output_dir
        );
        Ok(format)
    }

    /// Stop polling, triggers and capture. No-op when idle.
    pub fn stop(&self) {
        let handle = self.worker.lock().take();
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = handle {
            tracing::info!("Stopping recorder");
            join_with_timeout(handle, self.stop_timeout, "recorder");
        }

        self.inner.triggers.stop_listening();
        self.inner.engine.stop_capture();
        *self.inner.state.write() = RecorderState::Idle;
    }

    /// Save a clip for `event` with the current window, on the calling thread
    pub fn handle_trigger(&self, event: TriggerEvent) -> AppResult<SaveReport> {
        self.inner.handle_trigger(event)
    }
}

impl Inner {
    fn handle_trigger(&self, event: TriggerEvent) -> AppResult<SaveReport> {
        tracing::info!("Trigger received: {} ({})", event.kind, event.source);
        let _ = self.event_tx.send(RecorderEvent::TriggerReceived(event));

        let window = *self.window.read();
        let path = unique_clip_path(&self.output_dir, Local::now());

        let previous = std::mem::replace(&mut *self.state.write(), RecorderState::Saving);
        let _ = self
            .event_tx
            .send(RecorderEvent::SaveStarted { path: path.clone() });

        let result = self
            .engine
            .save_video(&path, window.before_seconds, window.after_seconds)
            .map_err(AppError::from);

        {
            let mut state = self.state.write();
            if *state == RecorderState::Saving {
                *state = previous;
            }
        }

        match result {
            Ok(report) => {
                tracing::info!(
                    "Saved {:?}: {} frames{}",
                    report.path,
                    report.frames_written,
                    if report.timed_out { " (post-trigger wait timed out)" } else { "" }
                );
                let _ = self.event_tx.send(RecorderEvent::SaveCompleted(report.clone()));
                Ok(report)
            }
            Err(e) => {
                tracing::error!("Failed to save {:?}: {}", path, e);
                let error = ErrorResponse {
                    code: e.code().to_string(),
                    message: e.to_string(),
                };
                let _ = self.event_tx.send(RecorderEvent::SaveFailed { path, error });
                Err(e)
            }
        }
    }
}

impl Drop for RecorderCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}
