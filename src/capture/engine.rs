//! Capture engine
//!
//! Owns the camera session, a capture thread that feeds the frame buffer at
//! the negotiated rate, and the clip assembly used when a trigger fires.
//!
//! `save_video` runs on the caller's thread while the capture thread keeps
//! appending; the only state they share is the [`FrameBuffer`] and the
//! session flags.

use crate::capture::buffer::{EncodedFrame, FrameBuffer};
use crate::capture::traits::{
    CameraBackend, CameraFormat, CameraInfo, CaptureError, CaptureResult, Frame, FrameSource,
};
use crate::config::Config;
use crate::export::VideoEncoder;
use crate::utils::thread::join_with_timeout;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Engine parameters
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Format asked of the device
    pub requested: CameraFormat,

    /// Frame buffer budget in bytes
    pub max_bytes: usize,

    /// JPEG quality of buffered frames
    pub quality: u8,

    /// How long the post-trigger wait may run past `after_seconds`
    pub post_trigger_grace: Duration,

    /// How long `stop_capture` waits for the capture thread
    pub join_timeout: Duration,

    /// How long `start_capture` waits for the device to open
    pub open_timeout: Duration,
}

impl CaptureSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            requested: CameraFormat::new(
                config.camera.frame_width,
                config.camera.frame_height,
                config.camera.fps,
            ),
            max_bytes: config.buffer.max_bytes(),
            quality: config.buffer.compression_quality,
            post_trigger_grace: Duration::from_millis(config.recording.post_trigger_grace_ms),
            ..Self::default()
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            requested: CameraFormat::new(640, 480, 30),
            max_bytes: 1024 * 1024 * 1024,
            quality: 90,
            post_trigger_grace: Duration::from_secs(3),
            join_timeout: Duration::from_secs(3),
            open_timeout: Duration::from_secs(10),
        }
    }
}

/// Frames assembled around a trigger, still compressed
#[derive(Debug, Clone)]
pub struct Clip {
    /// Pre-trigger frames followed by post-trigger frames
    pub frames: Vec<EncodedFrame>,

    /// Number of leading frames taken from the buffer at trigger time
    pub pre_trigger: usize,

    /// Number of frames collected after the trigger
    pub post_trigger: usize,

    /// The post-trigger wait hit its deadline
    pub timed_out: bool,

    /// Capture stopped before the post-trigger window was filled
    pub capture_stopped: bool,

    /// Format the clip is encoded at
    pub format: CameraFormat,
}

impl Clip {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Outcome of a successful `save_video`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReport {
    pub path: PathBuf,
    pub pre_trigger_frames: usize,
    pub post_trigger_frames: usize,
    pub frames_written: u64,
    pub timed_out: bool,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub triggered_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Flags owned by one capture thread.
///
/// Every `start_capture` makes a fresh pair, so a thread detached by a timed
/// out stop can only ever see its own (cleared) flags.
#[derive(Debug, Clone, Default)]
struct SessionFlags {
    /// Set while capture is wanted; cleared to ask the loop to exit
    running: Arc<AtomicBool>,

    /// Set while the capture loop is alive
    streaming: Arc<AtomicBool>,
}

/// Camera session plus rolling buffer
pub struct CaptureEngine {
    backend: Arc<dyn CameraBackend>,
    settings: CaptureSettings,
    buffer: Arc<FrameBuffer>,

    /// Flags of the current (or last) session
    session: RwLock<SessionFlags>,

    /// Negotiated format of the current (or last) session
    format: RwLock<CameraFormat>,

    capture_thread: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureEngine {
    pub fn new(backend: Arc<dyn CameraBackend>, settings: CaptureSettings) -> Self {
        let buffer = Arc::new(FrameBuffer::new(settings.max_bytes, settings.quality));
        Self {
            backend,
            format: RwLock::new(settings.requested),
            settings,
            buffer,
            session: RwLock::new(SessionFlags::default()),
            capture_thread: Mutex::new(None),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Devices the backend can open
    pub fn list_cameras(&self) -> Vec<CameraInfo> {
        self.backend.list_cameras()
    }

    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.buffer
    }

    /// Whether the capture loop is alive
    pub fn is_capturing(&self) -> bool {
        self.session.read().streaming.load(Ordering::SeqCst)
    }

    /// Negotiated format, or the requested one before the first session
    pub fn camera_info(&self) -> CameraFormat {
        *self.format.read()
    }

    /// Open `device` and start the capture thread.
    ///
    /// Returns the negotiated format. Calling this while already capturing
    /// returns the current format without reopening the device.
    pub fn start_capture(&self, device: u32) -> CaptureResult<CameraFormat> {
        let mut thread_slot = self.capture_thread.lock();

        if thread_slot.is_some() {
            if self.is_capturing() {
                tracing::warn!("start_capture called while capturing; ignoring");
                return Ok(self.camera_info());
            }
            // Previous loop died on a read error and was never stopped
            drop(thread_slot);
            self.stop_capture();
            thread_slot = self.capture_thread.lock();
        }

        tracing::info!(
            "Starting capture on device {} via {} (requested {}x{} @ {}fps)",
            device,
            self.backend.name(),
            self.settings.requested.width,
            self.settings.requested.height,
            self.settings.requested.fps
        );

        let session = SessionFlags::default();
        session.running.store(true, Ordering::SeqCst);
        *self.session.write() = session.clone();

        let (open_tx, open_rx) = crossbeam_channel::bounded::<CaptureResult<CameraFormat>>(1);
        let backend = self.backend.clone();
        let requested = self.settings.requested;
        let buffer = self.buffer.clone();
        let SessionFlags { running, streaming } = session.clone();

        let spawned = thread::Builder::new()
            .name("capture-loop".to_string())
            .spawn(move || {
                // The device is opened on this thread and never leaves it
                let source = match backend.open(device, requested) {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                let format = source.format();
                if !running.load(Ordering::SeqCst) {
                    // start_capture already gave up on this session
                    return;
                }

                streaming.store(true, Ordering::SeqCst);
                if open_tx.send(Ok(format)).is_err() {
                    // start_capture gave up waiting
                    streaming.store(false, Ordering::SeqCst);
                    return;
                }
                run_capture_loop(source, format, &buffer, &running);
                streaming.store(false, Ordering::SeqCst);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                session.running.store(false, Ordering::SeqCst);
                return Err(CaptureError::Io(e));
            }
        };

        match open_rx.recv_timeout(self.settings.open_timeout) {
            Ok(Ok(format)) => {
                *self.format.write() = format;
                *thread_slot = Some(handle);
                tracing::info!(
                    "Capture started: {}x{} @ {}fps",
                    format.width,
                    format.height,
                    format.fps
                );
                Ok(format)
            }
            Ok(Err(e)) => {
                session.running.store(false, Ordering::SeqCst);
                join_with_timeout(handle, self.settings.join_timeout, "capture");
                tracing::error!("Failed to start capture: {}", e);
                Err(e)
            }
            Err(_) => {
                session.running.store(false, Ordering::SeqCst);
                tracing::error!(
                    "Camera {} did not open within {:?}",
                    device,
                    self.settings.open_timeout
                );
                Err(CaptureError::OpenFailed {
                    device,
                    reason: format!("timed out after {:?}", self.settings.open_timeout),
                })
            }
        }
    }

    /// Stop the capture thread and clear the buffer. No-op when stopped.
    ///
    /// Waits at most the configured join timeout; a thread stuck in a
    /// device read is detached, discards whatever that read returns and
    /// releases the device.
    pub fn stop_capture(&self) {
        let handle = self.capture_thread.lock().take();
        let was_running = self.session.read().running.swap(false, Ordering::SeqCst);
        if handle.is_none() && !was_running {
            return;
        }

        tracing::info!("Stopping capture");
        if let Some(handle) = handle {
            if !join_with_timeout(handle, self.settings.join_timeout, "capture") {
                tracing::warn!("Camera will be released when the pending read returns");
            }
        }

        self.buffer.clear();
        tracing::info!("Capture stopped");
    }

    /// Most recent frame, for preview
    pub fn get_current_frame(&self) -> Option<Frame> {
        self.buffer.latest_frame()
    }

    /// Gather the frames for a clip around "now".
    ///
    /// Takes the last `before_seconds * fps` buffered frames, then waits for
    /// `after_seconds * fps` new ones. The wait ends early if capture stops
    /// and never runs past `after_seconds` plus the grace period.
    pub fn collect_clip(&self, before_seconds: u32, after_seconds: u32) -> Clip {
        let format = self.camera_info();
        let fps = format.fps as usize;
        let before_frames = before_seconds as usize * fps;
        let after_frames = after_seconds as usize * fps;

        let (mut frames, mut last_seq) = self.buffer.snapshot(Some(before_frames));
        let pre_trigger = frames.len();
        if pre_trigger < before_frames {
            tracing::debug!(
                "Buffer holds {} of {} pre-trigger frames, using what is available",
                pre_trigger,
                before_frames
            );
        }

        let interval = format.frame_interval();
        let deadline = Instant::now()
            + Duration::from_secs(after_seconds as u64)
            + self.settings.post_trigger_grace;
        let mut post_trigger = 0;
        let mut timed_out = false;
        let mut capture_stopped = false;

        while post_trigger < after_frames {
            let fresh = self.buffer.frames_since(last_seq, after_frames - post_trigger);
            if let Some(last) = fresh.last() {
                last_seq = last.sequence();
            }
            post_trigger += fresh.len();
            frames.extend(fresh);

            if post_trigger >= after_frames {
                break;
            }
            if !self.is_capturing() {
                tracing::warn!(
                    "Capture stopped during post-trigger wait ({}/{} frames)",
                    post_trigger,
                    after_frames
                );
                capture_stopped = true;
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    "Post-trigger wait timed out ({}/{} frames)",
                    post_trigger,
                    after_frames
                );
                timed_out = true;
                break;
            }
            thread::sleep(interval);
        }

        Clip {
            frames,
            pre_trigger,
            post_trigger,
            timed_out,
            capture_stopped,
            format,
        }
    }

    /// Assemble a clip around the trigger and encode it to `output_path`.
    ///
    /// A short buffer or a timed-out wait still produces a (shorter) clip;
    /// an empty clip or an encoder failure is an error and leaves no file.
    pub fn save_video(
        &self,
        output_path: &Path,
        before_seconds: u32,
        after_seconds: u32,
    ) -> CaptureResult<SaveReport> {
        let triggered_at = Utc::now();
        let clip = self.collect_clip(before_seconds, after_seconds);
        if clip.is_empty() {
            return Err(CaptureError::EmptyClip);
        }

        tracing::info!(
            "Saving clip to {:?}: {} pre + {} post frames",
            output_path,
            clip.pre_trigger,
            clip.post_trigger
        );

        let format = clip.format;
        let mut encoder = VideoEncoder::create(output_path, format.width, format.height, format.fps)?;
        for encoded in &clip.frames {
            match encoded.decode() {
                Ok(frame) => encoder.write_frame(&frame)?,
                Err(e) => tracing::warn!("Skipping undecodable frame {}: {}", encoded.sequence(), e),
            }
        }
        let frames_written = encoder.finish()?;

        Ok(SaveReport {
            path: output_path.to_path_buf(),
            pre_trigger_frames: clip.pre_trigger,
            post_trigger_frames: clip.post_trigger,
            frames_written,
            timed_out: clip.timed_out,
            width: format.width,
            height: format.height,
            fps: format.fps,
            triggered_at,
            finished_at: Utc::now(),
        })
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

/// Read frames into the buffer at the negotiated rate until `running` clears
/// or the device fails.
fn run_capture_loop(
    mut source: Box<dyn FrameSource>,
    format: CameraFormat,
    buffer: &FrameBuffer,
    running: &AtomicBool,
) {
    let interval = format.frame_interval();
    let started = Instant::now();
    let mut next_frame = started;
    let mut captured: u64 = 0;
    let mut dropped: u64 = 0;

    while running.load(Ordering::SeqCst) {
        match source.read_frame() {
            // Stopped while blocked in the read
            Ok(_) if !running.load(Ordering::SeqCst) => break,
            Ok(frame) => match buffer.add_frame(&frame) {
                Ok(_) => captured += 1,
                Err(e) => {
                    dropped += 1;
                    tracing::debug!("Dropping frame: {}", e);
                }
            },
            Err(e) => {
                tracing::error!("Camera read failed, capture loop exiting: {}", e);
                break;
            }
        }

        next_frame += interval;
        let now = Instant::now();
        if next_frame > now {
            thread::sleep(next_frame - now);
        } else {
            // Behind schedule; resync instead of bursting
            next_frame = now;
        }
    }

    let elapsed = started.elapsed().as_secs_f64();
    tracing::info!(
        "Capture loop finished: {} frames in {:.2}s ({:.1} fps actual), {} dropped",
        captured,
        elapsed,
        if elapsed > 0.0 { captured as f64 / elapsed } else { 0.0 },
        dropped
    );
    // Dropping the source releases the device
    drop(source);
}
