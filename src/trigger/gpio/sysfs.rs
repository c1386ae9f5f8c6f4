//! Legacy sysfs GPIO backend
//!
//! Exports the pin under `/sys/class/gpio` and samples its value file. Bias
//! cannot be set through sysfs, so the board must provide the pull-up.

use super::GpioLine;
use crate::trigger::types::{TriggerError, TriggerResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

const SAMPLE_INTERVAL: Duration = Duration::from_millis(5);
const EXPORT_TIMEOUT: Duration = Duration::from_secs(1);

pub struct SysfsLine {
    root: PathBuf,
    pin: u32,
    value_path: PathBuf,
    last_level: u8,
    exported: bool,
}

impl SysfsLine {
    pub fn open(pin: u32) -> TriggerResult<Self> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), pin)
    }

    /// Open `pin` under an arbitrary sysfs-style root
    pub fn open_at(root: &Path, pin: u32) -> TriggerResult<Self> {
        if !root.exists() {
            return Err(TriggerError::BackendUnavailable(format!(
                "{:?} does not exist",
                root
            )));
        }

        let pin_dir = root.join(format!("gpio{}", pin));
        let mut exported = false;
        if !pin_dir.exists() {
            fs::write(root.join("export"), pin.to_string()).map_err(|e| {
                TriggerError::BackendUnavailable(format!("failed to export GPIO {}: {}", pin, e))
            })?;
            exported = true;

            // udev may take a moment to create the attribute files
            let deadline = Instant::now() + EXPORT_TIMEOUT;
            while !pin_dir.join("value").exists() {
                if Instant::now() >= deadline {
                    let _ = fs::write(root.join("unexport"), pin.to_string());
                    return Err(TriggerError::BackendUnavailable(format!(
                        "GPIO {} did not appear after export",
                        pin
                    )));
                }
                thread::sleep(Duration::from_millis(10));
            }
        }

        let mut line = Self {
            root: root.to_path_buf(),
            pin,
            value_path: pin_dir.join("value"),
            last_level: 1,
            exported,
        };

        // From here on, Drop unexports on failure
        fs::write(pin_dir.join("direction"), "in")?;
        line.last_level = line.read_level()?;
        tracing::debug!("sysfs GPIO {} ready, level {}", pin, line.last_level);
        Ok(line)
    }

    fn read_level(&self) -> TriggerResult<u8> {
        let raw = fs::read_to_string(&self.value_path)?;
        match raw.trim() {
            "0" => Ok(0),
            "1" => Ok(1),
            other => Err(TriggerError::Source(format!(
                "unexpected GPIO value '{}'",
                other
            ))),
        }
    }
}

impl GpioLine for SysfsLine {
    fn backend_name(&self) -> &'static str {
        "sysfs"
    }

    fn wait_falling_edge(&mut self, timeout: Duration) -> TriggerResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let level = self.read_level()?;
            let fell = self.last_level == 1 && level == 0;
            self.last_level = level;
            if fell {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(SAMPLE_INTERVAL);
        }
    }
}

impl Drop for SysfsLine {
    fn drop(&mut self) {
        if self.exported {
            if let Err(e) = fs::write(self.root.join("unexport"), self.pin.to_string()) {
                tracing::warn!("Failed to unexport GPIO {}: {}", self.pin, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fake_pin(root: &Path, pin: u32, level: &str) -> PathBuf {
        let dir = root.join(format!("gpio{}", pin));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("direction"), "out").unwrap();
        fs::write(dir.join("value"), level).unwrap();
        dir
    }

    #[test]
    fn test_detects_falling_edge_only() {
        let root = tempdir().unwrap();
        let dir = fake_pin(root.path(), 17, "1\n");

        let mut line = SysfsLine::open_at(root.path(), 17).unwrap();
        assert_eq!(fs::read_to_string(dir.join("direction")).unwrap(), "in");
        assert!(!line.wait_falling_edge(Duration::from_millis(20)).unwrap());

        fs::write(dir.join("value"), "0\n").unwrap();
        assert!(line.wait_falling_edge(Duration::from_millis(200)).unwrap());

        // Held low: no new edge
        assert!(!line.wait_falling_edge(Duration::from_millis(20)).unwrap());

        // Rising edge is ignored, the next fall fires again
        fs::write(dir.join("value"), "1\n").unwrap();
        assert!(!line.wait_falling_edge(Duration::from_millis(20)).unwrap());
        fs::write(dir.join("value"), "0\n").unwrap();
        assert!(line.wait_falling_edge(Duration::from_millis(200)).unwrap());
    }

    #[test]
    fn test_preexisting_pin_is_not_unexported() {
        let root = tempdir().unwrap();
        fake_pin(root.path(), 4, "1");
        drop(SysfsLine::open_at(root.path(), 4).unwrap());
        assert!(!root.path().join("unexport").exists());
    }

    #[test]
    fn test_missing_root_is_unavailable() {
        let result = SysfsLine::open_at(Path::new("/nonexistent/gpio"), 17);
        assert!(matches!(result, Err(TriggerError::BackendUnavailable(_))));
    }
}
