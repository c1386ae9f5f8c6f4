//! GPIO character device backend
//!
//! Requests the line from `/dev/gpiochipN` with kernel edge detection and
//! pull-up bias, then polls the line fd so waits stay bounded.

use super::{GpioLine, GPIO_CONSUMER};
use crate::trigger::types::{TriggerError, TriggerResult};
use gpiod::{Bias, Chip, Edge, EdgeDetect, Input, Lines, Options};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;

pub struct CdevLine {
    lines: Lines<Input>,
    pin: u32,
}

impl CdevLine {
    pub fn open(chip_path: &Path, pin: u32) -> TriggerResult<Self> {
        let chip = Chip::new(chip_path).map_err(|e| {
            TriggerError::BackendUnavailable(format!("failed to open {:?}: {}", chip_path, e))
        })?;

        let options = Options::input([pin])
            .edge(EdgeDetect::Falling)
            .bias(Bias::PullUp)
            .consumer(GPIO_CONSUMER);
        let lines = chip.request_lines(options).map_err(|e| {
            TriggerError::Source(format!(
                "failed to request line {} on {:?}: {}",
                pin, chip_path, e
            ))
        })?;

        tracing::debug!("Requested GPIO line {} on {:?}", pin, chip_path);
        Ok(Self { lines, pin })
    }
}

impl GpioLine for CdevLine {
    fn backend_name(&self) -> &'static str {
        "cdev"
    }

    fn wait_falling_edge(&mut self, timeout: Duration) -> TriggerResult<bool> {
        let mut fd = libc::pollfd {
            fd: self.lines.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        let ready = unsafe { libc::poll(&mut fd, 1, timeout_ms) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err.into());
        }
        if ready == 0 {
            return Ok(false);
        }

        let event = self.lines.read_event()?;
        tracing::trace!("GPIO {} edge {:?}", self.pin, event.edge);
        Ok(matches!(event.edge, Edge::Falling))
    }
}
