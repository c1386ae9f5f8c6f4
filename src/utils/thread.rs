//! Bounded waits on background threads

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Join `handle`, giving up after `timeout`.
///
/// Returns `true` if the thread finished. On timeout the thread is detached
/// and left to exit on its own.
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!("{} thread did not stop within {:?}, detaching it", name, timeout);
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }

    if handle.join().is_err() {
        tracing::error!("{} thread panicked", name);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_finished_thread() {
        let handle = thread::spawn(|| thread::sleep(Duration::from_millis(20)));
        assert!(join_with_timeout(handle, Duration::from_secs(2), "short"));
    }

    #[test]
    fn test_timeout_detaches_stuck_thread() {
        let handle = thread::spawn(|| thread::sleep(Duration::from_secs(2)));
        let start = Instant::now();
        assert!(!join_with_timeout(handle, Duration::from_millis(50), "stuck"));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
