//! Raw socket trigger
//!
//! Accepts one TCP connection at a time. A connection that sends the line
//! `trigger` fires one event; the connection is closed after the first line
//! either way.

use crate::trigger::source::{POLL_INTERVAL, SOURCE_STOP_TIMEOUT};
use crate::trigger::types::{TriggerError, TriggerEvent, TriggerResult, TriggerType};
use crate::utils::thread::join_with_timeout;
use crossbeam_channel::Sender;
use std::io::{self, BufRead, BufReader, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Command that fires a trigger
pub const TRIGGER_COMMAND: &str = "trigger";

/// Longest line read from a client
const MAX_LINE_BYTES: u64 = 1024;

/// How long a connected client has to send its line
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Raw TCP trigger
pub struct SocketTrigger {
    bind_address: String,
    port: u16,
    events: Sender<TriggerEvent>,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    thread: Option<JoinHandle<()>>,
}

impl SocketTrigger {
    pub fn new(bind_address: &str, port: u16, events: Sender<TriggerEvent>) -> Self {
        Self {
            bind_address: bind_address.to_string(),
            port,
            events,
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            thread: None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn start(&mut self) -> TriggerResult<()> {
        if self.thread.is_some() {
            return Ok(());
        }

        let addr = format!("{}:{}", self.bind_address, self.port);
        let listener = TcpListener::bind(&addr).map_err(|source| TriggerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        // Nonblocking accept so the loop can notice a stop request
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let events = self.events.clone();

        let spawned = thread::Builder::new()
            .name("socket-trigger".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            if let Err(e) = handle_client(stream, peer, &events) {
                                tracing::debug!("Socket client {} error: {}", peer, e);
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(POLL_INTERVAL);
                        }
                        Err(e) => {
                            tracing::warn!("Socket accept failed: {}", e);
                            thread::sleep(POLL_INTERVAL);
                        }
                    }
                }
                tracing::debug!("Socket trigger listener exited");
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                self.local_addr = Some(local_addr);
                tracing::info!("Socket trigger listening on {}", local_addr);
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
        let mut result = Ok(());
        if let Some(handle) = self.thread.take() {
            if !join_with_timeout(handle, SOURCE_STOP_TIMEOUT, "socket-trigger") {
                result = Err(TriggerError::Source(format!(
                    "socket listener on {:?} did not exit within {:?}",
                    self.local_addr, SOURCE_STOP_TIMEOUT
                )));
            }
        }
        self.local_addr = None;
        result
    }
}

impl Drop for SocketTrigger {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Read one line from the client and fire if it is the trigger command.
/// The stream is closed when it goes out of scope.
fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    events: &Sender<TriggerEvent>,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT))?;

    let mut line = String::new();
    BufReader::new(stream.take(MAX_LINE_BYTES)).read_line(&mut line)?;

    if line.trim() == TRIGGER_COMMAND {
        tracing::info!("Socket trigger from {}", peer);
        let _ = events.send(TriggerEvent::new(TriggerType::Websocket, "socket"));
    } else {
        tracing::debug!("Ignoring socket message from {}: {:?}", peer, line.trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Instant;

    fn send_line(addr: SocketAddr, payload: &str) {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(payload.as_bytes()).unwrap();
        // Server closes after one line
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest);
    }

    fn started() -> (SocketTrigger, crossbeam_channel::Receiver<TriggerEvent>, SocketAddr) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut trigger = SocketTrigger::new("127.0.0.1", 0, tx);
        trigger.start().unwrap();
        let addr = trigger.local_addr().unwrap();
        (trigger, rx, addr)
    }

    #[test]
    fn test_trigger_line_fires_once() {
        let (mut trigger, events, addr) = started();

        send_line(addr, "trigger\n");
        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.kind, TriggerType::Websocket);
        assert_eq!(event.source, "socket");

        // Only the first line of a connection counts
        send_line(addr, "trigger\ntrigger\n");
        assert!(events.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(events.recv_timeout(Duration::from_millis(200)).is_err());

        trigger.stop().unwrap();
    }

    #[test]
    fn test_other_messages_are_ignored() {
        let (mut trigger, events, addr) = started();

        send_line(addr, "hello\n");
        send_line(addr, "TRIGGER now\n");
        send_line(addr, "");
        assert!(events.recv_timeout(Duration::from_millis(300)).is_err());

        send_line(addr, "  trigger \r\n");
        assert!(events.recv_timeout(Duration::from_secs(2)).is_ok());

        trigger.stop().unwrap();
    }

    #[test]
    fn test_stop_is_bounded_and_releases_port() {
        let (mut trigger, _events, addr) = started();

        let start = Instant::now();
        trigger.stop().unwrap();
        assert!(start.elapsed() < SOURCE_STOP_TIMEOUT);
        TcpListener::bind(addr).unwrap();

        trigger.stop().unwrap();
    }
}
