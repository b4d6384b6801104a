//! Transport session
//!
//! Owns the single connection to the controller. The wire protocol carries no
//! request IDs, so one lock covers the whole write-then-read cycle and at most
//! one request is ever outstanding. The monitoring listener reads through the
//! same lock via [`Session::poll_unsolicited`].

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::channel::{CommunicationChannel, SerialChannel};
use super::commands::REPORT;
use super::frame::{self, hex_dump, Frame, FrameScanner, END_MARKER, START_MARKER};
use super::serial::open_port;
use super::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Response timeout in milliseconds
    pub timeout_ms: u64,
    /// Sleep between polls of an idle channel, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_ms: 2,
        }
    }
}

impl SessionConfig {
    /// Response timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Direction of a frame on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to controller
    Tx,
    /// Controller to host
    Rx,
}

/// Callback receiving every raw frame sent or received.
///
/// Runs after the channel lock is released, so it may call back into the session.
pub type WireObserver = Arc<dyn Fn(Direction, &[u8]) + Send + Sync>;

/// Callback receiving unsolicited report frames.
///
/// Reports read during a transaction are delivered once the transaction
/// has released the channel.
pub type ReportSink = Arc<dyn Fn(Frame) + Send + Sync>;

/// Cumulative traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficCounters {
    /// Bytes written to the controller
    pub tx_bytes: u64,
    /// Bytes of complete frames read from the controller
    pub rx_bytes: u64,
    /// Frames written
    pub tx_frames: u64,
    /// Frames read, reports included
    pub rx_frames: u64,
}

#[derive(Default)]
struct Counters {
    tx_bytes: AtomicU64,
    rx_bytes: AtomicU64,
    tx_frames: AtomicU64,
    rx_frames: AtomicU64,
}

/// Callbacks owed once the channel lock is released
#[derive(Default)]
struct Deferred {
    wire: Vec<(Direction, Vec<u8>)>,
    reports: Vec<Frame>,
}

/// Connection to one controller
pub struct Session {
    config: SessionConfig,
    channel: Mutex<Option<Box<dyn CommunicationChannel>>>,
    report_sink: Mutex<Option<ReportSink>>,
    observer: Mutex<Option<WireObserver>>,
    counters: Counters,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Create a new session (not yet connected)
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            channel: Mutex::new(None),
            report_sink: Mutex::new(None),
            observer: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open the serial port. Any previous connection is closed first.
    pub fn connect(&self, port: &str, baud_rate: u32) -> Result<(), ProtocolError> {
        let serial = open_port(port, baud_rate)?;
        self.attach(Box::new(SerialChannel::new(serial)));
        tracing::info!(port, baud_rate, "connected");
        Ok(())
    }

    /// Connect using the port and baud rate from the configuration
    pub fn connect_configured(&self) -> Result<(), ProtocolError> {
        if self.config.port_name.is_empty() {
            return Err(ProtocolError::ConnectionFailed {
                port: String::new(),
                reason: "no port configured".to_string(),
            });
        }
        self.connect(&self.config.port_name, self.config.baud_rate)
    }

    /// Install an already-open channel
    pub fn attach(&self, channel: Box<dyn CommunicationChannel>) {
        let mut guard = relock(&self.channel);
        if let Some(old) = guard.take() {
            tracing::debug!(channel = %old.name(), "replacing existing connection");
        }
        *guard = Some(channel);
    }

    /// Close the connection. Safe to call when already disconnected.
    pub fn disconnect(&self) {
        if let Some(channel) = relock(&self.channel).take() {
            tracing::info!(channel = %channel.name(), "disconnected");
        }
    }

    /// Check whether a channel is attached
    pub fn is_connected(&self) -> bool {
        relock(&self.channel).is_some()
    }

    /// Route unsolicited report frames to `sink`
    pub fn set_report_sink(&self, sink: Option<ReportSink>) {
        *relock(&self.report_sink) = sink;
    }

    /// Observe every frame sent and received
    pub fn set_wire_observer(&self, observer: Option<WireObserver>) {
        *relock(&self.observer) = observer;
    }

    /// Get cumulative traffic counters
    pub fn counters(&self) -> TrafficCounters {
        TrafficCounters {
            tx_bytes: self.counters.tx_bytes.load(Ordering::Relaxed),
            rx_bytes: self.counters.rx_bytes.load(Ordering::Relaxed),
            tx_frames: self.counters.tx_frames.load(Ordering::Relaxed),
            rx_frames: self.counters.rx_frames.load(Ordering::Relaxed),
        }
    }

    /// Send one request and wait for its response frame.
    ///
    /// Stale input is flushed before writing. Report frames arriving while
    /// waiting go to the report sink and do not end the wait.
    pub fn transact(
        &self,
        command: u8,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Frame, ProtocolError> {
        let bytes = frame::encode(command, payload)?;
        let mut deferred = Deferred::default();
        let result = match relock(&self.channel).as_mut() {
            Some(channel) => self.exchange(channel.as_mut(), command, &bytes, timeout, &mut deferred),
            None => Err(ProtocolError::NotConnected),
        };

        for (direction, raw) in deferred.wire {
            self.notify(direction, &raw);
        }
        for report in deferred.reports {
            self.dispatch_report(report);
        }
        result
    }

    /// The write-then-read cycle, run with the channel locked
    fn exchange(
        &self,
        channel: &mut dyn CommunicationChannel,
        command: u8,
        bytes: &[u8],
        timeout: Duration,
        deferred: &mut Deferred,
    ) -> Result<Frame, ProtocolError> {
        let poll = self.config.poll_interval();
        let start = Instant::now();
        let deadline = start + timeout;

        channel.clear_input_buffer()?;
        channel.write_all(bytes)?;
        channel.flush()?;
        self.count(Direction::Tx, bytes);
        deferred.wire.push((Direction::Tx, bytes.to_vec()));

        loop {
            let raw = match read_raw_frame(channel, deadline, poll)? {
                Some(raw) => raw,
                None => {
                    tracing::debug!(
                        target: "lc4::wire",
                        command = format_args!("{:#04x}", command),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "no response"
                    );
                    return Err(ProtocolError::Timeout {
                        command,
                        budget: timeout,
                    });
                }
            };
            self.count(Direction::Rx, &raw);
            let response = frame::decode(&raw);
            deferred.wire.push((Direction::Rx, raw));

            let response = response?;
            if response.command == REPORT && command != REPORT {
                deferred.reports.push(response);
                continue;
            }
            return Ok(response);
        }
    }

    /// Drain whatever bytes are waiting into `scanner` without sending anything.
    ///
    /// Holds the channel lock only for the read itself, so it never interleaves
    /// with a transaction. Frames taken from the scanner are not counted until
    /// the caller passes them to [`Session::record`].
    pub fn poll_unsolicited(&self, scanner: &mut FrameScanner) -> Result<usize, ProtocolError> {
        let mut guard = relock(&self.channel);
        let channel = guard.as_mut().ok_or(ProtocolError::NotConnected)?;

        let available = channel.bytes_to_read()? as usize;
        if available == 0 {
            return Ok(0);
        }

        let mut buf = vec![0u8; available.min(512)];
        let n = match channel.read(&mut buf) {
            Ok(n) => n,
            Err(e) if is_transient(&e) => 0,
            Err(e) => return Err(e.into()),
        };
        scanner.push(&buf[..n]);
        Ok(n)
    }

    /// Hand a report frame to the registered sink, if any
    pub(crate) fn dispatch_report(&self, report: Frame) {
        let sink = relock(&self.report_sink).clone();
        match sink {
            Some(sink) => sink(report),
            None => tracing::debug!(target: "lc4::wire", "report frame with no listener dropped"),
        }
    }

    /// Record a frame for logging, observers and counters.
    ///
    /// Must not be called with the channel locked.
    pub(crate) fn record(&self, direction: Direction, bytes: &[u8]) {
        self.count(direction, bytes);
        self.notify(direction, bytes);
    }

    fn count(&self, direction: Direction, bytes: &[u8]) {
        let (byte_counter, frame_counter) = match direction {
            Direction::Tx => (&self.counters.tx_bytes, &self.counters.tx_frames),
            Direction::Rx => (&self.counters.rx_bytes, &self.counters.rx_frames),
        };
        byte_counter.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        frame_counter.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(target: "lc4::wire", "{:?} {}", direction, hex_dump(bytes));
    }

    fn notify(&self, direction: Direction, bytes: &[u8]) {
        let observer = relock(&self.observer).clone();
        if let Some(observer) = observer {
            observer(direction, bytes);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Fill `buf` completely, polling until `deadline`.
///
/// Returns `Ok(false)` if the deadline passed first.
fn read_exact_until(
    channel: &mut dyn CommunicationChannel,
    buf: &mut [u8],
    deadline: Instant,
    poll: Duration,
) -> io::Result<bool> {
    let mut offset = 0;
    while offset < buf.len() {
        if Instant::now() >= deadline {
            return Ok(false);
        }

        let available = channel.bytes_to_read()? as usize;
        if available == 0 {
            std::thread::sleep(poll);
            continue;
        }

        let to_read = available.min(buf.len() - offset);
        match channel.read(&mut buf[offset..offset + to_read]) {
            Ok(0) => std::thread::sleep(poll),
            Ok(n) => offset += n,
            Err(ref e) if is_transient(e) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Read one frame's worth of bytes: marker, opcode, length, payload,
/// checksum, end marker. Noise before the start marker is skipped.
///
/// Returns `Ok(None)` on timeout. The bytes are not validated here.
fn read_raw_frame(
    channel: &mut dyn CommunicationChannel,
    deadline: Instant,
    poll: Duration,
) -> io::Result<Option<Vec<u8>>> {
    let mut matched = 0;
    let mut skipped = 0usize;
    let mut byte = [0u8; 1];
    while matched < START_MARKER.len() {
        if !read_exact_until(channel, &mut byte, deadline, poll)? {
            return Ok(None);
        }
        if byte[0] == START_MARKER[matched] {
            matched += 1;
        } else {
            skipped += matched + 1;
            matched = usize::from(byte[0] == START_MARKER[0]);
            skipped -= matched;
        }
    }
    if skipped > 0 {
        tracing::debug!(target: "lc4::wire", skipped, "skipped bytes before start marker");
    }

    let mut header = [0u8; 2];
    if !read_exact_until(channel, &mut header, deadline, poll)? {
        return Ok(None);
    }

    let mut rest = vec![0u8; header[1] as usize + 1 + END_MARKER.len()];
    if !read_exact_until(channel, &mut rest, deadline, poll)? {
        return Ok(None);
    }

    let mut raw = Vec::with_capacity(START_MARKER.len() + header.len() + rest.len());
    raw.extend_from_slice(&START_MARKER);
    raw.extend_from_slice(&header);
    raw.extend_from_slice(&rest);
    Ok(Some(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }

    #[test]
    fn test_session_starts_disconnected() {
        let session = Session::new(SessionConfig::default());
        assert!(!session.is_connected());
        assert!(matches!(
            session.transact(0x11, &[], Duration::from_millis(10)),
            Err(ProtocolError::NotConnected)
        ));
        // idempotent
        session.disconnect();
        session.disconnect();
    }

    #[test]
    fn test_connect_without_port_configured() {
        let session = Session::new(SessionConfig::default());
        assert!(matches!(
            session.connect_configured(),
            Err(ProtocolError::ConnectionFailed { .. })
        ));
    }
}
