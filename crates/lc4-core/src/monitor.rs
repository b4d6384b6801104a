//! Monitoring stream
//!
//! While monitoring is enabled the controller pushes a report frame (0x82)
//! every time its outputs change. A listener thread drains the line between
//! transactions and hands decoded reports to a bounded queue; reports that
//! arrive during a transaction reach the same queue through the session's
//! report sink.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{group_states, SignalGroupState, SIGNAL_GROUPS};
use crate::protocol::{
    Client, Direction, Frame, FrameScanner, ProtocolError, ReportSink, Session, REPORT,
};

/// Idle time between polls of the line
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Report payload size
pub const REPORT_LEN: usize = 5;

/// One monitoring report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorReport {
    /// Identity of the reporting controller
    pub controller_id: u8,
    /// Output port D, lamps of groups 1 to 3
    pub port_d: u8,
    /// Output port E, lamps of groups 3 to 6
    pub port_e: u8,
    /// Output port F, lamps of groups 6 to 8
    pub port_f: u8,
    /// Pedestrian demand and signal bits
    pub pedestrian_state: u8,
}

impl MonitorReport {
    /// Decode a report frame
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        if frame.command != REPORT {
            return Err(ProtocolError::UnexpectedResponse {
                command: REPORT,
                expected: REPORT,
                actual: frame.command,
            });
        }
        match frame.payload[..] {
            [controller_id, port_d, port_e, port_f, pedestrian_state] => Ok(Self {
                controller_id,
                port_d,
                port_e,
                port_f,
                pedestrian_state,
            }),
            _ => Err(ProtocolError::malformed(
                REPORT,
                format!("{} bytes, expected {}", frame.payload.len(), REPORT_LEN),
            )),
        }
    }

    /// Lamp states of the eight signal groups
    pub fn group_states(&self) -> [SignalGroupState; SIGNAL_GROUPS] {
        group_states(self.port_d, self.port_e, self.port_f)
    }

    /// Labels of every lit lamp, e.g. `["V1", "V2", "R3", "R4"]`
    pub fn lights(&self) -> Vec<String> {
        self.group_states()
            .iter()
            .flat_map(SignalGroupState::lit_labels)
            .collect()
    }
}

fn deliver(queue: &SyncSender<MonitorReport>, dropped: &AtomicU64, frame: Frame) {
    let report = match MonitorReport::from_frame(&frame) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable monitoring report");
            return;
        }
    };
    match queue.try_send(report) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(dropped = total, "report queue full, report dropped");
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}

/// Running monitoring session
pub struct Monitor {
    session: Arc<Session>,
    reports: Receiver<MonitorReport>,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    listener: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Enable monitoring and start listening. At most `capacity` reports are
    /// buffered; newer ones are dropped until the consumer catches up.
    pub fn start(session: Arc<Session>, capacity: usize) -> Result<Self, ProtocolError> {
        let (tx, reports) = mpsc::sync_channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));

        let sink_dropped = Arc::clone(&dropped);
        let sink: ReportSink = Arc::new(move |frame: Frame| deliver(&tx, &sink_dropped, frame));
        session.set_report_sink(Some(sink));

        if let Err(e) = Client::new(Arc::clone(&session)).set_monitoring(true) {
            session.set_report_sink(None);
            return Err(e);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let spawned = {
            let session = Arc::clone(&session);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("lc4-monitor".to_string())
                .spawn(move || listen(&session, &stop))
        };
        let listener = match spawned {
            Ok(listener) => listener,
            Err(e) => return Err(abandon_start(&session, e.into())),
        };
        tracing::info!(capacity, "monitoring started");

        Ok(Self {
            session,
            reports,
            stop,
            dropped,
            listener: Some(listener),
        })
    }

    /// Wait up to `timeout` for the next report
    pub fn recv_timeout(&self, timeout: Duration) -> Option<MonitorReport> {
        match self.reports.recv_timeout(timeout) {
            Ok(report) => Some(report),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Next buffered report, if any
    pub fn try_recv(&self) -> Option<MonitorReport> {
        self.reports.try_recv().ok()
    }

    /// Reports discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the listener thread is still attached
    pub fn is_running(&self) -> bool {
        self.listener.is_some()
    }

    fn halt_listener(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                tracing::warn!("monitor listener panicked");
            }
        }
        self.session.set_report_sink(None);
    }

    /// Stop listening and disable monitoring on the controller
    pub fn stop(mut self) -> Result<(), ProtocolError> {
        self.halt_listener();
        let result = Client::new(Arc::clone(&self.session)).set_monitoring(false);
        tracing::info!(dropped = self.dropped(), "monitoring stopped");
        result
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if self.listener.is_some() {
            self.halt_listener();
        }
    }
}

/// Undo a start that got as far as enabling reports on the controller
fn abandon_start(session: &Arc<Session>, error: ProtocolError) -> ProtocolError {
    session.set_report_sink(None);
    if let Err(e) = Client::new(Arc::clone(session)).set_monitoring(false) {
        tracing::warn!(error = %e, "could not disable monitoring after failed start");
    }
    error
}

fn listen(session: &Session, stop: &AtomicBool) {
    let mut scanner = FrameScanner::new();
    while !stop.load(Ordering::SeqCst) {
        match session.poll_unsolicited(&mut scanner) {
            Ok(_) => {}
            Err(ProtocolError::NotConnected) => {
                tracing::info!("connection closed, monitor listener exiting");
                break;
            }
            Err(e) => tracing::warn!(error = %e, "monitor poll failed"),
        }

        while let Some(result) = scanner.next_frame() {
            match result {
                Ok(frame) if frame.command == REPORT => {
                    session.record(Direction::Rx, &frame.to_bytes());
                    session.dispatch_report(frame);
                }
                Ok(frame) => tracing::debug!(
                    command = format_args!("{:#04x}", frame.command),
                    "stray frame outside a transaction"
                ),
                Err(e) => tracing::warn!(error = %e, "framing noise on monitor line"),
            }
        }

        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_report_decode() {
        let frame = Frame::new(REPORT, vec![3, 0b0010_0110, 0b0100_0000, 0, 1]).expect("frame");
        let report = MonitorReport::from_frame(&frame).expect("report");
        assert_eq!(report.controller_id, 3);
        assert_eq!(report.pedestrian_state, 1);
        assert_eq!(report.lights(), vec!["V1", "V2", "R3", "R4"]);
    }

    #[test]
    fn test_short_report_rejected() {
        let frame = Frame::new(REPORT, vec![3, 0]).expect("frame");
        assert!(matches!(
            MonitorReport::from_frame(&frame),
            Err(ProtocolError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_abandoned_start_turns_reports_off() {
        use crate::demo::{self, DemoController, DeviceMemory};
        use std::io;

        let session = Arc::new(Session::new(Default::default()));
        let handle = demo::attach(&session, DemoController::new(DeviceMemory::default()));

        let (tx, rx) = mpsc::sync_channel(4);
        let dropped = Arc::new(AtomicU64::new(0));
        let sink: ReportSink = Arc::new(move |frame: Frame| deliver(&tx, &dropped, frame));
        session.set_report_sink(Some(sink));
        Client::new(Arc::clone(&session))
            .set_monitoring(true)
            .expect("enable");
        assert!(handle.memory().monitoring);

        let cause = io::Error::new(io::ErrorKind::OutOfMemory, "no thread");
        let err = abandon_start(&session, cause.into());
        assert!(matches!(err, ProtocolError::Io(_)));

        let memory = handle.memory();
        assert!(!memory.monitoring);
        assert_eq!(memory.requests(), &[0x80, 0x81]);
        drop(memory);
        // sink released its sender
        rx.try_iter().for_each(drop);
        assert_eq!(rx.try_recv(), Err(mpsc::TryRecvError::Disconnected));
    }

    #[test]
    fn test_full_queue_drops() {
        let (tx, rx) = mpsc::sync_channel(1);
        let dropped = AtomicU64::new(0);
        let frame = Frame::new(REPORT, vec![1, 2, 3, 4, 5]).expect("frame");
        deliver(&tx, &dropped, frame.clone());
        deliver(&tx, &dropped, frame);
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
        assert_eq!(rx.try_recv().map(|r| r.port_d), Ok(2));
    }
}
