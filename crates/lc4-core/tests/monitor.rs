use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lc4_core::demo::{self, sample_snapshot, DemoController, DemoHandle, DemoOptions, DeviceMemory};
use lc4_core::monitor::Monitor;
use lc4_core::protocol::{Client, ProtocolError, Session, SessionConfig};

fn demo_session(report_interval: Duration) -> (Arc<Session>, DemoHandle) {
    let mut memory = DeviceMemory::factory(DemoOptions {
        report_interval,
        ..DemoOptions::default()
    });
    let mut snapshot = sample_snapshot();
    snapshot.info.controller_id = Some(9);
    memory.load(&snapshot);

    let session = Arc::new(Session::new(SessionConfig::default()));
    let handle = demo::attach(&session, DemoController::new(memory));
    (session, handle)
}

#[test]
fn test_reports_arrive() {
    let (session, handle) = demo_session(Duration::from_millis(20));
    let monitor = Monitor::start(Arc::clone(&session), 16).expect("start");
    assert!(handle.memory().monitoring);

    let report = monitor
        .recv_timeout(Duration::from_secs(2))
        .expect("report");
    assert_eq!(report.controller_id, 9);
    assert!(!report.lights().is_empty());

    monitor.stop().expect("stop");
    let memory = handle.memory();
    assert!(!memory.monitoring);
    assert_eq!(memory.requests().first(), Some(&0x80));
    assert_eq!(memory.requests().last(), Some(&0x81));
}

#[test]
fn test_reports_flow_while_transactions_continue() {
    let (session, _handle) = demo_session(Duration::from_millis(10));
    let monitor = Monitor::start(Arc::clone(&session), 256).expect("start");
    let client = Client::new(Arc::clone(&session));

    for _ in 0..20 {
        assert_eq!(client.get_id().expect("id"), 9);
        thread::sleep(Duration::from_millis(15));
    }

    let mut received = 0;
    while monitor.try_recv().is_some() {
        received += 1;
    }
    assert!(received > 0, "no reports while transacting");
    monitor.stop().expect("stop");
}

#[test]
fn test_full_queue_drops_reports() {
    let (session, _handle) = demo_session(Duration::from_millis(5));
    let monitor = Monitor::start(Arc::clone(&session), 1).expect("start");

    thread::sleep(Duration::from_millis(500));
    assert!(monitor.dropped() > 0);
    assert!(monitor.try_recv().is_some());
    monitor.stop().expect("stop");
}

#[test]
fn test_drop_stops_listener() {
    let (session, _handle) = demo_session(Duration::from_millis(20));
    {
        let monitor = Monitor::start(Arc::clone(&session), 4).expect("start");
        assert!(monitor.is_running());
    }
    // The session is free again once the listener is gone
    let client = Client::new(session);
    assert_eq!(client.get_id().expect("id"), 9);
}

#[test]
fn test_start_fails_when_controller_silent() {
    let (session, handle) = demo_session(Duration::from_millis(20));
    handle.set_options(DemoOptions {
        silent: true,
        ..DemoOptions::default()
    });
    assert!(matches!(
        Monitor::start(session, 4),
        Err(ProtocolError::Timeout { command: 0x80, .. })
    ));
}
