use std::sync::Arc;

use lc4_core::demo::{self, sample_snapshot, DemoController, DemoHandle, DemoOptions, DeviceMemory};
use lc4_core::model::{ModelError, Movement, Plan, SlotRecord, Table};
use lc4_core::orchestrator::{CancelToken, Orchestrator, SyncError};
use lc4_core::protocol::{Client, ProtocolError, Session, SessionConfig};
use pretty_assertions::assert_eq;

const TOTAL_SLOTS: usize = 60 + 8 + 20 + 10 + 20 + 10;

fn setup(memory: DeviceMemory) -> (Client, DemoHandle) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("lc4_core=debug")
        .with_test_writer()
        .try_init();
    let session = Arc::new(Session::new(SessionConfig::default()));
    let handle = demo::attach(&session, DemoController::new(memory));
    (Client::new(session), handle)
}

#[test]
fn test_upload_then_capture_round_trip() {
    let (client, handle) = setup(DeviceMemory::default());
    let mut snapshot = sample_snapshot();
    snapshot.info.controller_id = Some(7);

    let orchestrator = Orchestrator::new(client);
    let report = orchestrator.upload_all(&snapshot).expect("upload");
    assert!(report.identity_written);
    assert_eq!(report.written, snapshot.record_count());
    assert_eq!(report.written + report.cleared, TOTAL_SLOTS);

    let captured = orchestrator.capture_all().expect("capture");
    assert_eq!(captured.info.controller_id, Some(7));
    assert_eq!(captured.info.clock, Some(handle.memory().clock));
    assert!(!snapshot.intermittences.is_empty() && !snapshot.flow_rules.is_empty());
    assert_eq!(captured.movements, snapshot.movements);
    assert_eq!(captured.sequences, snapshot.sequences);
    assert_eq!(captured.plans, snapshot.plans);
    assert_eq!(captured.intermittences, snapshot.intermittences);
    assert_eq!(captured.holidays, snapshot.holidays);
    assert_eq!(captured.flow_rules, snapshot.flow_rules);
}

#[test]
fn test_upload_writes_tables_in_order() {
    let (client, handle) = setup(DeviceMemory::default());
    let mut snapshot = sample_snapshot();
    snapshot.info.controller_id = Some(1);
    Orchestrator::new(client).upload_all(&snapshot).expect("upload");

    let memory = handle.memory();
    let mut order: Vec<u8> = memory.requests().to_vec();
    order.dedup();
    assert_eq!(order, vec![0x10, 0x23, 0x30, 0x40, 0x50, 0x60, 0x70]);
    assert_eq!(memory.requests().len(), TOTAL_SLOTS + 1);
}

#[test]
fn test_upload_failure_reports_table_and_index() {
    let options = DemoOptions {
        refuse_write: Some((0x40, 2)),
        ..DemoOptions::default()
    };
    let (client, handle) = setup(DeviceMemory::factory(options));
    let snapshot = sample_snapshot();

    let err = Orchestrator::new(client)
        .upload_all(&snapshot)
        .expect_err("refused write");
    match err {
        SyncError::Transfer {
            table,
            index,
            source: ProtocolError::Nack { command, .. },
        } => {
            assert_eq!((table, index), (Table::Plans, 2));
            assert_eq!(command, 0x40);
        }
        other => panic!("unexpected error {:?}", other),
    }

    // Earlier slots stay written, later tables untouched
    let memory = handle.memory();
    assert_eq!(
        memory.slot(Table::Movements, 0),
        Some(&snapshot.movements[0].encode()[..])
    );
    assert!(!memory.requests().contains(&0x50));
}

#[test]
fn test_invalid_snapshot_sends_nothing() {
    let (client, handle) = setup(DeviceMemory::default());
    let mut snapshot = sample_snapshot();
    snapshot.plans[0].hour = 25;

    let err = Orchestrator::new(client)
        .upload_all(&snapshot)
        .expect_err("invalid");
    assert!(matches!(
        err,
        SyncError::Invalid(ModelError::FieldOutOfRange { field: "hour", .. })
    ));
    assert!(handle.memory().requests().is_empty());
}

#[test]
fn test_cancel_between_slots() {
    let (client, handle) = setup(DeviceMemory::default());
    let token = CancelToken::new();
    let trigger = token.clone();
    let orchestrator = Orchestrator::new(client)
        .with_cancel_token(token)
        .on_progress(move |progress| {
            if progress.table == Table::Sequences && progress.index == 3 {
                trigger.cancel();
            }
        });

    let err = orchestrator
        .upload_all(&sample_snapshot())
        .expect_err("cancelled");
    assert_eq!(err.position(), Some((Table::Sequences, 4)));
    assert!(matches!(err, SyncError::Cancelled { .. }));

    // The slot in flight when cancel was requested still completed
    let sequence_writes = handle
        .memory()
        .requests()
        .iter()
        .filter(|&&op| op == 0x30)
        .count();
    assert_eq!(sequence_writes, 4);
}

#[test]
fn test_cancelled_before_start() {
    let (client, handle) = setup(DeviceMemory::default());
    let token = CancelToken::new();
    token.cancel();
    let err = Orchestrator::new(client)
        .with_cancel_token(token)
        .capture_all()
        .expect_err("cancelled");
    assert_eq!(err.position(), Some((Table::Identity, 0)));
    assert!(handle.memory().requests().is_empty());
}

#[test]
fn test_capture_skips_empty_plan_slots() {
    let mut memory = DeviceMemory::default();
    let mut snapshot = sample_snapshot();
    snapshot.plans.push(Plan {
        id: 9,
        day_type_id: 255,
        sequence_id: 0,
        time_selector: 0,
        hour: 0,
        minute: 0,
    });
    memory.load(&snapshot);
    let (client, _) = setup(memory);

    let captured = Orchestrator::new(client).capture_all().expect("capture");
    let ids: Vec<u8> = captured.plans.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
}

#[test]
fn test_capture_when_empty_slots_are_nacked() {
    let mut memory = DeviceMemory::factory(DemoOptions {
        nack_empty_slots: true,
        ..DemoOptions::default()
    });
    memory.load(&sample_snapshot());
    let (client, _) = setup(memory);

    let captured = Orchestrator::new(client).capture_all().expect("capture");
    assert_eq!(captured.movements, sample_snapshot().movements);
    assert_eq!(captured.intermittences, sample_snapshot().intermittences);
    assert_eq!(captured.flow_rules, sample_snapshot().flow_rules);
}

#[test]
fn test_capture_through_line_noise() {
    let mut memory = DeviceMemory::factory(DemoOptions {
        noise: true,
        ..DemoOptions::default()
    });
    memory.load(&sample_snapshot());
    let (client, _) = setup(memory);

    let captured = Orchestrator::new(client).capture_all().expect("capture");
    assert_eq!(captured.sequences, sample_snapshot().sequences);
    assert_eq!(captured.holidays, sample_snapshot().holidays);
}

#[test]
fn test_capture_fails_with_slot_context() {
    let (client, handle) = setup(DeviceMemory::default());
    handle.set_options(DemoOptions {
        silent: true,
        ..DemoOptions::default()
    });

    let session = Arc::clone(client.session());
    let err = Orchestrator::new(client).capture_all().expect_err("silent");
    match err {
        SyncError::Transfer {
            table,
            index,
            source,
        } => {
            assert_eq!((table, index), (Table::Identity, 0));
            assert!(matches!(source, ProtocolError::Timeout { command: 0x11, .. }));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(session.is_connected());
}

#[test]
fn test_single_record_round_trip() {
    let (client, _) = setup(DeviceMemory::default());
    let movement = Movement {
        id: 59,
        ..sample_snapshot().movements[0].clone()
    };
    client.write_record(&movement).expect("write");
    assert_eq!(client.read_record::<Movement>(59).expect("read"), Some(movement));

    client.clear_slot::<Movement>(59).expect("clear");
    assert_eq!(client.read_record::<Movement>(59).expect("read"), None);
}
