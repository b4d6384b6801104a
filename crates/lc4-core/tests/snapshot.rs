use std::fs;

use lc4_core::demo::sample_snapshot;
use lc4_core::model::snapshot::from_json;
use lc4_core::model::{
    load_snapshot, save_snapshot, DeviceClock, FlowRuleType, SequenceType, SnapshotError,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;

#[test]
fn test_save_and_load() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("crossing.json");

    let mut snapshot = sample_snapshot();
    snapshot.info.controller_id = Some(12);
    snapshot.info.clock = Some(DeviceClock {
        hour: 10,
        minute: 30,
        second: 0,
        day: 14,
        month: 2,
        year: 25,
        day_of_week: 5,
    });
    snapshot.software_config = Some(json!({"intersection": {"name": "Main & 5th"}}));

    save_snapshot(&snapshot, &path).expect("save");
    let loaded = load_snapshot(&path).expect("load");
    assert_eq!(loaded, snapshot);
}

#[test]
fn test_load_missing_file() {
    let dir = tempdir().expect("tempdir");
    assert!(matches!(
        load_snapshot(dir.path().join("nope.json")),
        Err(SnapshotError::Io(_))
    ));
}

#[test]
fn test_load_invalid_json() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ not json").expect("write");
    assert!(matches!(load_snapshot(&path), Err(SnapshotError::Json(_))));
}

#[test]
fn test_legacy_flat_layout_is_migrated() {
    let legacy = json!({
        "controller_id": "4",
        "is_connected": true,
        "movements": [
            {"id": 1, "portD": "24", "portE": "0x40", "portF": "00", "portH": 0, "portJ": 0,
             "times": [20, 15, 10, 0, 0]},
            {"id": 0, "portD": 72, "portE": 64, "portF": 0, "portH": 0, "portJ": 0,
             "times": [3, 3, 3, 0, 0]}
        ],
        "sequences": [
            {"id": 0, "type": 0, "anchor_step": 0, "movements": [0, 1]}
        ],
        "plans": [
            {"id": 0, "day_type_id": 7, "sequence_id": 0, "time_selector": 1, "hour": 6, "minute": 0}
        ],
        "flow_rules": [
            {"id": 0, "sequence_id": 0, "origin_movement_id": 1, "rule_type": 3,
             "demand_mask": 1, "destination_movement_id": 0}
        ],
        "software_config": {"zoom": 2}
    });

    let snapshot = from_json(&legacy.to_string()).expect("migrate");
    assert_eq!(snapshot.info.controller_id, Some(4));

    // sorted by slot, hex strings parsed
    assert_eq!(snapshot.movements[0].id, 0);
    assert_eq!(snapshot.movements[1].ports.d, 0x24);
    assert_eq!(snapshot.movements[1].ports.e, 0x40);

    assert_eq!(snapshot.sequences[0].sequence_type, SequenceType::Automatic);
    assert_eq!(snapshot.plans[0].time_selector, 1);
    assert_eq!(snapshot.flow_rules[0].rule_type, FlowRuleType::Other(3));
    assert!(snapshot.holidays.is_empty());
    assert_eq!(snapshot.software_config, Some(json!({"zoom": 2})));
    assert!(snapshot.validate().is_ok());
}

#[test]
fn test_legacy_controller_id_placeholder() {
    for placeholder in [json!("N/A"), json!("Formato Inválido"), json!(null)] {
        let legacy = json!({
            "controller_id": placeholder,
            "plans": [
                {"id": 0, "day_type_id": 7, "sequence_id": 0, "time_sel": 0, "hour": 6, "minute": 0}
            ]
        });
        let snapshot = from_json(&legacy.to_string()).expect("migrate");
        assert_eq!(snapshot.info.controller_id, None);
        assert_eq!(snapshot.plans.len(), 1);
    }
}

#[test]
fn test_migrated_file_saves_in_current_layout() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("legacy.json");
    fs::write(
        &path,
        json!({"holidays": [{"id": 0, "day": 1, "month": 5}]}).to_string(),
    )
    .expect("write");

    let snapshot = load_snapshot(&path).expect("load");
    save_snapshot(&snapshot, &path).expect("save");

    let saved: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
    assert_eq!(saved["hardware_config"]["holidays"][0]["month"], 5);
    assert!(saved.get("holidays").is_none());
    assert!(saved["saved_at"].is_string());
}
