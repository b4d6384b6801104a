//! Configuration snapshot
//!
//! A complete copy of the controller configuration, as captured from the
//! device or loaded from a project file. Project files are JSON:
//!
//! ```json
//! {
//!   "version": 1,
//!   "saved_at": "2025-01-01T00:00:00Z",
//!   "hardware_config": { "info": {..}, "movements": [..], "sequences": [..], ... },
//!   "software_config": { ... }
//! }
//! ```
//!
//! `software_config` belongs to the front end and is carried through untouched.
//! Older files kept the tables at the top level without `hardware_config`;
//! [`load_snapshot`] accepts both.

use chrono::{NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

use super::records::{
    ControllerInfo, FlowRule, Holiday, Intermittence, Movement, Plan, Sequence,
};
use super::{ModelError, SlotRecord, Table};

/// Current project file version
pub const SNAPSHOT_VERSION: u32 = 1;

const TABLE_KEYS: [&str; 6] = [
    "movements",
    "sequences",
    "plans",
    "intermittences",
    "holidays",
    "flow_rules",
];

/// Errors reading or writing project files
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// File could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// File is not valid JSON or a table does not parse
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Neither the current nor the legacy layout
    #[error("Unsupported project layout: {0}")]
    UnsupportedLayout(String),
}

/// Every table of one controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationSnapshot {
    /// Identity and clock
    pub info: ControllerInfo,
    /// Occupied movement slots
    pub movements: Vec<Movement>,
    /// Occupied sequence slots
    pub sequences: Vec<Sequence>,
    /// Occupied plan slots
    pub plans: Vec<Plan>,
    /// Occupied intermittence slots
    pub intermittences: Vec<Intermittence>,
    /// Occupied holiday slots
    pub holidays: Vec<Holiday>,
    /// Occupied flow-rule slots
    pub flow_rules: Vec<FlowRule>,
    /// Front-end settings stored beside the hardware tables
    #[serde(skip)]
    pub software_config: Option<Value>,
}

fn check_table<R: SlotRecord>(records: &[R]) -> Result<(), ModelError> {
    let mut seen = HashSet::new();
    for record in records {
        record.validate()?;
        if !seen.insert(record.index()) {
            return Err(ModelError::DuplicateIndex {
                table: R::TABLE,
                index: record.index(),
            });
        }
    }
    Ok(())
}

impl ConfigurationSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Check every record and reject duplicate slot indices
    pub fn validate(&self) -> Result<(), ModelError> {
        if let Some(clock) = &self.info.clock {
            clock.validate()?;
        }
        check_table(&self.movements)?;
        check_table(&self.sequences)?;
        check_table(&self.plans)?;
        check_table(&self.intermittences)?;
        check_table(&self.holidays)?;
        check_table(&self.flow_rules)
    }

    /// Sort every table by slot index
    pub fn normalize(&mut self) {
        self.movements.sort_by_key(|r| r.id);
        self.sequences.sort_by_key(|r| r.id);
        self.plans.sort_by_key(|r| r.id);
        self.intermittences.sort_by_key(|r| r.id);
        self.holidays.sort_by_key(|r| r.id);
        self.flow_rules.sort_by_key(|r| r.id);
    }

    /// Number of occupied slots across all tables
    pub fn record_count(&self) -> usize {
        self.movements.len()
            + self.sequences.len()
            + self.plans.len()
            + self.intermittences.len()
            + self.holidays.len()
            + self.flow_rules.len()
    }

    /// Occupied slots of one table
    pub fn table_len(&self, table: Table) -> usize {
        match table {
            Table::Identity => usize::from(self.info.controller_id.is_some()),
            Table::Clock => usize::from(self.info.clock.is_some()),
            Table::Movements => self.movements.len(),
            Table::Sequences => self.sequences.len(),
            Table::Plans => self.plans.len(),
            Table::Intermittences => self.intermittences.len(),
            Table::Holidays => self.holidays.len(),
            Table::FlowRules => self.flow_rules.len(),
        }
    }

    /// Movement in slot `id`
    pub fn movement(&self, id: u8) -> Option<&Movement> {
        self.movements.iter().find(|m| m.id == id)
    }

    /// Sequence in slot `id`
    pub fn sequence(&self, id: u8) -> Option<&Sequence> {
        self.sequences.iter().find(|s| s.id == id)
    }

    /// Plan in slot `id`
    pub fn plan(&self, id: u8) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == id)
    }

    /// Seconds for one pass of the plan's sequence.
    ///
    /// Sum of each referenced movement's duration for the plan's time
    /// selector. Movements missing from the snapshot count as zero.
    pub fn plan_cycle_time(&self, plan_id: u8) -> Option<u32> {
        let plan = self.plan(plan_id)?;
        let sequence = self.sequence(plan.sequence_id)?;
        let total = sequence
            .movement_refs
            .iter()
            .filter_map(|&id| self.movement(id))
            .filter_map(|m| m.duration(plan.time_selector))
            .map(u32::from)
            .sum();
        Some(total)
    }

    /// Plan in force at `at`: the latest-starting plan scheduled that day
    /// whose start time has passed
    pub fn active_plan(&self, at: NaiveDateTime) -> Option<&Plan> {
        let date = at.date();
        let minute_of_day = (at.hour() * 60 + at.minute()) as u16;
        self.plans
            .iter()
            .filter(|p| p.applies_on(date, &self.holidays))
            .filter(|p| p.start_minute_of_day() <= minute_of_day)
            .max_by_key(|p| (p.start_minute_of_day(), p.id))
    }
}

#[derive(Serialize)]
struct SnapshotDocumentRef<'a> {
    version: u32,
    saved_at: String,
    hardware_config: &'a ConfigurationSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    software_config: Option<&'a Value>,
}

#[derive(Deserialize)]
struct SnapshotDocument {
    #[serde(default)]
    version: Option<u32>,
    hardware_config: ConfigurationSnapshot,
    #[serde(default)]
    software_config: Option<Value>,
}

/// Serialize a snapshot into the project file format
pub fn to_json(snapshot: &ConfigurationSnapshot) -> Result<String, SnapshotError> {
    let document = SnapshotDocumentRef {
        version: SNAPSHOT_VERSION,
        saved_at: Utc::now().to_rfc3339(),
        hardware_config: snapshot,
        software_config: snapshot.software_config.as_ref(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Parse a project file, current or legacy layout
pub fn from_json(text: &str) -> Result<ConfigurationSnapshot, SnapshotError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut root) = value else {
        return Err(SnapshotError::UnsupportedLayout(
            "top level is not an object".to_string(),
        ));
    };

    let mut snapshot = if root.contains_key("hardware_config") {
        let document: SnapshotDocument = serde_json::from_value(Value::Object(root))?;
        if let Some(version) = document.version {
            if version > SNAPSHOT_VERSION {
                return Err(SnapshotError::UnsupportedLayout(format!(
                    "version {} is newer than {}",
                    version, SNAPSHOT_VERSION
                )));
            }
        }
        let mut snapshot = document.hardware_config;
        snapshot.software_config = document.software_config;
        snapshot
    } else if TABLE_KEYS.iter().any(|key| root.contains_key(*key)) {
        tracing::info!("migrating flat project layout");
        migrate_flat(&mut root)?
    } else {
        return Err(SnapshotError::UnsupportedLayout(
            "no hardware_config section and no tables".to_string(),
        ));
    };

    snapshot.normalize();
    Ok(snapshot)
}

/// Old files: tables and `controller_id` at the top level
fn migrate_flat(root: &mut Map<String, Value>) -> Result<ConfigurationSnapshot, SnapshotError> {
    let software_config = root.remove("software_config");

    let mut hardware = Map::new();
    for key in TABLE_KEYS {
        if let Some(table) = root.remove(key) {
            hardware.insert(key.to_string(), table);
        }
    }

    let mut info = match root.remove("info") {
        Some(Value::Object(info)) => info,
        _ => Map::new(),
    };
    for key in ["controller_id", "clock"] {
        if let Some(value) = root.remove(key) {
            info.entry(key.to_string()).or_insert(value);
        }
    }
    hardware.insert("info".to_string(), Value::Object(info));

    let mut snapshot: ConfigurationSnapshot = serde_json::from_value(Value::Object(hardware))?;
    snapshot.software_config = software_config;
    Ok(snapshot)
}

/// Write a snapshot to a project file
pub fn save_snapshot<P: AsRef<Path>>(
    snapshot: &ConfigurationSnapshot,
    path: P,
) -> Result<(), SnapshotError> {
    let path = path.as_ref();
    fs::write(path, to_json(snapshot)?)?;
    tracing::info!(path = %path.display(), records = snapshot.record_count(), "snapshot saved");
    Ok(())
}

/// Read a project file
pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<ConfigurationSnapshot, SnapshotError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let snapshot = from_json(&text)?;
    tracing::info!(path = %path.display(), records = snapshot.record_count(), "snapshot loaded");
    Ok(snapshot)
}
