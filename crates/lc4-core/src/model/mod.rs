//! Configuration model
//!
//! In-memory representation of every controller table. Each table entry maps
//! to one fixed-index slot on the device and has a fixed-width binary layout
//! that is used both for save commands and for read responses.

mod lights;
mod records;
pub mod snapshot;

pub use lights::{day_type_applies, day_type_label, group_states, Lamp, SignalGroupState, SIGNAL_GROUPS};
pub use records::{
    ControllerInfo, DeviceClock, FlowRule, FlowRuleType, Holiday, Intermittence, Movement,
    Plan, PortMasks, PortValues, Sequence, SequenceType, MAX_SEQUENCE_STEPS, TIME_SLOTS,
};
pub use snapshot::{load_snapshot, save_snapshot, ConfigurationSnapshot, SnapshotError};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::protocol::Command;

/// Marker byte for unused fields and empty slots
pub const EMPTY_SLOT: u8 = 0xFF;

/// Configuration tables in upload order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Controller identity byte
    Identity,
    /// Real-time clock
    Clock,
    /// Lamp patterns and durations
    Movements,
    /// Movement cycles
    Sequences,
    /// Time-of-day schedule
    Plans,
    /// Flashing rules
    Intermittences,
    /// Calendar exceptions
    Holidays,
    /// Demand-driven transitions
    FlowRules,
}

impl Table {
    /// Number of slots on the device
    pub fn capacity(&self) -> u8 {
        match self {
            Table::Identity | Table::Clock => 1,
            Table::Movements => 60,
            Table::Sequences => 8,
            Table::Plans => 20,
            Table::Intermittences => 10,
            Table::Holidays => 20,
            Table::FlowRules => 10,
        }
    }

    /// Command used to write one slot
    pub fn save_command(&self) -> Command {
        match self {
            Table::Identity => Command::SetId,
            Table::Clock => Command::SetClock,
            Table::Movements => Command::SaveMovement,
            Table::Sequences => Command::SaveSequence,
            Table::Plans => Command::SavePlan,
            Table::Intermittences => Command::SaveIntermittence,
            Table::Holidays => Command::SaveHoliday,
            Table::FlowRules => Command::SaveFlowRule,
        }
    }

    /// Command used to read the table
    pub fn read_command(&self) -> Command {
        match self {
            Table::Identity => Command::GetId,
            Table::Clock => Command::GetClock,
            Table::Movements => Command::GetMovement,
            Table::Sequences => Command::GetSequence,
            Table::Plans => Command::GetPlan,
            Table::Intermittences => Command::GetIntermittence,
            Table::Holidays => Command::GetHolidays,
            Table::FlowRules => Command::GetFlowRule,
        }
    }

    /// Name used in logs, errors and the snapshot document
    pub fn name(&self) -> &'static str {
        match self {
            Table::Identity => "identity",
            Table::Clock => "clock",
            Table::Movements => "movements",
            Table::Sequences => "sequences",
            Table::Plans => "plans",
            Table::Intermittences => "intermittences",
            Table::Holidays => "holidays",
            Table::FlowRules => "flow_rules",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Validation and layout errors for configuration records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Record payload has the wrong size for its table
    #[error("{table}: payload is {actual} bytes, expected {expected}")]
    PayloadLength {
        /// Table being decoded
        table: Table,
        /// Fixed record size
        expected: usize,
        /// Bytes received
        actual: usize,
    },

    /// Slot index beyond the table capacity
    #[error("{table}: index {index} outside 0..{capacity}")]
    IndexOutOfRange {
        /// Table holding the record
        table: Table,
        /// Offending slot
        index: u8,
        /// Slots available on the device
        capacity: u8,
    },

    /// A field value the firmware does not accept
    #[error("{table}[{index}]: {field} = {value} outside {min}..={max}")]
    FieldOutOfRange {
        /// Table holding the record
        table: Table,
        /// Slot of the record
        index: u8,
        /// Field name as written in the project file
        field: &'static str,
        /// Rejected value
        value: u8,
        /// Lowest accepted value
        min: u8,
        /// Highest accepted value
        max: u8,
    },

    /// Two records claim the same slot
    #[error("{table}: index {index} appears more than once")]
    DuplicateIndex {
        /// Table holding the records
        table: Table,
        /// Shared slot
        index: u8,
    },

    /// Sequence lists more movements than a slot holds
    #[error("sequences[{index}]: {count} movements, at most {max} allowed", max = MAX_SEQUENCE_STEPS)]
    TooManySteps {
        /// Sequence slot
        index: u8,
        /// Movements listed
        count: usize,
    },
}

pub(crate) fn check_range(
    table: Table,
    index: u8,
    field: &'static str,
    value: u8,
    min: u8,
    max: u8,
) -> Result<(), ModelError> {
    if value < min || value > max {
        return Err(ModelError::FieldOutOfRange {
            table,
            index,
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// An entry stored in one fixed-index slot of a device table
pub trait SlotRecord: Sized + Clone {
    /// Table this record belongs to
    const TABLE: Table;

    /// Size of the binary record
    const PAYLOAD_LEN: usize;

    /// Slot index
    fn index(&self) -> u8;

    /// Binary record, index first
    fn encode(&self) -> Vec<u8>;

    /// Decode a binary record; `Ok(None)` for an empty slot
    fn decode(payload: &[u8]) -> Result<Option<Self>, ModelError>;

    /// Check field ranges
    fn validate(&self) -> Result<(), ModelError>;

    /// Payload that clears slot `index` on the device
    fn empty_payload(index: u8) -> Vec<u8> {
        let mut payload = vec![EMPTY_SLOT; Self::PAYLOAD_LEN];
        payload[0] = index;
        payload
    }

    /// This table's collection inside a snapshot
    fn records(snapshot: &ConfigurationSnapshot) -> &[Self];

    /// Mutable access to this table's collection inside a snapshot
    fn records_mut(snapshot: &mut ConfigurationSnapshot) -> &mut Vec<Self>;

    /// Check the slot index against the table capacity
    fn check_index(&self) -> Result<(), ModelError> {
        let capacity = Self::TABLE.capacity();
        if self.index() >= capacity {
            return Err(ModelError::IndexOutOfRange {
                table: Self::TABLE,
                index: self.index(),
                capacity,
            });
        }
        Ok(())
    }
}

pub(crate) fn check_len(table: Table, expected: usize, payload: &[u8]) -> Result<(), ModelError> {
    if payload.len() != expected {
        return Err(ModelError::PayloadLength {
            table,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}
