//! Protocol commands
//!
//! Defines the opcodes understood by the LC4 controller firmware.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Positive acknowledgement opcode
pub const ACK: u8 = 0x06;

/// Negative acknowledgement opcode (payload: original opcode, error code)
pub const NACK: u8 = 0x15;

/// Unsolicited monitoring report opcode
pub const REPORT: u8 = 0x82;

/// Bit OR-ed into a read opcode to form its response opcode
pub const RESPONSE_BIT: u8 = 0x80;

/// Whether a command mutates controller state or fetches it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Expects ACK or NACK
    Write,
    /// Expects a typed response or NACK
    Read,
}

/// Commands accepted by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Set controller ID (0x10)
    SetId,
    /// Read controller ID (0x11)
    GetId,
    /// Read controller status (0x20)
    GetStatus,
    /// Read real-time clock (0x21)
    GetClock,
    /// Set real-time clock (0x22)
    SetClock,
    /// Save movement (0x23)
    SaveMovement,
    /// Read movement by index (0x24)
    GetMovement,
    /// Save sequence (0x30)
    SaveSequence,
    /// Read sequence by index (0x31)
    GetSequence,
    /// Save plan (0x40)
    SavePlan,
    /// Read plan by index (0x41)
    GetPlan,
    /// Save intermittence rule (0x50)
    SaveIntermittence,
    /// Read intermittence rule by index (0x51)
    GetIntermittence,
    /// Save holiday (0x60)
    SaveHoliday,
    /// Read all holidays (0x61)
    GetHolidays,
    /// Save flow rule (0x70)
    SaveFlowRule,
    /// Read flow rule by index (0x71)
    GetFlowRule,
    /// Enable monitoring reports (0x80)
    MonitoringOn,
    /// Disable monitoring reports (0x81)
    MonitoringOff,
    /// Restore factory defaults (0xF0)
    FactoryReset,
}

impl Command {
    /// All known commands
    pub const ALL: [Command; 20] = [
        Command::SetId,
        Command::GetId,
        Command::GetStatus,
        Command::GetClock,
        Command::SetClock,
        Command::SaveMovement,
        Command::GetMovement,
        Command::SaveSequence,
        Command::GetSequence,
        Command::SavePlan,
        Command::GetPlan,
        Command::SaveIntermittence,
        Command::GetIntermittence,
        Command::SaveHoliday,
        Command::GetHolidays,
        Command::SaveFlowRule,
        Command::GetFlowRule,
        Command::MonitoringOn,
        Command::MonitoringOff,
        Command::FactoryReset,
    ];

    /// Wire opcode
    pub fn opcode(&self) -> u8 {
        match self {
            Command::SetId => 0x10,
            Command::GetId => 0x11,
            Command::GetStatus => 0x20,
            Command::GetClock => 0x21,
            Command::SetClock => 0x22,
            Command::SaveMovement => 0x23,
            Command::GetMovement => 0x24,
            Command::SaveSequence => 0x30,
            Command::GetSequence => 0x31,
            Command::SavePlan => 0x40,
            Command::GetPlan => 0x41,
            Command::SaveIntermittence => 0x50,
            Command::GetIntermittence => 0x51,
            Command::SaveHoliday => 0x60,
            Command::GetHolidays => 0x61,
            Command::SaveFlowRule => 0x70,
            Command::GetFlowRule => 0x71,
            Command::MonitoringOn => 0x80,
            Command::MonitoringOff => 0x81,
            Command::FactoryReset => 0xF0,
        }
    }

    /// Look up a command by opcode
    pub fn from_opcode(opcode: u8) -> Option<Command> {
        Command::ALL.iter().copied().find(|c| c.opcode() == opcode)
    }

    /// Write or read
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::GetId
            | Command::GetStatus
            | Command::GetClock
            | Command::GetMovement
            | Command::GetSequence
            | Command::GetPlan
            | Command::GetIntermittence
            | Command::GetHolidays
            | Command::GetFlowRule => CommandKind::Read,
            _ => CommandKind::Write,
        }
    }

    /// Check if this command mutates controller state
    pub fn is_write(&self) -> bool {
        self.kind() == CommandKind::Write
    }

    /// Opcode of a successful response
    pub fn response_opcode(&self) -> u8 {
        match self.kind() {
            CommandKind::Write => ACK,
            CommandKind::Read => self.opcode() | RESPONSE_BIT,
        }
    }

    /// Read commands addressed by a single slot index byte
    pub fn is_indexed_read(&self) -> bool {
        matches!(
            self,
            Command::GetMovement
                | Command::GetSequence
                | Command::GetPlan
                | Command::GetIntermittence
                | Command::GetFlowRule
        )
    }

    /// Get the expected response timeout
    pub fn timeout(&self) -> Duration {
        match self {
            Command::FactoryReset => Duration::from_millis(5000), // EEPROM erase
            _ => Duration::from_millis(super::DEFAULT_TIMEOUT_MS),
        }
    }
}
