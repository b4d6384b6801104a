//! Typed command layer
//!
//! Turns [`Command`]s into session transactions and interprets the reply:
//! writes expect ACK, reads expect `opcode | 0x80` with a binary record,
//! and either may be refused with NACK.

use std::sync::Arc;

use chrono::Local;

use super::commands::{Command, CommandKind, ACK, NACK};
use super::frame::Frame;
use super::session::Session;
use super::ProtocolError;
use crate::model::{DeviceClock, Holiday, ModelError, SlotRecord};

/// Command-level access to a controller over a shared session
#[derive(Clone)]
pub struct Client {
    session: Arc<Session>,
}

impl Client {
    /// Client over a shared session
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Underlying session
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn exchange(&self, command: Command, payload: &[u8]) -> Result<Frame, ProtocolError> {
        let opcode = command.opcode();
        let response = self.session.transact(opcode, payload, command.timeout())?;

        if response.command == command.response_opcode() {
            return Ok(response);
        }
        if response.command == NACK {
            if let Some(&refused) = response.payload.first() {
                if refused != opcode {
                    tracing::warn!(
                        command = format_args!("{:#04x}", opcode),
                        refused = format_args!("{:#04x}", refused),
                        "NACK names a different command"
                    );
                }
            }
            return Err(ProtocolError::Nack {
                command: opcode,
                error_code: response.payload.get(1).copied(),
            });
        }
        Err(ProtocolError::UnexpectedResponse {
            command: opcode,
            expected: command.response_opcode(),
            actual: response.command,
        })
    }

    /// Send a write command and wait for ACK
    pub fn write(&self, command: Command, payload: &[u8]) -> Result<(), ProtocolError> {
        debug_assert_eq!(command.kind(), CommandKind::Write);
        let response = self.exchange(command, payload)?;
        debug_assert_eq!(response.command, ACK);
        tracing::debug!(command = ?command, len = payload.len(), "write acknowledged");
        Ok(())
    }

    /// Send a read command and return the response payload
    pub fn read(&self, command: Command, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        debug_assert_eq!(command.kind(), CommandKind::Read);
        Ok(self.exchange(command, payload)?.payload)
    }

    /// Read one slot by index; a NACK means the slot does not exist
    pub fn read_slot(&self, command: Command, index: u8) -> Result<Option<Vec<u8>>, ProtocolError> {
        match self.read(command, &[index]) {
            Ok(payload) => Ok(Some(payload)),
            Err(ProtocolError::Nack { error_code, .. }) => {
                tracing::debug!(command = ?command, index, ?error_code, "slot absent");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Read controller ID
    pub fn get_id(&self) -> Result<u8, ProtocolError> {
        let payload = self.read(Command::GetId, &[])?;
        payload
            .first()
            .copied()
            .ok_or_else(|| ProtocolError::malformed(Command::GetId.opcode(), "empty ID response"))
    }

    /// Set controller ID
    pub fn set_id(&self, id: u8) -> Result<(), ProtocolError> {
        self.write(Command::SetId, &[id])
    }

    /// Raw status bytes; their layout is firmware-specific
    pub fn get_status(&self) -> Result<Vec<u8>, ProtocolError> {
        self.read(Command::GetStatus, &[])
    }

    /// Read the real-time clock
    pub fn get_clock(&self) -> Result<DeviceClock, ProtocolError> {
        let payload = self.read(Command::GetClock, &[])?;
        DeviceClock::decode(&payload).map_err(|e| model_error(Command::GetClock, e))
    }

    /// Set the real-time clock
    pub fn set_clock(&self, clock: &DeviceClock) -> Result<(), ProtocolError> {
        self.write(Command::SetClock, &clock.encode())
    }

    /// Set the real-time clock from the host's local time
    pub fn sync_clock(&self) -> Result<DeviceClock, ProtocolError> {
        let clock = DeviceClock::from_datetime(&Local::now());
        self.set_clock(&clock)?;
        tracing::info!(?clock, "controller clock synchronised");
        Ok(clock)
    }

    /// Restore factory defaults
    pub fn factory_reset(&self) -> Result<(), ProtocolError> {
        tracing::warn!("factory reset requested");
        self.write(Command::FactoryReset, &[])
    }

    /// Ask the controller to start or stop sending reports
    pub fn set_monitoring(&self, enabled: bool) -> Result<(), ProtocolError> {
        let command = if enabled {
            Command::MonitoringOn
        } else {
            Command::MonitoringOff
        };
        self.write(command, &[])
    }

    /// Read one record; `Ok(None)` when the slot is empty or absent
    pub fn read_record<R: SlotRecord>(&self, index: u8) -> Result<Option<R>, ProtocolError> {
        let command = R::TABLE.read_command();
        let Some(payload) = self.read_slot(command, index)? else {
            return Ok(None);
        };
        let record = R::decode(&payload).map_err(|e| model_error(command, e))?;
        match record {
            Some(record) if record.index() != index => Err(ProtocolError::malformed(
                command.opcode(),
                format!("asked for slot {}, got slot {}", index, record.index()),
            )),
            other => Ok(other),
        }
    }

    /// Write one record into its slot
    pub fn write_record<R: SlotRecord>(&self, record: &R) -> Result<(), ProtocolError> {
        self.write(R::TABLE.save_command(), &record.encode())
    }

    /// Clear one slot
    pub fn clear_slot<R: SlotRecord>(&self, index: u8) -> Result<(), ProtocolError> {
        self.write(R::TABLE.save_command(), &R::empty_payload(index))
    }

    /// Read every holiday in one request
    pub fn read_holidays(&self) -> Result<Vec<Holiday>, ProtocolError> {
        let command = Command::GetHolidays;
        let payload = self.read(command, &[])?;
        decode_holidays(&payload).map_err(|e| match e {
            HolidayListError::Partial(len) => ProtocolError::malformed(
                command.opcode(),
                format!("{} bytes is not a whole number of 3-byte records", len),
            ),
            HolidayListError::Model(e) => model_error(command, e),
        })
    }
}

enum HolidayListError {
    Partial(usize),
    Model(ModelError),
}

fn decode_holidays(payload: &[u8]) -> Result<Vec<Holiday>, HolidayListError> {
    let width = Holiday::PAYLOAD_LEN;
    if payload.len() % width != 0 {
        return Err(HolidayListError::Partial(payload.len()));
    }
    let mut holidays = Vec::with_capacity(payload.len() / width);
    for chunk in payload.chunks_exact(width) {
        if let Some(holiday) = Holiday::decode(chunk).map_err(HolidayListError::Model)? {
            holidays.push(holiday);
        }
    }
    holidays.sort_by_key(|h| h.id);
    Ok(holidays)
}

fn model_error(command: Command, e: ModelError) -> ProtocolError {
    ProtocolError::malformed(command.opcode(), e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_holidays_skips_cleared() {
        let payload = [0, 25, 12, 1, 0, 0, 2, 1, 1];
        let holidays = match decode_holidays(&payload) {
            Ok(h) => h,
            Err(_) => panic!("decode failed"),
        };
        assert_eq!(holidays.len(), 2);
        assert_eq!((holidays[0].day, holidays[0].month), (25, 12));
        assert_eq!(holidays[1].id, 2);
    }

    #[test]
    fn test_decode_holidays_partial_record() {
        assert!(matches!(
            decode_holidays(&[0, 25, 12, 1]),
            Err(HolidayListError::Partial(4))
        ));
    }

    #[test]
    fn test_decode_holidays_empty() {
        assert!(matches!(decode_holidays(&[]), Ok(h) if h.is_empty()));
    }
}
