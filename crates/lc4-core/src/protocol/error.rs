//! Protocol errors

use std::time::Duration;

use thiserror::Error;

/// Reasons a byte sequence is not a valid frame
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// First three bytes are not `43 53 4F`
    #[error("bad start marker")]
    BadStartMarker,

    /// Last two bytes are not `03 FF`
    #[error("bad end marker")]
    BadEndMarker,

    /// Length byte disagrees with the bytes between header and checksum
    #[error("length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch {
        /// Value of the length byte
        declared: usize,
        /// Payload bytes actually present
        actual: usize,
    },

    /// Checksum byte does not match the frame contents
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over opcode, length and payload
        expected: u8,
        /// Checksum byte on the wire
        actual: u8,
    },

    /// Payload does not fit the one-byte length field
    #[error("payload too large: {0} bytes (max 255)")]
    PayloadTooLarge(usize),
}

/// Errors that can occur while talking to the controller
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Serial port could not be opened
    #[error("Connection to {port} failed: {reason}")]
    ConnectionFailed {
        /// Port that was being opened
        port: String,
        /// Description from the serial layer
        reason: String,
    },

    /// No channel attached to the session
    #[error("Not connected to controller")]
    NotConnected,

    /// No complete response before the deadline
    #[error("Timeout after {}ms waiting for response to {command:#04x}", budget.as_millis())]
    Timeout {
        /// Request opcode
        command: u8,
        /// Time allowed for the response
        budget: Duration,
    },

    /// Response bytes failed validation
    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),

    /// Controller answered with NACK
    #[error("Controller rejected command {command:#04x} (error code {error_code:?})")]
    Nack {
        /// Request opcode
        command: u8,
        /// Device error code, when the NACK carried one
        error_code: Option<u8>,
    },

    /// Response opcode does not belong to the request
    #[error("Unexpected response to {command:#04x}: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedResponse {
        /// Request opcode
        command: u8,
        /// Opcode the response should have had
        expected: u8,
        /// Opcode received
        actual: u8,
    },

    /// Response payload could not be decoded
    #[error("Malformed payload for {command:#04x}: {reason}")]
    MalformedPayload {
        /// Request opcode
        command: u8,
        /// What was wrong with the payload
        reason: String,
    },

    /// Serial read or write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True for failures that leave the session usable for the next command
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ProtocolError::ConnectionFailed { .. } | ProtocolError::NotConnected | ProtocolError::Io(_)
        )
    }

    pub(crate) fn malformed(command: u8, reason: impl Into<String>) -> Self {
        ProtocolError::MalformedPayload {
            command,
            reason: reason.into(),
        }
    }
}
