//! Serial Protocol Communication
//!
//! Implements the LC4 controller's framed binary protocol: frame codec,
//! transport session, and the typed command layer on top.

pub mod channel;
mod client;
pub mod commands;
mod error;
pub mod frame;
pub mod serial;
mod session;

pub use channel::{CommunicationChannel, SerialChannel};
pub use client::Client;
pub use commands::{Command, CommandKind, ACK, NACK, REPORT};
pub use error::{FrameError, ProtocolError};
pub use frame::{Frame, FrameScanner};
pub use serial::{list_ports, open_port, PortInfo};
pub use session::{
    Direction, ReportSink, Session, SessionConfig, TrafficCounters, WireObserver,
};

/// Default baud rate of the controller's serial link
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default timeout for responses in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1500;
