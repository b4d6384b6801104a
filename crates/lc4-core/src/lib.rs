//! # LC4 Core Library
//!
//! Configuration and monitoring of LC4 traffic-signal controllers over a
//! serial link.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Frame encoding/decoding for the controller's binary protocol
//! - A transport session with strict request/response pairing
//! - Typed commands for every controller table
//! - Full-configuration capture and upload
//! - Live monitoring of signal outputs
//! - A simulated controller for demos and tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lc4_core::prelude::*;
//!
//! let session = Arc::new(Session::new(SessionConfig::default()));
//! session.connect("/dev/ttyUSB0", 9600)?;
//!
//! let snapshot = Orchestrator::new(Client::new(session.clone())).capture_all()?;
//! save_snapshot(&snapshot, "crossing.json")?;
//! ```

pub mod demo;
pub mod model;
pub mod monitor;
pub mod orchestrator;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::model::{
        load_snapshot, save_snapshot, ConfigurationSnapshot, DeviceClock, FlowRule, Holiday,
        Intermittence, ModelError, Movement, Plan, Sequence, SlotRecord, Table,
    };
    pub use crate::monitor::{Monitor, MonitorReport};
    pub use crate::orchestrator::{CancelToken, Orchestrator, SyncError, UploadReport};
    pub use crate::protocol::{Client, Command, ProtocolError, Session, SessionConfig};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
