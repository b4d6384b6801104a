//! Serial port handling
//!
//! Port discovery and opening for the controller's RS-232/USB link.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::time::Duration;

use super::ProtocolError;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb) => (Some(usb.vid), Some(usb.pid), usb.product),
            _ => (None, None, None),
        };
        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Sort key putting USB adapters first, then numbered ports in numeric order
/// (`COM2` before `COM10`), then everything else by name.
fn port_sort_key(name: &str) -> (u8, String, usize) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    let split = basename
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    let (prefix, digits) = basename.split_at(split);
    let number = digits.parse::<usize>().unwrap_or(usize::MAX);
    let rank = match prefix {
        "ttyUSB" | "ttyACM" => 0,
        "COM" => 1,
        _ => 2,
    };
    (rank, prefix.to_string(), number)
}

/// List available serial ports in a stable order
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports.dedup_by(|a, b| a.name == b.name);
    ports
}

/// Open and configure a serial port for controller communication (8N1, no flow control)
pub fn open_port(name: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let failed = |e: serialport::Error| ProtocolError::ConnectionFailed {
        port: name.to_string(),
        reason: e.to_string(),
    };

    // Short timeout; the session polls with its own deadline
    let port = serialport::new(name, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(failed)?;

    tracing::debug!(port = name, baud_rate, "serial port opened");
    Ok(port)
}
