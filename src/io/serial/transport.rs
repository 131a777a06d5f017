// src/io/serial/transport.rs
//
// Byte transport seen by a port reader. The serialport crate backs real
// devices; tests script their own.

use std::io::Read;

use serde::Serialize;

use super::utils::{to_serialport_data_bits, to_serialport_parity, to_serialport_stop_bits};
use crate::error::{Result, SnifferError};
use crate::settings::PortConfig;

/// Outcome of one bounded wait for bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were copied into the buffer
    Data(usize),
    /// Timeout elapsed with nothing to read
    Idle,
    /// The device went away (EOF)
    Closed,
}

/// An open link to one device
pub trait PortTransport: Send {
    /// Wait at most the configured timeout for bytes
    fn read_available(&mut self, buf: &mut [u8]) -> std::io::Result<ReadOutcome>;
}

/// Opens transports for port configurations
pub trait TransportOpener: Send + Sync {
    fn open(&self, config: &PortConfig) -> Result<Box<dyn PortTransport>>;
}

// ============================================================================
// serialport backend
// ============================================================================

/// Opens real serial devices through the serialport crate
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortOpener;

impl TransportOpener for SerialPortOpener {
    fn open(&self, config: &PortConfig) -> Result<Box<dyn PortTransport>> {
        let port = serialport::new(&config.path, config.baud_rate)
            .data_bits(to_serialport_data_bits(config.data_bits))
            .stop_bits(to_serialport_stop_bits(&config.stop_bits))
            .parity(to_serialport_parity(&config.parity))
            .timeout(config.timeout())
            .open()
            .map_err(|e| SnifferError::TransportOpen {
                path: config.path.clone(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(SerialTransport { port }))
    }
}

struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl PortTransport for SerialTransport {
    fn read_available(&mut self, buf: &mut [u8]) -> std::io::Result<ReadOutcome> {
        match self.port.read(buf) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            // Timeout is expected for serial reads
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(ReadOutcome::Idle),
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(ReadOutcome::Idle),
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// Port enumeration
// ============================================================================

/// Information about an available serial port
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

/// List available serial ports.
///
/// On macOS, /dev/tty.* devices are filtered out in favour of /dev/cu.*;
/// the tty variants block on open waiting for carrier detect.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| SnifferError::TransportOpen {
        path: "<enumeration>".to_string(),
        reason: e.to_string(),
    })?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, manufacturer, product, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    "USB".to_string(),
                    info.manufacturer,
                    info.product,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth".to_string(), None, None, None, None)
                }
                serialport::SerialPortType::PciPort => ("PCI".to_string(), None, None, None, None),
                serialport::SerialPortType::Unknown => {
                    ("Unknown".to_string(), None, None, None, None)
                }
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type,
                manufacturer,
                product,
                vid,
                pid,
            }
        })
        .collect())
}

// ============================================================================
// Scripted transport (tests)
// ============================================================================
