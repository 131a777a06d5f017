// src/io/mod.rs
//
// Shared packet and event types used by the port readers, the log sinks
// and the monitor that drains them.

pub mod channel;
pub mod log_sink;
pub mod monitor;
pub mod pending;
pub mod serial;

use chrono::{DateTime, Local};

pub use channel::{event_channel, EventReceiver, EventSender};
pub use log_sink::{LogHeader, LogSink, LogSource};
pub use monitor::{DisplaySink, Monitor, MonitorReport, StopHandle};
pub use pending::{DisplayQueue, LogQueue};

// ============================================================================
// Packets
// ============================================================================

/// One framed packet captured from a port. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    /// Logical channel label, e.g. "RX1"
    pub label: String,
    /// Wall-clock time the chunk carrying the frame's last byte was read
    pub timestamp: DateTime<Local>,
    pub bytes: Vec<u8>,
    /// Set on the residual-buffer packet flushed at shutdown
    pub incomplete: bool,
}

impl Packet {
    pub fn new(label: impl Into<String>, timestamp: DateTime<Local>, bytes: Vec<u8>) -> Self {
        Self {
            label: label.into(),
            timestamp,
            bytes,
            incomplete: false,
        }
    }

    /// Render as a display/log line: `[HH:MM:SS.mmm] <label> <HEX HEX ...>\n`
    pub fn render_line(&self) -> String {
        format!(
            "[{}] {} {}\n",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.label,
            hex_bytes(&self.bytes)
        )
    }
}

/// Uppercase hex, one space between byte pairs
pub fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Port Events
// ============================================================================

/// Lifecycle of one port reader
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortState {
    Idle,
    Connecting,
    Streaming,
    Stopping,
    Closed,
    Errored,
}

/// Event published by a port reader to the monitor
#[derive(Clone, Debug)]
pub enum PortEvent {
    Packet(Packet),
    Status {
        label: String,
        state: PortState,
        message: String,
    },
    Error {
        label: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hex_bytes_uppercase_spaced() {
        assert_eq!(hex_bytes(&[0x02, 0xab, 0x0f, 0x03]), "02 AB 0F 03");
        assert_eq!(hex_bytes(&[]), "");
    }

    #[test]
    fn test_render_line() {
        let ts = Local.with_ymd_and_hms(2024, 5, 1, 13, 7, 9).unwrap()
            + chrono::Duration::milliseconds(42);
        let packet = Packet::new("RX1", ts, vec![0x02, 0x41, 0x03]);
        assert_eq!(packet.render_line(), "[13:07:09.042] RX1 02 41 03\n");
    }
}
