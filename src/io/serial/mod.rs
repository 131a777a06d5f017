// src/io/serial/mod.rs
//
// Serial port capture: marker parsing, frame extraction, the transport
// seam over the serialport crate, and the per-port reader task.

pub mod framer;
pub mod marker;
pub mod reader;
pub mod transport;
pub mod utils;

pub use framer::{FrameExtractor, FramingConfig, FramingMode};
pub use reader::{run_port_reader, spawn_port_reader, PortLogOptions, ReaderSummary};
pub use transport::{
    list_serial_ports, PortTransport, ReadOutcome, SerialPortInfo, SerialPortOpener,
    TransportOpener,
};
pub use utils::{Parity, StopBits};
