// Serial line monitor library: marker-framed packet capture from one or
// more serial ports, bounded ingestion into a display, and rotating
// timestamped log files.

#[macro_use]
pub mod logging;
pub mod error;
pub mod io;
pub mod settings;

pub use error::{Result, SnifferError};
pub use io::{DisplaySink, Monitor, MonitorReport, Packet, PortEvent, PortState, StopHandle};
pub use settings::{load_settings, PortConfig, SnifferSettings};
