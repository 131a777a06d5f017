// src/settings.rs
//
// Sniffer configuration: per-port line parameters and framing markers,
// log-file options and ingestion limits. Loaded from TOML.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SnifferError};
use crate::io::serial::framer::FramingConfig;
use crate::io::serial::marker;
pub use crate::io::serial::utils::{Parity, StopBits};

/// Rotate a log file once this many packet bytes have been written (20 MiB)
pub const DEFAULT_MAX_LOG_BYTES: u64 = 20 * 1024 * 1024;

/// Longest read wait the reader will honour
const MAX_TIMEOUT_MS: u64 = 1000;

// ============================================================================
// Port configuration
// ============================================================================

/// Framing protocol preset
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// Markers come from the port's marker text
    #[default]
    #[serde(rename = "standard")]
    Standard,
    /// Gilbarco two-wire pump protocol: STX..ETX framing, always buffered
    #[serde(rename = "gilbarco_2wire")]
    Gilbarco2Wire,
}

/// One monitored port. Immutable for the length of a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Logical channel label, e.g. "RX1"
    pub label: String,
    /// Device path ("COM3", "/dev/ttyUSB0")
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub stop_bits: StopBits,
    /// Maximum wait per read, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub protocol: Protocol,
    /// Accumulate bytes and split on markers instead of emitting raw chunks
    #[serde(default)]
    pub buffering: bool,
    #[serde(default)]
    pub start_marker: String,
    #[serde(default)]
    pub end_marker: String,
}

fn default_baud_rate() -> u32 {
    9600
}
fn default_data_bits() -> u8 {
    8
}
fn default_timeout_ms() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

impl PortConfig {
    pub fn new(label: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout_ms: default_timeout_ms(),
            enabled: true,
            protocol: Protocol::Standard,
            buffering: false,
            start_marker: String::new(),
            end_marker: String::new(),
        }
    }

    /// Enable buffering with the given marker text
    pub fn with_markers(mut self, start: &str, end: &str) -> Self {
        self.buffering = true;
        self.start_marker = start.to_string();
        self.end_marker = end.to_string();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.clamp(1, MAX_TIMEOUT_MS))
    }

    /// Buffering flag and marker text after the protocol preset is applied
    pub fn effective_markers(&self) -> (bool, &str, &str) {
        match self.protocol {
            Protocol::Gilbarco2Wire => (true, "0x02", "0x03"),
            Protocol::Standard if self.buffering => {
                (true, self.start_marker.as_str(), self.end_marker.as_str())
            }
            // markers are ignored without buffering
            Protocol::Standard => (false, "", ""),
        }
    }

    /// Resolved framing for this port
    pub fn framing(&self, max_buffer: usize) -> FramingConfig {
        let (buffering, start, end) = self.effective_markers();
        FramingConfig::from_specs(buffering, start, end).with_max_buffer(max_buffer)
    }

    /// `9600 8N1`-style summary for logs
    pub fn line_summary(&self) -> String {
        format!(
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits,
            self.parity.letter(),
            self.stop_bits
        )
    }
}

// ============================================================================
// Log and limit settings
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Write the aggregate log of all ports
    pub enabled: bool,
    /// Target directory; `<home>/COM_Sniffer_Logs` when unset
    pub dir: Option<PathBuf>,
    /// Also write one log per port from its reader
    pub per_port_files: bool,
    pub max_file_bytes: u64,
    /// fsync the aggregate log after this many bytes
    pub fsync_interval_bytes: u64,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            per_port_files: false,
            max_file_bytes: DEFAULT_MAX_LOG_BYTES,
            fsync_interval_bytes: 8 * 1024,
        }
    }
}

impl LogSettings {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(default_log_dir)
    }
}

/// Queue bounds and flush cadence for the monitor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub flush_interval_ms: u64,
    /// Pending display lines that trigger an early flush
    pub display_high_water: usize,
    pub max_pending_display: usize,
    pub max_pending_log_bytes: usize,
    pub max_frame_buffer: usize,
    /// Packets a reader may have in flight before new ones are dropped
    pub event_capacity: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            flush_interval_ms: 50,
            display_high_water: 1000,
            max_pending_display: 20_000,
            max_pending_log_bytes: 5 * 1024 * 1024,
            max_frame_buffer: crate::io::serial::framer::DEFAULT_MAX_BUFFER,
            event_capacity: crate::io::channel::DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Limits {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

/// What the monitor does when one port reports an error
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop every port on the first error
    #[default]
    StopAll,
    /// Only the failing port stops
    Isolate,
}

// ============================================================================
// Top-level settings
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnifferSettings {
    pub log: LogSettings,
    pub limits: Limits,
    pub error_policy: ErrorPolicy,
    pub ports: Vec<PortConfig>,
}

impl Default for SnifferSettings {
    fn default() -> Self {
        Self {
            log: LogSettings::default(),
            limits: Limits::default(),
            error_policy: ErrorPolicy::default(),
            ports: vec![PortConfig::new("RX1", ""), PortConfig::new("RX2", "")],
        }
    }
}

/// `<home>/COM_Sniffer_Logs`, or a relative directory when no home is known
pub fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("COM_Sniffer_Logs")
}

/// `<config dir>/com-sniffer/settings.toml`
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("com-sniffer")
        .join("settings.toml")
}

impl SnifferSettings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn enabled_ports(&self) -> impl Iterator<Item = &PortConfig> {
        self.ports.iter().filter(|p| p.enabled)
    }

    /// Check the configuration before any port is opened.
    ///
    /// `available_ports` is the enumerated device list when the caller has one;
    /// an empty list means nothing can be monitored.
    pub fn validate(&self, available_ports: Option<&[String]>) -> Result<()> {
        let enabled: Vec<&PortConfig> = self.enabled_ports().collect();
        if enabled.is_empty() {
            return Err(SnifferError::NoActivePorts);
        }

        if let Some(available) = available_ports {
            if available.is_empty() {
                return Err(SnifferError::NoPortsAvailable);
            }
        }

        let mut labels: HashSet<&str> = HashSet::new();
        let mut paths: HashMap<&str, &str> = HashMap::new();

        for port in &enabled {
            if !labels.insert(port.label.as_str()) {
                return Err(SnifferError::DuplicateLabel(port.label.clone()));
            }

            if port.path.trim().is_empty() {
                return Err(SnifferError::MissingPath {
                    label: port.label.clone(),
                });
            }
            if let Some(first) = paths.insert(port.path.as_str(), port.label.as_str()) {
                return Err(SnifferError::DuplicatePort {
                    first: first.to_string(),
                    second: port.label.clone(),
                    path: port.path.clone(),
                });
            }

            validate_line_params(port)?;
            validate_markers(port)?;
        }

        Ok(())
    }
}

fn validate_line_params(port: &PortConfig) -> Result<()> {
    let invalid = |reason: String| SnifferError::InvalidSetting {
        label: port.label.clone(),
        reason,
    };

    if port.baud_rate == 0 {
        return Err(invalid("baud rate must be greater than zero".to_string()));
    }
    if !(5..=8).contains(&port.data_bits) {
        return Err(invalid(format!(
            "data bits must be 5-8, got {}",
            port.data_bits
        )));
    }
    if !(1..=MAX_TIMEOUT_MS).contains(&port.timeout_ms) {
        return Err(invalid(format!(
            "timeout must be 1-{} ms, got {}",
            MAX_TIMEOUT_MS, port.timeout_ms
        )));
    }
    Ok(())
}

fn validate_markers(port: &PortConfig) -> Result<()> {
    let (buffering, start, end) = port.effective_markers();
    if !buffering {
        return Ok(());
    }

    for (which, spec) in [("start", start), ("end", end)] {
        marker::check_decimal_range(spec).map_err(|reason| SnifferError::InvalidMarker {
            label: port.label.clone(),
            which,
            spec: spec.to_string(),
            reason,
        })?;
    }

    if end.is_empty() {
        tlog!(
            "[settings] {}: buffering enabled without an end marker, running as pass-through",
            port.label
        );
    }
    Ok(())
}

/// Load settings from a TOML file. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<SnifferSettings> {
    if !path.exists() {
        tlog!(
            "[settings] {} not found, using defaults",
            path.display()
        );
        return Ok(SnifferSettings::default());
    }

    let content = std::fs::read_to_string(path)?;
    SnifferSettings::from_toml_str(&content)
}
