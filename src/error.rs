// src/error.rs
//
// Error type shared by configuration, transport and log-file code.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for all sniffer operations.
#[derive(Debug, Error)]
pub enum SnifferError {
    /// Every configured port is disabled.
    #[error("No active port selected")]
    NoActivePorts,

    /// Port enumeration returned nothing.
    #[error("No serial ports found")]
    NoPortsAvailable,

    /// An enabled port has no transport path.
    #[error("{label}: no port path configured")]
    MissingPath { label: String },

    /// Two enabled channels point at the same device.
    #[error("{first} and {second} both use {path}; choose two different ports")]
    DuplicatePort {
        first: String,
        second: String,
        path: String,
    },

    /// Two channels share a label.
    #[error("Duplicate port label {0}")]
    DuplicateLabel(String),

    /// A marker that resolves to something the framer cannot use.
    #[error("{label}: invalid {which} marker '{spec}': {reason}")]
    InvalidMarker {
        label: String,
        which: &'static str,
        spec: String,
        reason: String,
    },

    /// Any other out-of-range port parameter.
    #[error("{label}: {reason}")]
    InvalidSetting { label: String, reason: String },

    /// The transport could not be opened.
    #[error("Failed to open {path}: {reason}")]
    TransportOpen { path: String, reason: String },

    /// Log file could not be created or written.
    #[error("Log file error on {}: {source}", path.display())]
    LogIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Plain I/O error (settings file, diagnostics directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file is not valid TOML for our schema.
    #[error("Failed to parse settings: {0}")]
    SettingsParse(#[from] toml::de::Error),

    /// A background task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(String),
}

impl SnifferError {
    /// Configuration errors are detected before any task starts.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SnifferError::NoActivePorts
                | SnifferError::NoPortsAvailable
                | SnifferError::MissingPath { .. }
                | SnifferError::DuplicatePort { .. }
                | SnifferError::DuplicateLabel(_)
                | SnifferError::InvalidMarker { .. }
                | SnifferError::InvalidSetting { .. }
        )
    }

    pub(crate) fn log_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SnifferError::LogIo {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias using SnifferError.
pub type Result<T> = std::result::Result<T, SnifferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(SnifferError::NoActivePorts.is_configuration());
        assert!(SnifferError::DuplicateLabel("RX1".into()).is_configuration());
        assert!(!SnifferError::TransportOpen {
            path: "/dev/ttyS0".into(),
            reason: "busy".into()
        }
        .is_configuration());
    }

    #[test]
    fn test_duplicate_port_message() {
        let err = SnifferError::DuplicatePort {
            first: "RX1".into(),
            second: "RX2".into(),
            path: "COM3".into(),
        };
        assert_eq!(
            err.to_string(),
            "RX1 and RX2 both use COM3; choose two different ports"
        );
    }
}
