// src/io/log_sink.rs
//
// Append-only packet log with size-based rotation.
//
// File layout: header block, one rendered line per packet, footer with the
// end time. A file is rotated once the packet bytes written to it reach the
// threshold; the check runs after each write, so a file can overshoot by
// one write.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::{Result, SnifferError};
use crate::settings::PortConfig;

/// Attempts at finding an unused file name within one millisecond
const MAX_NAME_ATTEMPTS: u32 = 1000;

// ============================================================================
// Header
// ============================================================================

/// Port details written into a log header
#[derive(Clone, Debug, PartialEq)]
pub struct LogSource {
    pub label: String,
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: u8,
}

impl From<&PortConfig> for LogSource {
    fn from(port: &PortConfig) -> Self {
        Self {
            label: port.label.clone(),
            path: port.path.clone(),
            baud_rate: port.baud_rate,
            data_bits: port.data_bits,
        }
    }
}

/// Header block of a log file: one source for a per-port log, all sources
/// for the aggregate log.
#[derive(Clone, Debug, PartialEq)]
pub struct LogHeader {
    sources: Vec<LogSource>,
}

impl LogHeader {
    pub fn single(source: LogSource) -> Self {
        Self {
            sources: vec![source],
        }
    }

    pub fn aggregate(sources: Vec<LogSource>) -> Self {
        Self { sources }
    }

    fn render(&self) -> String {
        let mut out = String::from("=== COM Sniffer Log ===\n");
        out.push_str(&format!(
            "Start: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));

        match self.sources.as_slice() {
            [only] => {
                out.push_str(&format!("Source: {}\n", only.label));
                out.push_str(&format!(
                    "Port: {}, Baud: {} baud\n",
                    only.path, only.baud_rate
                ));
                out.push_str(&format!("Data Bits: {}\n", only.data_bits));
            }
            many => {
                for s in many {
                    out.push_str(&format!(
                        "{} -> Port: {}, Baud: {} baud, Data Bits: {}\n",
                        s.label, s.path, s.baud_rate, s.data_bits
                    ));
                }
            }
        }

        out.push_str(&"=".repeat(50));
        out.push_str("\n\n");
        out
    }
}

fn render_footer() -> String {
    format!("\nEnd: {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"))
}

// ============================================================================
// Log Sink
// ============================================================================

struct LogSession {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Packet bytes written since the header
    bytes_written: u64,
    /// bytes_written at the last fsync
    last_sync: u64,
}

/// Rotating packet log owned by one writer (a port reader or the monitor)
pub struct LogSink {
    dir: PathBuf,
    file_prefix: String,
    header: LogHeader,
    max_bytes: u64,
    fsync_interval: Option<u64>,
    session: Option<LogSession>,
    rotations: u32,
}

impl LogSink {
    /// Create the directory if needed and open the first file.
    pub fn open(dir: &Path, file_prefix: &str, header: LogHeader, max_bytes: u64) -> Result<Self> {
        let mut sink = Self {
            dir: dir.to_path_buf(),
            file_prefix: sanitize_prefix(file_prefix),
            header,
            max_bytes: max_bytes.max(1),
            fsync_interval: None,
            session: None,
            rotations: 0,
        };
        sink.session = Some(sink.start_session()?);
        Ok(sink)
    }

    /// fsync after every `bytes` of packet data instead of only at close
    pub fn with_fsync_interval(mut self, bytes: u64) -> Self {
        self.fsync_interval = (bytes > 0).then_some(bytes);
        self
    }

    /// Path of the file currently being written
    pub fn current_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.path.as_path())
    }

    /// Packet bytes in the current file
    pub fn bytes_written(&self) -> u64 {
        self.session.as_ref().map(|s| s.bytes_written).unwrap_or(0)
    }

    pub fn rotations(&self) -> u32 {
        self.rotations
    }

    /// Append rendered packet text and persist it, rotating when the file is full.
    pub fn write(&mut self, text: &str) -> Result<()> {
        let fsync_interval = self.fsync_interval;
        let session = match self.session.as_mut() {
            Some(s) => s,
            None => {
                return Err(SnifferError::log_io(
                    &self.dir,
                    std::io::Error::new(std::io::ErrorKind::NotConnected, "log session closed"),
                ))
            }
        };

        session
            .writer
            .write_all(text.as_bytes())
            .and_then(|_| session.writer.flush())
            .map_err(|e| SnifferError::log_io(&session.path, e))?;
        session.bytes_written += text.len() as u64;

        if let Some(interval) = fsync_interval {
            if session.bytes_written - session.last_sync >= interval {
                session
                    .writer
                    .get_ref()
                    .sync_data()
                    .map_err(|e| SnifferError::log_io(&session.path, e))?;
                session.last_sync = session.bytes_written;
            }
        }

        if session.bytes_written >= self.max_bytes {
            self.rotate()?;
        }
        Ok(())
    }

    /// Close the current file with a footer and start a new one.
    pub fn rotate(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            finish_session(session)?;
        }
        self.session = Some(self.start_session()?);
        self.rotations += 1;
        tlog!(
            "[LogSink] Rotated to {}",
            self.current_path().map(|p| p.display().to_string()).unwrap_or_default()
        );
        Ok(())
    }

    /// Write the footer and close.
    pub fn close(mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => finish_session(session),
            None => Ok(()),
        }
    }

    fn start_session(&self) -> Result<LogSession> {
        std::fs::create_dir_all(&self.dir).map_err(|e| SnifferError::log_io(&self.dir, e))?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let (file, path) = self.create_unique(&stamp)?;

        let mut writer = BufWriter::new(file);
        writer
            .write_all(self.header.render().as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| SnifferError::log_io(&path, e))?;

        Ok(LogSession {
            writer,
            path,
            bytes_written: 0,
            last_sync: 0,
        })
    }

    /// `<prefix>_<stamp>.log`, or `<prefix>_<stamp>_<n>.log` if that name is taken
    fn create_unique(&self, stamp: &str) -> Result<(File, PathBuf)> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{}_{}.log", self.file_prefix, stamp)
            } else {
                format!("{}_{}_{}.log", self.file_prefix, stamp, attempt)
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((file, path)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(SnifferError::log_io(&path, e)),
            }
        }
        Err(SnifferError::log_io(
            &self.dir,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "no free log file name for this timestamp",
            ),
        ))
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = finish_session(session) {
                tlog!("[LogSink] Failed to close log: {}", e);
            }
        }
    }
}

fn finish_session(mut session: LogSession) -> Result<()> {
    session
        .writer
        .write_all(render_footer().as_bytes())
        .and_then(|_| session.writer.flush())
        .and_then(|_| session.writer.get_ref().sync_all())
        .map_err(|e| SnifferError::log_io(&session.path, e))
}

/// Keep file names portable: labels like "RX 1/A" become "RX_1_A"
fn sanitize_prefix(prefix: &str) -> String {
    prefix
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
