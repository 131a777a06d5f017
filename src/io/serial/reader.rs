// src/io/serial/reader.rs
//
// One reader per monitored port. Opens the transport, polls it with a
// bounded wait, frames the bytes, logs and publishes the packets, and when
// it ends flushes whatever is left in the frame buffer.
//
// Lifecycle: Idle -> Connecting -> Streaming -> Stopping -> Closed,
// with Errored reachable from Connecting or Streaming. No reconnects.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};

use super::framer::FrameExtractor;
use super::transport::{PortTransport, ReadOutcome, TransportOpener};
use crate::io::channel::EventSender;
use crate::io::log_sink::{LogHeader, LogSink, LogSource};
use crate::io::{Packet, PortEvent, PortState};
use crate::settings::PortConfig;

/// Largest chunk pulled from the transport per read
const READ_CHUNK: usize = 4096;

/// Where and how a reader writes its own log
#[derive(Clone, Debug)]
pub struct PortLogOptions {
    pub dir: PathBuf,
    pub max_bytes: u64,
}

/// What a reader reports when it ends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReaderSummary {
    pub state: PortState,
    /// Packets framed, including any dropped on a full channel
    pub packets: u64,
    /// Bytes lost to the frame buffer cap
    pub truncated_bytes: u64,
}

/// Run a reader on tokio's blocking pool
pub fn spawn_port_reader(
    config: PortConfig,
    max_frame_buffer: usize,
    log: Option<PortLogOptions>,
    opener: Arc<dyn TransportOpener>,
    stop_flag: Arc<AtomicBool>,
    events: EventSender,
) -> tokio::task::JoinHandle<ReaderSummary> {
    tokio::task::spawn_blocking(move || {
        run_port_reader(config, max_frame_buffer, log, opener.as_ref(), stop_flag, events)
    })
}

/// Blocking reader loop. Returns once the port is Closed or Errored.
pub fn run_port_reader(
    config: PortConfig,
    max_frame_buffer: usize,
    log: Option<PortLogOptions>,
    opener: &dyn TransportOpener,
    stop_flag: Arc<AtomicBool>,
    events: EventSender,
) -> ReaderSummary {
    let framer = FrameExtractor::new(config.framing(max_frame_buffer));
    let mut reader = PortReader {
        config,
        framer,
        sink: None,
        stop_flag,
        events,
        state: PortState::Idle,
        last_timestamp: None,
        packets: 0,
        listener_gone: false,
    };
    let state = reader.run(opener, log);
    ReaderSummary {
        state,
        packets: reader.packets,
        truncated_bytes: reader.framer.truncated_bytes(),
    }
}

// ============================================================================
// Reader
// ============================================================================

struct PortReader {
    config: PortConfig,
    framer: FrameExtractor,
    sink: Option<LogSink>,
    stop_flag: Arc<AtomicBool>,
    events: EventSender,
    state: PortState,
    /// Timestamp of the latest chunk; stamps the residual packet
    last_timestamp: Option<DateTime<Local>>,
    packets: u64,
    /// Set when the monitor has dropped its receiver
    listener_gone: bool,
}

impl PortReader {
    fn run(&mut self, opener: &dyn TransportOpener, log: Option<PortLogOptions>) -> PortState {
        self.enter(PortState::Connecting);

        let mut transport = match opener.open(&self.config) {
            Ok(t) => t,
            Err(e) => {
                self.fail(e.to_string());
                return self.finish();
            }
        };

        self.enter(PortState::Streaming);
        tlog!(
            "[Serial:{}] Opened {} at {} [framing: {:?}]",
            self.config.label,
            self.config.path,
            self.config.line_summary(),
            self.framer.mode()
        );
        let connected = format!(
            "Connected: {} @ {} baud",
            self.config.path, self.config.baud_rate
        );
        self.status(connected);

        if let Some(options) = log {
            self.open_log(options);
        }

        match self.stream(transport.as_mut()) {
            Ok(()) => {
                self.enter(PortState::Stopping);
                self.flush_residual();
            }
            Err(message) => {
                // The partial frame is still shown before the error
                self.flush_residual();
                self.fail(message);
            }
        }

        self.close_log();
        drop(transport);
        self.finish()
    }

    /// Poll until stopped or the transport fails
    fn stream(&mut self, transport: &mut dyn PortTransport) -> Result<(), String> {
        let mut buf = vec![0u8; READ_CHUNK];

        while !self.stop_flag.load(Ordering::SeqCst) && !self.listener_gone {
            match transport.read_available(&mut buf) {
                Ok(ReadOutcome::Data(n)) if n > 0 => {
                    let timestamp = Local::now();
                    self.last_timestamp = Some(timestamp);
                    let packets = self.framer.ingest(&self.config.label, &buf[..n], timestamp);
                    for packet in packets {
                        self.publish(packet);
                    }
                }
                Ok(ReadOutcome::Data(_)) | Ok(ReadOutcome::Idle) => {}
                Ok(ReadOutcome::Closed) => {
                    return Err(format!("{} disconnected", self.config.path));
                }
                Err(e) => return Err(format!("Read error: {}", e)),
            }
        }

        if self.listener_gone {
            tlog!("[Serial:{}] Monitor went away, stopping", self.config.label);
        }
        Ok(())
    }

    /// Emit the unterminated tail of the frame buffer as a last packet
    fn flush_residual(&mut self) {
        let timestamp = self.last_timestamp.unwrap_or_else(Local::now);
        if let Some(packet) = self.framer.flush(&self.config.label, timestamp) {
            tlog!(
                "[Serial:{}] Flushing {} residual byte(s)",
                self.config.label,
                packet.bytes.len()
            );
            self.publish(packet);
        }
    }

    fn publish(&mut self, packet: Packet) {
        self.packets += 1;
        if let Some(ref mut sink) = self.sink {
            if let Err(e) = sink.write(&packet.render_line()) {
                tlog!("[Serial:{}] Log write failed: {}", self.config.label, e);
                self.sink = None;
                self.status(format!("Logging disabled: {}", e));
            }
        }
        self.send(PortEvent::Packet(packet));
    }

    fn open_log(&mut self, options: PortLogOptions) {
        let prefix = format!("com_sniffer_{}", self.config.label);
        let header = LogHeader::single(LogSource::from(&self.config));
        match LogSink::open(&options.dir, &prefix, header, options.max_bytes) {
            Ok(sink) => {
                tlog!(
                    "[Serial:{}] Logging to {}",
                    self.config.label,
                    sink.current_path().map(|p| p.display().to_string()).unwrap_or_default()
                );
                self.sink = Some(sink);
            }
            Err(e) => {
                tlog!("[Serial:{}] Failed to open log: {}", self.config.label, e);
                self.status(format!("Logging disabled: {}", e));
            }
        }
    }

    fn close_log(&mut self) {
        if let Some(sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                tlog!("[Serial:{}] Failed to close log: {}", self.config.label, e);
            }
        }
    }

    fn enter(&mut self, state: PortState) {
        self.state = state;
        tlog!("[Serial:{}] -> {:?}", self.config.label, state);
    }

    fn fail(&mut self, message: String) {
        tlog!("[Serial:{}] Error: {}", self.config.label, message);
        self.state = PortState::Errored;
        self.send(PortEvent::Error {
            label: self.config.label.clone(),
            message,
        });
    }

    /// Reach the terminal state and announce the disconnect
    fn finish(&mut self) -> PortState {
        if self.state != PortState::Errored {
            self.state = PortState::Closed;
        }
        tlog!(
            "[Serial:{}] {:?} after {} packet(s), {} byte(s) truncated",
            self.config.label,
            self.state,
            self.packets,
            self.framer.truncated_bytes()
        );
        self.status("Disconnected".to_string());
        self.state
    }

    fn status(&mut self, message: String) {
        self.send(PortEvent::Status {
            label: self.config.label.clone(),
            state: self.state,
            message,
        });
    }

    fn send(&mut self, event: PortEvent) {
        if self.events.send(event).is_err() {
            self.listener_gone = true;
        }
    }
}
