// src/io/monitor.rs
//
// Ingestion coordinator. Spawns one reader per enabled port, merges their
// events, and drains the pending queues on a fixed cadence. Display and
// aggregate-log writes run on a separate output worker so a slow terminal
// or disk never holds up event intake.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use super::channel::{event_channel, EventReceiver};
use super::log_sink::{LogHeader, LogSink, LogSource};
use super::pending::{DisplayQueue, LogQueue};
use super::serial::reader::{spawn_port_reader, PortLogOptions, ReaderSummary};
use super::serial::transport::TransportOpener;
use super::{PortEvent, PortState};
use crate::error::{Result, SnifferError};
use crate::settings::{ErrorPolicy, SnifferSettings};

/// File prefix of the aggregate log
const AGGREGATE_PREFIX: &str = "com_sniffer";

/// Output commands that may queue up behind a busy display or disk
const OUTPUT_BACKLOG: usize = 4;

/// Consumer of the monitor's output (terminal, UI, test recorder)
pub trait DisplaySink: Send {
    /// A batch of rendered packet lines, each ending in a newline
    fn show(&mut self, chunk: &str);

    fn status(&mut self, label: &str, state: PortState, message: &str);

    fn error(&mut self, label: &str, message: &str);

    /// Monitor-level messages not tied to a port
    fn notice(&mut self, message: &str) {
        let _ = message;
    }
}

/// Totals gathered over one monitoring session
#[derive(Clone, Debug, Default)]
pub struct MonitorReport {
    /// Packets that reached the monitor, per port
    pub packets: BTreeMap<String, u64>,
    pub final_states: BTreeMap<String, PortState>,
    /// Bytes each port lost to the frame buffer cap
    pub truncated_bytes: BTreeMap<String, u64>,
    /// Packets readers discarded because the event channel was full
    pub events_dropped: u64,
    /// Display lines lost to the queue cap
    pub display_dropped: u64,
    /// Pending aggregate-log batches discarded on overflow
    pub log_batches_dropped: u64,
    /// `(label, message)` for every port error
    pub errors: Vec<(String, String)>,
}

impl MonitorReport {
    pub fn total_packets(&self) -> u64 {
        self.packets.values().sum()
    }

    pub fn total_truncated(&self) -> u64 {
        self.truncated_bytes.values().sum()
    }
}

/// Requests a cooperative stop of a running monitor
#[derive(Clone, Debug)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A running monitoring session
pub struct Monitor {
    stop_flag: Arc<AtomicBool>,
    log_path: Option<PathBuf>,
    task: JoinHandle<MonitorReport>,
}

impl Monitor {
    /// Validate `settings` and start monitoring every enabled port.
    ///
    /// Configuration problems are returned before anything is opened.
    /// Must be called from within a tokio runtime.
    pub fn start(
        settings: &SnifferSettings,
        opener: Arc<dyn TransportOpener>,
        mut display: Box<dyn DisplaySink>,
    ) -> Result<Monitor> {
        settings.validate(None)?;

        let ports: Vec<_> = settings.enabled_ports().cloned().collect();
        let log_dir = settings.log.resolved_dir();
        tlog!(
            "[Monitor] Starting {} port(s), logging {}",
            ports.len(),
            if settings.log.enabled { "on" } else { "off" }
        );

        let aggregate = if settings.log.enabled {
            let header = LogHeader::aggregate(ports.iter().map(LogSource::from).collect());
            match LogSink::open(&log_dir, AGGREGATE_PREFIX, header, settings.log.max_file_bytes) {
                Ok(sink) => Some(sink.with_fsync_interval(settings.log.fsync_interval_bytes)),
                Err(e) => {
                    tlog!("[Monitor] Aggregate log unavailable: {}", e);
                    display.notice(&format!("Logging disabled: {}", e));
                    None
                }
            }
        } else {
            None
        };
        let log_path = aggregate
            .as_ref()
            .and_then(|s| s.current_path())
            .map(Path::to_path_buf);

        let per_port_log = if settings.log.enabled && settings.log.per_port_files {
            Some(PortLogOptions {
                dir: log_dir,
                max_bytes: settings.log.max_file_bytes,
            })
        } else {
            None
        };

        let stop_flag = Arc::new(AtomicBool::new(false));
        let (tx, rx) = event_channel(settings.limits.event_capacity);

        let mut readers = Vec::with_capacity(ports.len());
        for port in ports {
            let label = port.label.clone();
            let handle = spawn_port_reader(
                port,
                settings.limits.max_frame_buffer,
                per_port_log.clone(),
                opener.clone(),
                stop_flag.clone(),
                tx.clone(),
            );
            readers.push((label, handle));
        }
        // Readers hold the only senders; the channel closes once all have exited
        drop(tx);

        let logging = Arc::new(AtomicBool::new(aggregate.is_some()));
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_BACKLOG);
        let output = Output {
            display,
            aggregate,
            logging: logging.clone(),
        };
        let worker = tokio::task::spawn_blocking(move || output.run(output_rx));

        // The early flush must fire before the display queue starts dropping
        let max_pending = settings.limits.max_pending_display.max(1);
        let coordinator = Coordinator {
            output: output_tx,
            display_queue: DisplayQueue::new(settings.limits.max_pending_display),
            log_queue: LogQueue::new(settings.limits.max_pending_log_bytes),
            logging,
            high_water: settings.limits.display_high_water.clamp(1, max_pending),
            policy: settings.error_policy,
            stop_flag: stop_flag.clone(),
            report: MonitorReport::default(),
            reported_log_drops: 0,
        };
        let interval = settings.limits.flush_interval();
        let task = tokio::spawn(coordinator.run(rx, readers, worker, interval));

        Ok(Monitor {
            stop_flag,
            log_path,
            task,
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: self.stop_flag.clone(),
        }
    }

    /// First aggregate log file, if logging is active
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Request a stop and wait for every port to close.
    pub async fn stop(self) -> Result<MonitorReport> {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.wait().await
    }

    /// Wait until the session ends on its own (stop handle, error, all ports gone).
    pub async fn wait(self) -> Result<MonitorReport> {
        self.task
            .await
            .map_err(|e| SnifferError::Task(format!("monitor task failed: {}", e)))
    }
}

// ============================================================================
// Output worker
// ============================================================================

enum OutputCommand {
    Flush {
        display: Option<String>,
        log: Option<String>,
    },
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

/// Owns the display and the aggregate log; runs on the blocking pool
struct Output {
    display: Box<dyn DisplaySink>,
    aggregate: Option<LogSink>,
    /// Cleared once the aggregate log fails so the coordinator stops queueing
    logging: Arc<AtomicBool>,
}

impl Output {
    fn run(mut self, mut commands: mpsc::Receiver<OutputCommand>) {
        while let Some(command) = commands.blocking_recv() {
            self.apply(command);
        }

        // Every packet line has been written; the footer goes last
        if let Some(sink) = self.aggregate.take() {
            if let Err(e) = sink.close() {
                tlog!("[Monitor] Failed to close aggregate log: {}", e);
                self.display.notice(&format!("Failed to close log: {}", e));
            }
        }
    }

    fn apply(&mut self, command: OutputCommand) {
        match command {
            OutputCommand::Flush { display, log } => {
                if let Some(chunk) = display {
                    self.display.show(&chunk);
                }
                if let (Some(batch), Some(sink)) = (log, self.aggregate.as_mut()) {
                    if let Err(e) = sink.write(&batch) {
                        tlog!("[Monitor] Aggregate log write failed: {}", e);
                        self.logging.store(false, Ordering::SeqCst);
                        self.aggregate = None;
                        self.display.notice(&format!("Logging disabled: {}", e));
                    }
                }
            }
            OutputCommand::Status {
                label,
                state,
                message,
            } => self.display.status(&label, state, &message),
            OutputCommand::Error { label, message } => self.display.error(&label, &message),
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

struct Coordinator {
    output: mpsc::Sender<OutputCommand>,
    display_queue: DisplayQueue,
    log_queue: LogQueue,
    logging: Arc<AtomicBool>,
    high_water: usize,
    policy: ErrorPolicy,
    stop_flag: Arc<AtomicBool>,
    report: MonitorReport,
    reported_log_drops: u64,
}

impl Coordinator {
    async fn run(
        mut self,
        mut rx: EventReceiver,
        readers: Vec<(String, JoinHandle<ReaderSummary>)>,
        worker: JoinHandle<()>,
        interval: Duration,
    ) -> MonitorReport {
        let mut last_flush = Instant::now();

        while !self.stop_flag.load(Ordering::SeqCst) {
            match tokio::time::timeout(interval, rx.recv()).await {
                Ok(Some(event)) => self.handle(event).await,
                Ok(None) => {
                    tlog!("[Monitor] All readers exited");
                    break;
                }
                Err(_) => {
                    // Timeout, fall through to the periodic flush
                }
            }

            if last_flush.elapsed() >= interval || self.display_queue.len() >= self.high_water {
                self.flush();
                last_flush = Instant::now();
            }
        }

        // Readers still flush their residual bytes after the stop request
        self.stop_flag.store(true, Ordering::SeqCst);
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }

        for (label, handle) in readers {
            match handle.await {
                Ok(summary) => {
                    self.report.final_states.insert(label.clone(), summary.state);
                    self.report
                        .truncated_bytes
                        .insert(label, summary.truncated_bytes);
                }
                Err(e) => {
                    tlog!("[Monitor] Reader {} panicked: {}", label, e);
                    let message = format!("reader task failed: {}", e);
                    self.forward(OutputCommand::Error {
                        label: label.clone(),
                        message: message.clone(),
                    })
                    .await;
                    self.report.errors.push((label.clone(), message));
                    self.report.final_states.insert(label, PortState::Errored);
                }
            }
        }

        // Every reader has closed its own log; the aggregate closes after them
        self.flush_final().await;
        drop(self.output);
        if let Err(e) = worker.await {
            tlog!("[Monitor] Output worker failed: {}", e);
        }

        self.report.events_dropped = rx.dropped();
        self.report.display_dropped = self.display_queue.dropped();
        self.report.log_batches_dropped = self.log_queue.dropped_batches();
        tlog!(
            "[Monitor] Stopped: {} packet(s), {} event(s) dropped, {} display line(s) dropped, {} log batch(es) dropped",
            self.report.total_packets(),
            self.report.events_dropped,
            self.report.display_dropped,
            self.report.log_batches_dropped
        );
        self.report
    }

    async fn handle(&mut self, event: PortEvent) {
        match event {
            PortEvent::Packet(packet) => {
                *self.report.packets.entry(packet.label.clone()).or_insert(0) += 1;
                let line = packet.render_line();
                if self.logging.load(Ordering::SeqCst) {
                    self.log_queue.push(line.clone());
                }
                self.display_queue.push(line);
            }
            PortEvent::Status {
                label,
                state,
                message,
            } => {
                self.forward(OutputCommand::Status {
                    label,
                    state,
                    message,
                })
                .await;
            }
            PortEvent::Error { label, message } => {
                if self.policy == ErrorPolicy::StopAll && !self.stop_flag.swap(true, Ordering::SeqCst) {
                    tlog!("[Monitor] Error on {}, stopping all ports", label);
                }
                self.report.errors.push((label.clone(), message.clone()));
                self.forward(OutputCommand::Error { label, message }).await;
            }
        }
    }

    /// Status and errors are never dropped; they wait for the worker
    async fn forward(&mut self, command: OutputCommand) {
        if self.output.send(command).await.is_err() {
            tlog!("[Monitor] Output worker gone");
        }
    }

    /// Hand both queues to the worker if it has room. A busy worker leaves
    /// the lines queued, where the drop policies bound them.
    fn flush(&mut self) {
        self.note_log_drops();
        if self.display_queue.is_empty() && self.log_queue.is_empty() {
            return;
        }

        match self.output.try_reserve() {
            Ok(permit) => permit.send(OutputCommand::Flush {
                display: self.display_queue.drain_joined(),
                log: self.log_queue.take(),
            }),
            Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => {
                tlog!("[Monitor] Output worker gone");
            }
        }
    }

    /// Shutdown flush; waits for the worker instead of deferring
    async fn flush_final(&mut self) {
        self.note_log_drops();
        if self.display_queue.is_empty() && self.log_queue.is_empty() {
            return;
        }
        let batches = OutputCommand::Flush {
            display: self.display_queue.drain_joined(),
            log: self.log_queue.take(),
        };
        self.forward(batches).await;
    }

    fn note_log_drops(&mut self) {
        let dropped = self.log_queue.dropped_batches();
        if dropped > self.reported_log_drops {
            tlog!(
                "[Monitor] Aggregate log queue overflowed, {} batch(es) dropped so far",
                dropped
            );
            self.reported_log_drops = dropped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::serial::transport::scripted::{ScriptedOpener, Step};
    use crate::settings::PortConfig;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        shown: Vec<String>,
        statuses: Vec<(String, PortState, String)>,
        errors: Vec<(String, String)>,
        notices: Vec<String>,
    }

    impl Recorded {
        fn text(&self) -> String {
            self.shown.concat()
        }
    }

    struct RecordingDisplay(Arc<Mutex<Recorded>>);

    impl DisplaySink for RecordingDisplay {
        fn show(&mut self, chunk: &str) {
            self.0.lock().unwrap().shown.push(chunk.to_string());
        }

        fn status(&mut self, label: &str, state: PortState, message: &str) {
            self.0
                .lock()
                .unwrap()
                .statuses
                .push((label.to_string(), state, message.to_string()));
        }

        fn error(&mut self, label: &str, message: &str) {
            self.0
                .lock()
                .unwrap()
                .errors
                .push((label.to_string(), message.to_string()));
        }

        fn notice(&mut self, message: &str) {
            self.0.lock().unwrap().notices.push(message.to_string());
        }
    }

    fn recorder() -> (Arc<Mutex<Recorded>>, Box<dyn DisplaySink>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        (recorded.clone(), Box::new(RecordingDisplay(recorded)))
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("comsniff-monitor-{}", uuid::Uuid::new_v4()))
    }

    fn settings_with(dir: &Path, ports: Vec<PortConfig>) -> SnifferSettings {
        let mut settings = SnifferSettings::default();
        settings.log.dir = Some(dir.to_path_buf());
        settings.ports = ports;
        settings
    }

    async fn wait_for(what: &str, cond: impl Fn() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    fn log_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .map(|rd| rd.map(|e| e.unwrap().path()).collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_end_to_end_framed_port() {
        let dir = temp_dir();
        let settings = settings_with(
            &dir,
            vec![PortConfig::new("RX1", "COM1").with_markers("0x02", "0x03")],
        );
        let opener = ScriptedOpener::default().with_port(
            "COM1",
            vec![Step::Chunk(vec![0x02, 0x41, 0x42, 0x03, 0x02, 0x43, 0x03])],
        );
        let (recorded, display) = recorder();

        let monitor = Monitor::start(&settings, Arc::new(opener), display).unwrap();
        let log_path = monitor.log_path().unwrap().to_path_buf();
        wait_for("both packets on display", || {
            recorded.lock().unwrap().text().matches("RX1").count() == 2
        })
        .await;
        let report = monitor.stop().await.unwrap();

        assert_eq!(report.packets.get("RX1"), Some(&2));
        assert_eq!(report.final_states.get("RX1"), Some(&PortState::Closed));
        assert!(report.errors.is_empty());

        let text = recorded.lock().unwrap().text();
        let first = text.find(" RX1 02 41 42 03\n").unwrap();
        let second = text.find(" RX1 02 43 03\n").unwrap();
        assert!(first < second);

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert!(content.starts_with("=== COM Sniffer Log ==="));
        assert!(content.contains("Port: COM1, Baud: 9600 baud"));
        let first = content.find("RX1 02 41 42 03").unwrap();
        let second = content.find("RX1 02 43 03").unwrap();
        assert!(first < second);
        assert!(content.trim_end().lines().last().unwrap().starts_with("End: "));

        let recorded = recorded.lock().unwrap();
        let statuses = &recorded.statuses;
        assert_eq!(statuses.first().unwrap().2, "Connected: COM1 @ 9600 baud");
        assert_eq!(statuses.last().unwrap().2, "Disconnected");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_open_failure_stops_all_ports() {
        let dir = temp_dir();
        let settings = settings_with(
            &dir,
            vec![PortConfig::new("RX1", "COM1"), PortConfig::new("RX2", "COM9")],
        );
        // COM9 has no script and fails to open
        let opener = ScriptedOpener::default().with_port("COM1", vec![]);
        let (recorded, display) = recorder();

        let monitor = Monitor::start(&settings, Arc::new(opener), display).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), monitor.wait())
            .await
            .expect("monitor should stop on its own")
            .unwrap();

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, "RX2");
        assert!(report.errors[0].1.contains("COM9"));
        assert_eq!(report.final_states.get("RX1"), Some(&PortState::Closed));
        assert_eq!(report.final_states.get("RX2"), Some(&PortState::Errored));
        assert_eq!(recorded.lock().unwrap().errors.len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_isolate_policy_keeps_healthy_ports() {
        let dir = temp_dir();
        let mut settings = settings_with(
            &dir,
            vec![PortConfig::new("RX1", "COM1"), PortConfig::new("RX2", "COM9")],
        );
        settings.error_policy = ErrorPolicy::Isolate;
        settings.log.enabled = false;
        let opener =
            ScriptedOpener::default().with_port("COM1", vec![Step::Chunk(vec![0xAB, 0xCD])]);
        let (recorded, display) = recorder();

        let monitor = Monitor::start(&settings, Arc::new(opener), display).unwrap();
        let stop = monitor.stop_handle();
        wait_for("error and packet", || {
            let r = recorded.lock().unwrap();
            !r.errors.is_empty() && r.text().contains("RX1 AB CD")
        })
        .await;
        assert!(!stop.is_stopping());

        stop.stop();
        let report = monitor.wait().await.unwrap();
        assert_eq!(report.packets.get("RX1"), Some(&1));
        assert_eq!(report.final_states.get("RX1"), Some(&PortState::Closed));
        assert_eq!(report.final_states.get("RX2"), Some(&PortState::Errored));
        // logging off: nothing written
        assert!(log_files(&dir).is_empty());
    }

    #[test]
    fn test_configuration_error_starts_nothing() {
        let dir = temp_dir();
        let mut port = PortConfig::new("RX1", "COM1");
        port.enabled = false;
        let settings = settings_with(&dir, vec![port]);
        let (recorded, display) = recorder();

        let result = Monitor::start(&settings, Arc::new(ScriptedOpener::default()), display);
        assert!(matches!(result, Err(SnifferError::NoActivePorts)));
        assert!(recorded.lock().unwrap().statuses.is_empty());
        assert!(!dir.exists());
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let dir = temp_dir();
        let settings = settings_with(
            &dir,
            vec![PortConfig::new("RX1", "COM1"), PortConfig::new("RX2", "COM1")],
        );
        let (_, display) = recorder();

        let result = Monitor::start(&settings, Arc::new(ScriptedOpener::default()), display);
        assert!(matches!(result, Err(SnifferError::DuplicatePort { .. })));
    }

    #[tokio::test]
    async fn test_high_water_flushes_early() {
        let dir = temp_dir();
        let mut settings = settings_with(&dir, vec![PortConfig::new("RX1", "COM1")]);
        settings.log.enabled = false;
        settings.limits.flush_interval_ms = 60_000;
        settings.limits.display_high_water = 2;
        let opener = ScriptedOpener::default().with_port(
            "COM1",
            vec![
                Step::Chunk(vec![0x01]),
                Step::Chunk(vec![0x02]),
                Step::Chunk(vec![0x03]),
            ],
        );
        let (recorded, display) = recorder();

        let monitor = Monitor::start(&settings, Arc::new(opener), display).unwrap();
        // long before the periodic flush is due
        wait_for("early flush", || {
            let text = recorded.lock().unwrap().text();
            text.contains("RX1 01\n") && text.contains("RX1 02\n")
        })
        .await;

        let report = monitor.stop().await.unwrap();
        assert_eq!(report.packets.get("RX1"), Some(&3));
        assert!(recorded.lock().unwrap().text().contains("RX1 03\n"));
    }

    #[tokio::test]
    async fn test_high_water_above_queue_cap_still_flushes() {
        let dir = temp_dir();
        let mut settings = settings_with(&dir, vec![PortConfig::new("RX1", "COM1")]);
        settings.log.enabled = false;
        settings.limits.flush_interval_ms = 60_000;
        settings.limits.display_high_water = 50_000;
        settings.limits.max_pending_display = 2;
        let opener = ScriptedOpener::default().with_port(
            "COM1",
            vec![Step::Chunk(vec![0x01]), Step::Chunk(vec![0x02])],
        );
        let (recorded, display) = recorder();

        let monitor = Monitor::start(&settings, Arc::new(opener), display).unwrap();
        // the queue holds at most 2 lines, so 2 must be enough to flush
        wait_for("flush at the queue cap", || {
            let text = recorded.lock().unwrap().text();
            text.contains("RX1 01\n") && text.contains("RX1 02\n")
        })
        .await;

        let report = monitor.stop().await.unwrap();
        assert_eq!(report.display_dropped, 0);
    }

    #[tokio::test]
    async fn test_report_carries_truncation_and_drop_counts() {
        let dir = temp_dir();
        let mut settings = settings_with(
            &dir,
            vec![PortConfig::new("RX1", "COM1").with_markers("", "ETX")],
        );
        settings.log.enabled = false;
        settings.limits.max_frame_buffer = 4;
        let opener = ScriptedOpener::default()
            .with_port("COM1", vec![Step::Chunk(vec![0x11; 10]), Step::Eof]);
        let (recorded, display) = recorder();

        let monitor = Monitor::start(&settings, Arc::new(opener), display).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), monitor.wait())
            .await
            .expect("monitor should stop on its own")
            .unwrap();

        assert_eq!(report.truncated_bytes.get("RX1"), Some(&6));
        assert_eq!(report.total_truncated(), 6);
        assert_eq!(report.events_dropped, 0);
        assert_eq!(report.final_states.get("RX1"), Some(&PortState::Errored));
        // residual shown before the port error stopped the session
        assert_eq!(report.packets.get("RX1"), Some(&1));
        assert!(recorded.lock().unwrap().text().contains("RX1 11 11 11 11\n"));
    }

    #[tokio::test]
    async fn test_per_port_files_alongside_aggregate() {
        let dir = temp_dir();
        let mut settings = settings_with(
            &dir,
            vec![
                PortConfig::new("RX1", "COM1"),
                PortConfig::new("RX2", "COM2"),
            ],
        );
        settings.log.per_port_files = true;
        let opener = ScriptedOpener::default()
            .with_port("COM1", vec![Step::Chunk(vec![0x11])])
            .with_port("COM2", vec![Step::Chunk(vec![0x22])]);
        let (recorded, display) = recorder();

        let monitor = Monitor::start(&settings, Arc::new(opener), display).unwrap();
        wait_for("both ports", || {
            let text = recorded.lock().unwrap().text();
            text.contains("RX1 11") && text.contains("RX2 22")
        })
        .await;
        monitor.stop().await.unwrap();

        let files = log_files(&dir);
        assert_eq!(files.len(), 3);
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("com_sniffer_RX1_")));
        assert!(names.iter().any(|n| n.starts_with("com_sniffer_RX2_")));

        let rx1 = files
            .iter()
            .find(|p| p.to_string_lossy().contains("com_sniffer_RX1_"))
            .unwrap();
        let content = std::fs::read_to_string(rx1).unwrap();
        assert!(content.contains("RX1 11"));
        assert!(!content.contains("RX2 22"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
