// src/main.rs
//
// Command-line front end: monitor the configured ports on stdout, or list
// the serial ports the system can see.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use com_sniffer_lib::io::serial::{list_serial_ports, SerialPortOpener};
use com_sniffer_lib::settings::{default_settings_path, load_settings};
use com_sniffer_lib::{logging, tlog, DisplaySink, Monitor, PortState, Result};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (TOML). Defaults to <config dir>/com-sniffer/settings.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write packet logs here instead of the configured directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Do not write packet logs
    #[arg(long)]
    no_log: bool,

    /// Also write one log file per port
    #[arg(long)]
    per_port_logs: bool,

    /// Mirror diagnostics into a timestamped file in this directory
    #[arg(long)]
    diagnostics_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture packets until Ctrl-C (default)
    Monitor,
    /// List available serial ports
    Ports {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Packet lines to stdout, everything else to the diagnostics stream
struct TerminalDisplay {
    out: std::io::Stdout,
}

impl DisplaySink for TerminalDisplay {
    fn show(&mut self, chunk: &str) {
        let mut out = self.out.lock();
        let _ = out.write_all(chunk.as_bytes());
        let _ = out.flush();
    }

    fn status(&mut self, label: &str, _state: PortState, message: &str) {
        tlog!("[{}] {}", label, message);
    }

    fn error(&mut self, label: &str, message: &str) {
        tlog!("[{}] Error: {}", label, message);
    }

    fn notice(&mut self, message: &str) {
        tlog!("[main] {}", message);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(dir) = &args.diagnostics_dir {
        match logging::init_diagnostics(dir) {
            Ok(path) => tlog!("[main] Diagnostics: {}", path.display()),
            Err(e) => eprintln!("[main] Failed to start diagnostics file: {}", e),
        }
    }

    let result = match &args.command {
        Some(Command::Ports { json }) => list_ports(*json),
        Some(Command::Monitor) | None => run_monitor(&args).await,
    };

    logging::stop_diagnostics();

    match result {
        Ok(code) => code,
        Err(e) if e.is_configuration() => {
            eprintln!("Configuration error: {}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_monitor(args: &Args) -> Result<ExitCode> {
    let settings_path = args.config.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path)?;

    if let Some(dir) = &args.log_dir {
        settings.log.dir = Some(dir.clone());
    }
    if args.no_log {
        settings.log.enabled = false;
    }
    if args.per_port_logs {
        settings.log.per_port_files = true;
    }

    // Enumeration can fail on minimal systems; only the static checks apply then
    let available: Option<Vec<String>> = match list_serial_ports() {
        Ok(ports) => Some(ports.into_iter().map(|p| p.port_name).collect()),
        Err(e) => {
            tlog!("[main] Port enumeration failed: {}", e);
            None
        }
    };
    settings.validate(available.as_deref())?;

    let display = TerminalDisplay {
        out: std::io::stdout(),
    };
    let monitor = Monitor::start(&settings, Arc::new(SerialPortOpener), Box::new(display))?;
    if let Some(path) = monitor.log_path() {
        tlog!("[main] Logging to {}", path.display());
    }

    let stop = monitor.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tlog!("[main] Ctrl-C received, stopping");
            stop.stop();
        }
    });

    let report = monitor.wait().await?;

    for (label, count) in &report.packets {
        tlog!("[main] {}: {} packet(s)", label, count);
    }
    for (label, bytes) in report.truncated_bytes.iter().filter(|(_, b)| **b > 0) {
        tlog!("[main] {}: {} byte(s) truncated by the frame buffer cap", label, bytes);
    }
    if report.events_dropped > 0 || report.display_dropped > 0 || report.log_batches_dropped > 0 {
        tlog!(
            "[main] Dropped under load: {} packet(s) in transit, {} display line(s), {} log batch(es)",
            report.events_dropped,
            report.display_dropped,
            report.log_batches_dropped
        );
    }
    for (label, message) in &report.errors {
        tlog!("[main] {} failed: {}", label, message);
    }

    Ok(if report.errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn list_ports(json: bool) -> Result<ExitCode> {
    let ports = list_serial_ports()?;

    if json {
        let text = serde_json::to_string_pretty(&ports).map_err(std::io::Error::from)?;
        println!("{}", text);
        return Ok(ExitCode::SUCCESS);
    }

    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(ExitCode::SUCCESS);
    }

    for port in &ports {
        let mut line = format!("{}\t{}", port.port_name, port.port_type);
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            line.push_str(&format!("\t{:04X}:{:04X}", vid, pid));
        }
        let description: Vec<&str> = [port.manufacturer.as_deref(), port.product.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if !description.is_empty() {
            line.push_str(&format!("\t{}", description.join(" ")));
        }
        println!("{}", line);
    }
    Ok(ExitCode::SUCCESS)
}
