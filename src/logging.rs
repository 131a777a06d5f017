use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, SnifferError};

/// Global diagnostics file handle. When `Some`, `tlog!` writes to both stderr and this file.
#[doc(hidden)]
pub static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Default diagnostics directory: `<home>/COM_Sniffer_Logs/diagnostics`.
pub fn default_diagnostics_dir() -> PathBuf {
    crate::settings::default_log_dir().join("diagnostics")
}

/// Start writing diagnostics to a timestamped file in `dir`.
/// Also installs a panic hook so a crashing reader thread leaves a trace in the file.
pub fn init_diagnostics(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let filename = chrono::Local::now()
        .format("diagnostics_%Y%m%d_%H%M%S_%3f.log")
        .to_string();
    let log_path = dir.join(&filename);

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| SnifferError::log_io(&log_path, e))?;

    writeln!(file, "=== COM Sniffer Diagnostics ===")
        .and_then(|_| writeln!(file, "Time: {}", chrono::Local::now().to_rfc3339()))
        .and_then(|_| writeln!(file, "Version: {}", env!("CARGO_PKG_VERSION")))
        .and_then(|_| {
            writeln!(
                file,
                "Platform: {} {}",
                std::env::consts::OS,
                std::env::consts::ARCH
            )
        })
        .and_then(|_| writeln!(file, "{}\n", "=".repeat(50)))
        .map_err(|e| SnifferError::log_io(&log_path, e))?;

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        // try_lock: the panicking thread may already hold the guard
        if let Ok(mut guard) = LOG_FILE.try_lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "\n=== Unhandled Panic ===\n{}\n", info);
                let _ = f.flush();
            }
        }
        previous_hook(info);
    }));

    // eprintln directly: tlog! would lock LOG_FILE which we just set
    eprintln!(
        "{} [logging] Diagnostics started: {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        log_path.display()
    );

    Ok(log_path)
}

/// Stop diagnostics and close the file.
pub fn stop_diagnostics() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if guard.is_some() {
            *guard = None;
            eprintln!(
                "{} [logging] Diagnostics stopped",
                chrono::Local::now().format("%H:%M:%S%.3f")
            );
        }
    }
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
/// Also writes to the diagnostics file when one is open.
#[macro_export]
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", chrono::Local::now().format("%H:%M:%S%.3f"), format_args!($($arg)*));
        eprintln!("{}", msg);
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_diagnostics_writes_header() {
        let dir = std::env::temp_dir().join(format!("comsniff-diag-{}", uuid::Uuid::new_v4()));
        let path = init_diagnostics(&dir).unwrap();
        tlog!("[test] hello diagnostics");
        stop_diagnostics();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("=== COM Sniffer Diagnostics ==="));
        assert!(content.contains("[test] hello diagnostics"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("diagnostics_") && name.ends_with(".log"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
