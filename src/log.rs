//! File-backed diagnostics for gaffer runs.
//!
//! Console output is reserved for run progress, so diagnostics land in
//! `~/.gaffer/gaffer.log` instead. The file is truncated at startup and
//! holds the latest run only. Levels, most severe first: ERROR, WARN,
//! INFO, DEBUG. The threshold comes from `GAFFER_LOG`, or from the
//! `--debug` flag / `GAFFER_DEBUG=1` (Debug), or defaults to Info.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};

static SINK: OnceLock<Mutex<File>> = OnceLock::new();
static THRESHOLD: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Verbosity threshold for the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Some(Level::Error),
            "warn" | "warning" => Some(Level::Warn),
            "info" => Some(Level::Info),
            "debug" => Some(Level::Debug),
            _ => None,
        }
    }
}

/// Open the log file and set the verbosity threshold.
///
/// `GAFFER_LOG` names a level outright; otherwise `debug` (or
/// `GAFFER_DEBUG=1`) selects Debug, and the default is Info.
pub fn init(debug: bool) {
    let threshold = std::env::var("GAFFER_LOG")
        .ok()
        .and_then(|v| Level::parse(&v))
        .unwrap_or(if debug || env_flag("GAFFER_DEBUG") {
            Level::Debug
        } else {
            Level::Info
        });
    THRESHOLD.store(threshold as u8, Ordering::SeqCst);

    let Some(home) = dirs::home_dir() else {
        return;
    };
    let dir = home.join(".gaffer");
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    if let Ok(file) = File::create(dir.join("gaffer.log")) {
        let _ = SINK.set(Mutex::new(file));
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn enabled(level: Level) -> bool {
    level as u8 <= THRESHOLD.load(Ordering::Relaxed)
}

fn format_line(level: Level, args: fmt::Arguments<'_>) -> String {
    let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    format!("{stamp} {:5} {args}", level.tag())
}

/// Write one line if `level` clears the threshold. Macro plumbing; call
/// through `glog!` and friends.
pub fn write(level: Level, args: fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let Some(sink) = SINK.get() else {
        return;
    };
    let line = format_line(level, args);
    if let Ok(mut file) = sink.lock() {
        let _ = writeln!(file, "{line}");
    }
}

/// Log at INFO level.
#[macro_export]
macro_rules! glog {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Info, format_args!($($arg)*))
    };
}

/// Log at ERROR level.
#[macro_export]
macro_rules! glog_error {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Error, format_args!($($arg)*))
    };
}

/// Log at WARN level.
#[macro_export]
macro_rules! glog_warn {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Warn, format_args!($($arg)*))
    };
}

/// Log at DEBUG level. Filtered out unless debug mode is on.
#[macro_export]
macro_rules! glog_debug {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Debug, format_args!($($arg)*))
    };
}
