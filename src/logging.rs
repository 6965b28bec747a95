//! Run-scoped log file, mirrored to stdout, filtered by `LOG_LEVEL`.
//!
//! Every state change during a run is logged with the `SKIP`/`INSERT`/
//! `UPDATE` prefixes and archival lines ("Saved outdated file: …")
//! specified by the sync engine.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use anyhow::{Context, Result};
use chrono::SecondsFormat;

use crate::config::LogLevel;

static LOGGER: OnceLock<Logger> = OnceLock::new();

pub fn init(path: &Path, mirror_to_stdout: bool, level: LogLevel) -> Result<()> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = Logger::new(path, mirror_to_stdout, level)?;
    let _ = LOGGER.set(logger);
    Ok(())
}

pub fn info(msg: impl AsRef<str>) {
    log(LogLevel::Info, "INFO", msg.as_ref());
}

pub fn error(msg: impl AsRef<str>) {
    log(LogLevel::Error, "ERROR", msg.as_ref());
}

pub fn debug(msg: impl AsRef<str>) {
    log(LogLevel::Debug, "DEBUG", msg.as_ref());
}

fn log(level: LogLevel, label: &str, msg: &str) {
    if let Some(logger) = LOGGER.get() {
        logger.write(level, label, msg);
    }
}

struct Logger {
    file: Mutex<std::fs::File>,
    mirror_to_stdout: bool,
    level: LogLevel,
}

impl Logger {
    fn new(path: &Path, mirror_to_stdout: bool, level: LogLevel) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
            mirror_to_stdout,
            level,
        })
    }

    fn write(&self, level: LogLevel, label: &str, msg: &str) {
        // ERROR < INFO < DEBUG in verbosity (config::LogLevel); a message
        // is emitted only if it is no more verbose than the configured level.
        if level > self.level {
            return;
        }
        let ts = chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let line = format!("{ts} {label} {msg}\n");
        if let Ok(mut f) = self.file.lock() {
            let _ = f.write_all(line.as_bytes());
            let _ = f.flush();
        }
        if self.mirror_to_stdout {
            let mut out = std::io::stdout();
            let _ = out.write_all(line.as_bytes());
            let _ = out.flush();
        }
    }
}

pub fn log_file_path(local_root: &Path, run_timestamp: &str) -> PathBuf {
    local_root.join(crate::config::LOGS_DIR).join(format!("{run_timestamp}.log"))
}
