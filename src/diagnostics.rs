//! `log::Log` implementation backing the CORE's diagnostics.
//!
//! Two renderings, selected once at startup: a colored plain-text line per
//! record (the default, matching spec.md §7's "single line to stderr
//! prefixed with `Error:`"), or one JSON object per record when
//! `--json-logs` is passed.

use colored::Colorize;
use log::{Level, Log, Metadata, Record};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

pub struct Diagnostics {
    json: bool,
}

impl Diagnostics {
    #[must_use]
    pub const fn new(json: bool) -> Self {
        Self { json }
    }

    /// Installs this logger as the global `log` backend. Call once, at
    /// process start.
    pub fn install(json: bool, verbose: bool) -> Result<(), log::SetLoggerError> {
        VERBOSE.store(verbose, Ordering::Relaxed);
        let level = if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        log::set_boxed_logger(Box::new(Self::new(json)))?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Log for Diagnostics {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if VERBOSE.load(Ordering::Relaxed) {
            metadata.level() <= Level::Debug
        } else {
            metadata.level() <= Level::Info
        }
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if self.json {
            log_json(record);
        } else {
            log_plain(record);
        }
    }

    fn flush(&self) {}
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    timestamp: String,
    level: &'a str,
    context: Option<&'a str>,
    message: String,
}

fn log_json(record: &Record) {
    let timestamp = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string());

    let entry = JsonRecord {
        timestamp,
        level: record.level().as_str(),
        context: Some(record.target()),
        message: record.args().to_string(),
    };

    if let Ok(line) = serde_json::to_string(&entry) {
        eprintln!("{line}");
    }
}

fn log_plain(record: &Record) {
    match record.level() {
        Level::Error => eprintln!("{} {}", "Error:".red().bold(), record.args()),
        Level::Warn => eprintln!("{} {}", "Warning:".yellow().bold(), record.args()),
        Level::Info => eprintln!("{}", record.args()),
        Level::Debug | Level::Trace => eprintln!("{} {}", "debug:".dimmed(), record.args()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_record_serializes_expected_fields() {
        let entry = JsonRecord {
            timestamp: "2026-07-27T00:00:00Z".to_string(),
            level: "ERROR",
            context: Some("zipcraft::pipeline"),
            message: "boom".to_string(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"level\":\"ERROR\""));
        assert!(json.contains("\"message\":\"boom\""));
    }
}
