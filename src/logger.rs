//! Minimal `log` backend writing to stderr. Stdout is left to reports and
//! packet output.

use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

pub struct Logger;

static LOGGER: Logger = Logger;

/// Installs [`Logger`] as the global logger.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let ts = chrono::Local::now().format("%H:%M:%S%.3f");
        match log::max_level() {
            LevelFilter::Debug | LevelFilter::Trace => {
                eprintln!("{ts} {} {} {}", label(record.level()), record.target(), record.args())
            }
            _ => eprintln!("{ts} {} {}", label(record.level()), record.args()),
        }
    }

    fn flush(&self) {}
}

fn label(level: Level) -> &'static str {
    match level {
        Level::Error => "[ERROR]",
        Level::Warn => "[WARN]",
        Level::Info => "[INFO]",
        Level::Debug => "[DEBUG]",
        Level::Trace => "[TRACE]",
    }
}
