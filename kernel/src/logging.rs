//! Logging backend for the `log` facade.
//!
//! Lines go to stderr as `[LEVEL] target: message`. Output is serialised so
//! lines from concurrently running processes never interleave.

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

pub static LOGGER: Logger = Logger::new();

pub struct Logger {
    output: Mutex<()>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    pub const fn new() -> Logger {
        Logger {
            output: Mutex::new(()),
        }
    }

    fn format(record: &Record) -> String {
        format!(
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        )
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = Self::format(record);
        let _guard = self.output.lock();
        eprintln!("{}", line);
    }

    fn flush(&self) {}
}

/// Debug in debug builds, Info in release builds.
pub const fn default_level() -> LevelFilter {
    #[cfg(debug_assertions)]
    {
        LevelFilter::Debug
    }
    #[cfg(not(debug_assertions))]
    {
        LevelFilter::Info
    }
}

/// Installs [`LOGGER`] as the global logger.
///
/// Only the first call can succeed; later calls hand back the error from
/// `log::set_logger` and leave the level untouched.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}
