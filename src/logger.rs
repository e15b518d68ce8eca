//! `log` backend writing to the PL011 console.
//!
//! Lines from different cores are serialised so they do not interleave.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::sync::SpinLock;
use crate::uart;

struct UartLogger {
    lock: SpinLock<()>,
}

static LOGGER: UartLogger = UartLogger { lock: SpinLock::new(()) };

impl Log for UartLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _guard = self.lock.lock();
        let _ = writeln!(uart::writer(), "[{:<5}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Install the console logger. Call once on the boot CPU.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
