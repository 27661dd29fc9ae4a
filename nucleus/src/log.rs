use alloc::boxed::Box;
use core::fmt::Write;

use log_crate::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

static WRITER: Mutex<Option<Box<dyn Write + Send>>> = Mutex::new(None);

/// Redirect kernel log output. Replaces any previous sink.
pub fn set_writer(writer: Box<dyn Write + Send>) {
    *WRITER.lock() = Some(writer);
}

pub fn take_writer() -> Option<Box<dyn Write + Send>> {
    WRITER.lock().take()
}

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        !cfg!(feature = "disable_log") && metadata.level() <= log_crate::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut writer = WRITER.lock();
        if let Some(writer) = writer.as_mut() {
            let _ = writeln!(writer, "[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Install the kernel logger. A logger installed earlier stays in place.
pub fn init(level: LevelFilter) {
    if log_crate::set_logger(&LOGGER).is_ok() {
        trace!("kernel logger installed");
    }
    log_crate::set_max_level(level);
}
