use log::{LevelFilter, Metadata, Record};

/// Writes `[LEVEL target] message` lines to stderr.
pub struct Logger;

static LOGGER: Logger = Logger;

impl Logger {
    /// Installs the logger. `verbosity` counts `-v` flags: none shows warnings,
    /// then info, debug and trace.
    pub fn init(verbosity: u64) -> Result<(), log::SetLoggerError> {
        log::set_logger(&LOGGER)?;
        log::set_max_level(level_for(verbosity));
        Ok(())
    }
}

fn level_for(verbosity: u64) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {
        // stderr is unbuffered
    }
}
