use std::io::Write;

use chrono::Local;
use env_logger::Builder;
use log::{LevelFilter, SetLoggerError};

/// Installs the process logger.
///
/// `default_level` applies unless `RUST_LOG` says otherwise.
pub fn init(default_level: LevelFilter) -> Result<(), SetLoggerError> {
    Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()
}

/// Maps the relay's verbosity steps onto log levels, most verbose last.
pub const LEVELS: [LevelFilter; 5] = [
    LevelFilter::Error,
    LevelFilter::Warn,
    LevelFilter::Info,
    LevelFilter::Debug,
    LevelFilter::Trace,
];

/// One step more verbose than `current`, saturating at trace.
pub fn more_verbose(current: LevelFilter) -> LevelFilter {
    LEVELS
        .iter()
        .copied()
        .find(|level| *level > current)
        .unwrap_or(LevelFilter::Trace)
}

/// One step less verbose than `current`, saturating at error.
pub fn less_verbose(current: LevelFilter) -> LevelFilter {
    LEVELS
        .iter()
        .rev()
        .copied()
        .find(|level| *level < current)
        .unwrap_or(LevelFilter::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_steps_saturate() {
        assert_eq!(more_verbose(LevelFilter::Info), LevelFilter::Debug);
        assert_eq!(more_verbose(LevelFilter::Trace), LevelFilter::Trace);
        assert_eq!(less_verbose(LevelFilter::Info), LevelFilter::Warn);
        assert_eq!(less_verbose(LevelFilter::Error), LevelFilter::Error);
        assert_eq!(less_verbose(LevelFilter::Off), LevelFilter::Error);
    }
}
