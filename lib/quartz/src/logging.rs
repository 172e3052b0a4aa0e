pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Drain, Logger};

use crate::config::LoggingConfig;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds the process logger from the `[logging]` config section. Falls back to an
/// info-level stderr logger when the section holds unknown values.
pub fn init(config: &LoggingConfig) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();

    builder.level(severity(&config.level));
    builder.destination(destination(&config.destination));

    builder.build().expect("Error building terminal logger")
}

/// Logger that swallows everything. Used by tests and by components constructed
/// without an owning driver.
#[inline]
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}

fn severity(level: &str) -> Severity {
    match level {
        "trace" => Severity::Trace,
        "debug" => Severity::Debug,
        "info" => Severity::Info,
        "warning" | "warn" => Severity::Warning,
        "error" => Severity::Error,
        "critical" => Severity::Critical,
        _ => Severity::Info,
    }
}

fn destination(dest: &str) -> Destination {
    match dest {
        "stdout" => Destination::Stdout,
        _ => Destination::Stderr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_from_defaults() {
        let config = LoggingConfig::default();
        let log = init(&config);

        info!(log, "logger constructed"; "level" => &config.level);
    }

    #[test]
    fn test_unknown_level_falls_back() {
        let config = LoggingConfig {
            level: "shouty".to_string(),
            destination: "nowhere".to_string(),
        };

        let _ = init(&config);
    }
}
