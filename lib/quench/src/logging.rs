pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::{Config, LoggerConfig};

const DEFAULT_CONFIG: &str = r#"
type = "terminal"
level = "info"
destination = "stderr"
"#;

/// Builds the default terminal logger writing to stderr.
pub fn init() -> Logger {
    from_toml(DEFAULT_CONFIG).expect("Error building default logger")
}

/// Builds a logger from an operator supplied TOML configuration string. The
/// accepted keys are those of `sloggers::LoggerConfig` (type, level,
/// destination, file paths etc).
pub fn from_toml(config: &str) -> Result<Logger, String> {
    let config: LoggerConfig = serdeconv::from_toml_str(config).map_err(|err| err.to_string())?;

    config.build_logger().map_err(|err| err.to_string())
}

/// Logger that swallows all records. Used by tests and as the fallback when
/// a component is constructed without a parent logger.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
