pub use slog::{crit, debug, error, info, o, trace, warn};
pub use slog::{Discard, Drain, Logger};

use sloggers::{Config, LoggerConfig};

/// Builds the root terminal logger writing to stderr.
///
/// `level` must be one of the sloggers severity names
/// ("trace", "debug", "info", "warning", "error", "critical").
pub fn init(level: &str) -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(&format!(
        r#"
type = "terminal"
level = "{}"
destination = "stderr"
"#,
        level
    ))
    .expect("Error parsing logger configuration");

    config.build_logger().expect("Error building logger")
}

/// Logger that discards all records.
pub fn null() -> Logger {
    Logger::root(Discard, o!())
}
