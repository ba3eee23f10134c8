//! Logging setup for the binary and for embedders that have none.
//!
//! Everything in the crate logs through the `log` facade. `RUST_LOG`
//! overrides the configured level when set.

use crate::config::LoggingConfig;
use env_logger::Env;

/// Installs an `env_logger` backend filtered at `level`. Returns false if a
/// logger was already installed, which is not an error for embedders.
pub fn init_logging(level: &str) -> bool {
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}

/// Picks the level from `config`, forced to `debug` when `debug` is set.
pub fn init_from_config(config: &LoggingConfig, debug: bool) -> bool {
    let level = if debug { "debug" } else { config.level.as_str() };
    init_logging(level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_refused() {
        let _ = init_logging("warn");
        assert!(!init_logging("debug"));
    }
}
