//! Log setup from `LOGLEVEL` or `RUST_LOG`.

use rootcell_common::constants::LOG_LEVEL_ENV;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Maps an integer verbosity onto a tracing level.
///
/// 0 through 2 all mean errors only; anything above 6 is trace.
pub fn level_from_verbosity(verbosity: i64) -> Level {
    match verbosity {
        i64::MIN..=2 => Level::ERROR,
        3 => Level::WARN,
        4 => Level::INFO,
        5 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Parses a `LOGLEVEL` value; non-integers are ignored.
pub fn parse_verbosity(value: &str) -> Option<Level> {
    value.trim().parse::<i64>().ok().map(level_from_verbosity)
}

/// Reads and removes `LOGLEVEL` so it never reaches the launched command.
#[allow(unsafe_code)]
pub fn take_log_level() -> Option<Level> {
    let value = std::env::var(LOG_LEVEL_ENV).ok()?;
    // SAFETY: called first thing in `main`, before any other thread exists.
    unsafe { std::env::remove_var(LOG_LEVEL_ENV) };
    parse_verbosity(&value)
}

/// Installs the stderr subscriber.
///
/// An explicit level wins; otherwise `RUST_LOG` applies, defaulting to
/// `warn`.
pub fn init(level: Option<Level>) {
    let filter = level.map_or_else(
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        |level| EnvFilter::new(level.as_str().to_ascii_lowercase()),
    );
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_onto_levels() {
        assert_eq!(level_from_verbosity(0), Level::ERROR);
        assert_eq!(level_from_verbosity(2), Level::ERROR);
        assert_eq!(level_from_verbosity(3), Level::WARN);
        assert_eq!(level_from_verbosity(4), Level::INFO);
        assert_eq!(level_from_verbosity(5), Level::DEBUG);
        assert_eq!(level_from_verbosity(6), Level::TRACE);
        assert_eq!(level_from_verbosity(42), Level::TRACE);
    }

    #[test]
    fn garbage_is_ignored() {
        assert_eq!(parse_verbosity("5\n"), Some(Level::DEBUG));
        assert_eq!(parse_verbosity("loud"), None);
        assert_eq!(parse_verbosity(""), None);
    }
}
