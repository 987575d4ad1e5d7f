//! Diagnostic logging.
//!
//! Three levels selected by CLI flags, with `RUST_LOG` taking precedence
//! when set:
//! - **Quiet** (`-q`): errors only
//! - **Default**: errors and warnings
//! - **Verbose** (`-v`): loader geometry, firmware setup, unsupported
//!   services and timings

use std::time::Instant;

use log::LevelFilter;

/// The level implied by the CLI flags.
#[must_use]
pub fn level(quiet: bool, verbose: bool) -> LevelFilter {
    if quiet {
        LevelFilter::Error
    } else if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    }
}

/// Installs the logger. Call once, before any other thread starts.
pub fn init(quiet: bool, verbose: bool) {
    env_logger::Builder::new()
        .filter_level(level(quiet, verbose))
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

/// RAII timer that logs the elapsed duration on drop.
///
/// ```ignore
/// let _t = Timer::start("image load");
/// // ... work ...
/// // logs "image load: 1.2ms" at debug level on drop
/// ```
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    /// Begin timing a labeled operation.
    #[must_use]
    pub fn start(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        log::debug!("{}: {:.1?}", self.label, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_to_levels() {
        assert_eq!(level(true, false), LevelFilter::Error);
        assert_eq!(level(false, false), LevelFilter::Warn);
        assert_eq!(level(false, true), LevelFilter::Debug);
    }
}
