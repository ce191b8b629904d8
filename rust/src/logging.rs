//! Logging for the orchestration engine.
//!
//! Stage code logs through verbosity-gated macros so hot loops stay quiet
//! unless asked. Verbosity levels:
//! - 0: SILENT (warnings and errors only)
//! - 1: CHANGES (commits, delays, reassignments, recomputes)
//! - 2: CHECKS (candidate consideration, skip reasons)
//! - 3: DEBUG (full algorithm internals)
//!
//! All output goes through `tracing`; installing a subscriber is left to the
//! embedding binary (see [`init_logging`]).

use tracing_subscriber::EnvFilter;

/// Verbosity level constants.
pub const VERBOSITY_SILENT: u8 = 0;
pub const VERBOSITY_CHANGES: u8 = 1;
pub const VERBOSITY_CHECKS: u8 = 2;
pub const VERBOSITY_DEBUG: u8 = 3;

/// Environment variable consulted by [`init_logging`] when no level is given.
pub const LOG_ENV_VAR: &str = "ORCHESTRATOR_LOG";

/// Log at CHANGES level (verbosity >= 1).
///
/// Used for: task commits, leveling delays, reassignments, recomputes.
#[macro_export]
macro_rules! log_changes {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHANGES {
            ::tracing::info!($($arg)*);
        }
    };
}

/// Log at CHECKS level (verbosity >= 2).
///
/// Used for: candidate consideration, skip reasons, eligibility checks.
#[macro_export]
macro_rules! log_checks {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHECKS {
            ::tracing::debug!($($arg)*);
        }
    };
}

/// Log at DEBUG level (verbosity >= 3).
#[macro_export]
macro_rules! log_debug {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_DEBUG {
            ::tracing::trace!($($arg)*);
        }
    };
}

/// Install a global fmt subscriber writing to stderr.
///
/// Level priority: explicit `level` argument, then `ORCHESTRATOR_LOG`, then
/// `info`. Returns an error string if a global subscriber is already set.
pub fn init_logging(level: Option<&str>) -> Result<(), String> {
    let directive = match level {
        Some(l) => l.to_string(),
        None => std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| "info".to_string()),
    };
    let filter = EnvFilter::try_new(parse_level_str(&directive).unwrap_or("info"))
        .map_err(|e| e.to_string())?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| e.to_string())
}

fn parse_level_str(s: &str) -> Option<&'static str> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some("error"),
        "warn" | "warning" => Some("warn"),
        "info" => Some("info"),
        "debug" => Some("debug"),
        "trace" => Some("trace"),
        _ => None,
    }
}
