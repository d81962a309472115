//! Logging bootstrap, grounded on `flux::logging` in the reference pack.
//!
//! The teacher's version of this module was a stub that built a logger and
//! threw it away; here `init` actually returns the root logger so the
//! listener and consumers can derive child loggers from it.

pub use slog::{self, debug, error, info, o, trace, warn, Logger};

use sloggers::types::Severity;
use sloggers::Build;

/// Build the default terminal logger used when the caller doesn't supply
/// their own `slog::Logger`. Mirrors the teacher's terminal/stderr/debug
/// configuration.
pub fn init() -> Logger {
    let mut builder = sloggers::terminal::TerminalLoggerBuilder::new();
    builder.destination(sloggers::terminal::Destination::Stderr);
    builder.level(Severity::Debug);

    match builder.build() {
        Ok(logger) => logger,
        Err(_) => Logger::root(slog::Discard, o!()),
    }
}

/// A logger that discards everything, for callers that don't want logging
/// (e.g. unit tests that assert on behavior, not log output).
pub fn discard() -> Logger {
    Logger::root(slog::Discard, o!())
}
