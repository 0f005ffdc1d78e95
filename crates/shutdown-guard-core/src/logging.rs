//! Logging setup shared by binaries embedding the guard

use std::io::{IsTerminal, Write};

/// ANSI color code and padded label for a log level.
fn level_style(level: log::Level, color: bool) -> (&'static str, &'static str, &'static str) {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return ("", label, "");
    }
    let ansi = match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    };
    (ansi, label, "\x1b[0m")
}

fn default_filter(quiet: bool, debug: bool) -> &'static str {
    if debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    }
}

/// Initialize `env_logger` (`RUST_LOG` overrides the default level).
///
/// TTY: colored labels with millisecond timestamps. Non-TTY: plain labels for
/// log aggregation. Calling it twice is harmless; the second call is ignored.
pub fn init_logging(quiet: bool, debug: bool) {
    let color = std::io::stderr().is_terminal();
    let result = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter(quiet, debug)),
    )
    .format(move |buf, record| {
        let (pre, label, post) = level_style(record.level(), color);
        if color {
            writeln!(buf, "{} [{pre}{label}{post}] {}", buf.timestamp_millis(), record.args())
        } else {
            writeln!(buf, "[{label}] {}", record.args())
        }
    })
    .try_init();
    if let Err(e) = result {
        log::debug!("logger already initialized: {e}");
    }
}
