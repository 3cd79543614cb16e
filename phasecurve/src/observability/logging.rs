//! Logging initialization.
//!
//! Structured logging via `tracing` to stderr, human-readable or JSON.
//! Verbosity comes from the `-v` count; `PHASECURVE_LOG_LEVEL` (any
//! `EnvFilter` directive) overrides it entirely.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

use crate::cli::args::ColorChoice;

/// Environment variable that overrides the verbosity flags.
pub const LOG_LEVEL_ENV: &str = "PHASECURVE_LOG_LEVEL";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with optional ANSI colors.
    #[default]
    Human,
    /// Newline-delimited JSON for machine consumption.
    Json,
}

/// Maps a verbosity count to a filter directive.
///
/// Dependencies stay at `warn`; only this crate gets louder:
/// 0 → `warn`, 1 → `phasecurve=info`, 2 → `phasecurve=debug`,
/// 3+ → `trace` for everything.
#[must_use]
pub fn verbosity_to_directive(verbosity: u8) -> String {
    match verbosity {
        0 => "warn".to_string(),
        1 => "warn,phasecurve=info".to_string(),
        2 => "warn,phasecurve=debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Whether stderr output should carry ANSI colors.
///
/// `auto` honours `NO_COLOR` and only colors a terminal.
#[must_use]
pub fn use_ansi(color: ColorChoice) -> bool {
    match color {
        ColorChoice::Auto => {
            std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
        }
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    }
}

/// Installs the global tracing subscriber.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(format: LogFormat, verbosity: u8, color: ColorChoice) {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .unwrap_or_else(|_| EnvFilter::new(verbosity_to_directive(verbosity)));
    let show_target = verbosity >= 2;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(show_target)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Human => builder.with_ansi(use_ansi(color)).try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };
}
