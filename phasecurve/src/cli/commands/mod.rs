//! CLI command dispatch and handlers
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod completions;
pub mod eval;
pub mod play;
pub mod preset;
pub mod simulate;
pub mod validate;
pub mod version;

use std::io::{BufWriter, Write};
use std::path::Path;

use crate::cli::args::{Cli, Commands};
use crate::config::{ConfigLoader, LoadResult, LoadWarning, build_envelope, probe_formulas};
use crate::error::PhaseCurveError;
use crate::formula::suggest;
use crate::phase::{PhaseEnvelope, PhaseId};

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub fn dispatch(cli: Cli) -> Result<(), PhaseCurveError> {
    match cli.command {
        Commands::Simulate(args) => simulate::run(&args),
        Commands::Play(args) => play::run(&args),
        Commands::Validate(args) => validate::run(&args),
        Commands::Eval(args) => eval::run(&args),
        Commands::Preset(cmd) => preset::run(&cmd),
        Commands::Completions(args) => {
            completions::run(&args);
            Ok(())
        }
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}

/// Loads, validates and compiles the configuration at `path`.
///
/// Warnings are logged; formulas are probed at `X = 0` so that one failing
/// immediately is reported before any ticking starts.
pub(crate) fn load_envelope(path: &Path) -> Result<(LoadResult, PhaseEnvelope), PhaseCurveError> {
    tracing::info!(config = %path.display(), "loading configuration");
    let loaded = ConfigLoader::with_defaults().load(path)?;
    log_warnings(&loaded.warnings);

    let envelope = build_envelope(&loaded.config)?;
    probe_formulas(&envelope)?;
    Ok((loaded, envelope))
}

pub(crate) fn log_warnings(warnings: &[LoadWarning]) {
    for warning in warnings {
        tracing::warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }
}

/// Resolves a phase named on the command line.
pub(crate) fn resolve_phase(envelope: &PhaseEnvelope, name: &str) -> Result<PhaseId, PhaseCurveError> {
    envelope.phase_id(name).ok_or_else(|| {
        let names = envelope.phases().iter().map(|p| p.name());
        let hint = suggest(name, names)
            .map_or_else(String::new, |s| format!(" (did you mean '{s}'?)"));
        PhaseCurveError::Usage(format!("unknown phase '{name}'{hint}"))
    })
}

/// Opens `path` for writing, or stdout when `None`.
pub(crate) fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>, PhaseCurveError> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(std::fs::File::create(path)?)),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    })
}
