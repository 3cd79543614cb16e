//! `preset` command: print a built-in configuration as YAML.

use crate::cli::args::{AdsrArgs, Preset, PresetCommand};
use crate::cli::commands::log_warnings;
use crate::config::AdsrParams;
use crate::error::PhaseCurveError;

/// Build the requested preset and print it.
///
/// # Errors
///
/// Returns a configuration error when the preset parameters are
/// inconsistent or a formula does not compile.
pub fn run(cmd: &PresetCommand) -> Result<(), PhaseCurveError> {
    let yaml = match &cmd.preset {
        Preset::Adsr(args) => adsr_yaml(args)?,
    };
    print!("{yaml}");
    Ok(())
}

fn adsr_yaml(args: &AdsrArgs) -> Result<String, PhaseCurveError> {
    let params = AdsrParams {
        default_value: args.default_value,
        attack_target: args.attack_target,
        sustain_target: args.sustain_target,
        attack: args.attack.clone(),
        decay: args.decay.clone(),
        sustain: args.sustain.clone(),
        release: args.release.clone(),
        name: Some(args.name.clone()).filter(|n| !n.is_empty()),
    };
    let built = params.build()?;
    log_warnings(&built.warnings);
    Ok(serde_yaml::to_string(&built.config)?)
}
