//! Compiles a configuration into a runnable envelope.
//!
//! Phase names are resolved to [`PhaseId`]s and formulas are compiled
//! once, up front. A configuration that passed [`Validator`] always builds;
//! the checks here only guard against configurations constructed in code.
//!
//! [`Validator`]: crate::config::Validator

use std::collections::HashMap;

use crate::error::ConfigError;
use crate::formula::{Calculator, FormulaEvaluator};
use crate::phase::{CompletionPolicy, DEFAULT_TOLERANCE, PhaseDefinition, PhaseEnvelope, PhaseId};
use crate::simulate::SimulationOptions;
use phasecurve_core::config::{CompletionConfig, EnvelopeConfig, SimulationSettings};

/// Builds a [`PhaseEnvelope`] from a configuration.
///
/// # Errors
///
/// Returns [`ConfigError::Formula`] when a formula or name fails to
/// compile and [`ConfigError::InvalidValue`] for dangling phase references.
pub fn build_envelope(config: &EnvelopeConfig) -> Result<PhaseEnvelope, ConfigError> {
    let settings = &config.envelope;
    let calculator = settings.variables.iter().try_fold(
        Calculator::new(&settings.parameter).map_err(|e| formula_error("envelope.parameter", &e))?,
        |calc, (name, value)| {
            calc.with_variable(name, *value)
                .map_err(|e| formula_error(&format!("envelope.variables.{name}"), &e))
        },
    )?;

    let ids: HashMap<&str, PhaseId> = config
        .phases
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name.as_str(), PhaseId(i)))
        .collect();
    let resolve = |name: &str, field: String| {
        ids.get(name).copied().ok_or_else(|| ConfigError::InvalidValue {
            field,
            value: name.to_string(),
            expected: "the name of a configured phase".to_string(),
        })
    };

    let mut phases = Vec::with_capacity(config.phases.len());
    for (idx, phase) in config.phases.iter().enumerate() {
        let mut definition = PhaseDefinition::new(&phase.name, completion_policy(phase.completion));
        if let Some(formula) = &phase.formula {
            definition = definition
                .with_formula(&calculator, formula)
                .map_err(|e| formula_error(&format!("phases[{idx}].formula"), &e))?;
        }
        if let Some(next) = &phase.next {
            definition = definition.with_next(resolve(next, format!("phases[{idx}].next"))?);
        }
        for (event, target) in &phase.triggers {
            let target = target
                .as_deref()
                .map(|t| resolve(t, format!("phases[{idx}].triggers.{event}")))
                .transpose()?;
            definition = definition.with_trigger(event, target);
        }
        phases.push(definition);
    }

    let mut envelope = PhaseEnvelope::new(calculator, phases, settings.default_value)
        .map_err(|e| invalid("phases", &e))?;
    if let Some(name) = &settings.name {
        envelope = envelope.with_name(name);
    }
    if let Some(start) = &settings.start {
        let id = resolve(start, "envelope.start".to_string())?;
        envelope = envelope.with_start(id).map_err(|e| invalid("envelope.start", &e))?;
    }
    for (event, target) in &config.interrupts {
        let field = format!("interrupts.{event}");
        let target = target
            .as_deref()
            .map(|t| resolve(t, field.clone()))
            .transpose()?;
        envelope = envelope
            .with_interrupt(event, target)
            .map_err(|e| invalid(&field, &e))?;
    }
    Ok(envelope)
}

/// Maps a persisted completion to the runtime policy.
#[must_use]
pub const fn completion_policy(completion: CompletionConfig) -> CompletionPolicy {
    match completion {
        CompletionConfig::Target { value, tolerance } => CompletionPolicy::Target {
            value,
            tolerance: match tolerance {
                Some(t) => t,
                None => DEFAULT_TOLERANCE,
            },
        },
        CompletionConfig::Duration { value } => CompletionPolicy::Duration { seconds: value },
        CompletionConfig::External => CompletionPolicy::External,
        CompletionConfig::Indefinite => CompletionPolicy::Indefinite,
    }
}

/// Simulation options from the optional `simulation` section.
#[must_use]
pub fn simulation_options(settings: Option<&SimulationSettings>) -> SimulationOptions {
    let defaults = SimulationOptions::default();
    settings.map_or(defaults, |s| SimulationOptions {
        dt: s.dt.unwrap_or(defaults.dt),
        trigger_time: s.trigger_time.unwrap_or(defaults.trigger_time),
        max_ticks: s.max_ticks.unwrap_or(defaults.max_ticks),
        start: None,
    })
}

fn formula_error(location: &str, err: &crate::error::FormulaError) -> ConfigError {
    ConfigError::Formula {
        location: location.to_string(),
        message: err.to_string(),
    }
}

fn invalid(field: &str, err: &crate::error::EnvelopeError) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: err.to_string(),
        expected: "a buildable envelope".to_string(),
    }
}

/// Checks that every formula evaluates at the phase start.
///
/// Catches formulas that compile but fail immediately, such as `LN(X)`,
/// before a driver ticks into them.
///
/// # Errors
///
/// Returns [`ConfigError::Formula`] for the first formula that fails at `X = 0`.
pub fn probe_formulas<E: FormulaEvaluator>(envelope: &PhaseEnvelope<E>) -> Result<(), ConfigError> {
    for (idx, phase) in envelope.phases().iter().enumerate() {
        if let Some(expression) = phase.expression() {
            envelope
                .evaluator()
                .evaluate(expression, 0.0)
                .map_err(|e| formula_error(&format!("phases[{idx}].formula"), &e))?;
        }
    }
    Ok(())
}
