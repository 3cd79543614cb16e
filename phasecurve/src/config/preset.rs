//! Built-in envelope presets.
//!
//! [`AdsrParams`] describes the classic attack → decay → sustain → release
//! envelope by its two levels and four formulas. The preset rises to
//! `attack_target`, falls to `sustain_target`, holds until released and
//! then returns to `default_value`. Global interrupts `attack` (retrigger
//! from any phase) and `release` (cut to release from any phase) are bound
//! automatically.

use indexmap::IndexMap;

use crate::config::loader::{ConfigLimits, LoadResult, LoadWarning};
use crate::config::validation::Validator;
use crate::error::{ConfigError, Severity, ValidationIssue};
use crate::phase::DEFAULT_TOLERANCE;
use crate::phase::completion::approximately;
use phasecurve_core::config::{
    CompletionConfig, EnvelopeConfig, EnvelopeSettings, PhaseConfig, SimulationSettings,
};

/// Phase names used by the ADSR preset.
pub const ADSR_PHASES: [&str; 4] = ["attack", "decay", "sustain", "release"];

/// Parameters of the ADSR preset.
#[derive(Debug, Clone, PartialEq)]
pub struct AdsrParams {
    /// Idle value and release target
    pub default_value: f64,
    /// Peak reached by the attack phase
    pub attack_target: f64,
    /// Level held by the sustain phase
    pub sustain_target: f64,
    /// Attack formula (rising)
    pub attack: String,
    /// Decay formula (falling towards the sustain level)
    pub decay: String,
    /// Sustain formula; empty holds the level
    pub sustain: String,
    /// Release formula (falling towards the default value)
    pub release: String,
    /// Optional envelope name
    pub name: Option<String>,
}

impl Default for AdsrParams {
    fn default() -> Self {
        Self {
            default_value: 0.0,
            attack_target: 10.0,
            sustain_target: 4.0,
            attack: "10*X".to_string(),
            decay: "-2*X".to_string(),
            sustain: String::new(),
            release: "-1*X".to_string(),
            name: Some("adsr".to_string()),
        }
    }
}

impl AdsrParams {
    /// Checks the level ordering.
    ///
    /// Returns the warnings on success.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] listing every violated
    /// ordering: `attack_target > default_value`,
    /// `attack_target >= sustain_target` and `sustain_target > default_value`.
    pub fn check(&self) -> Result<Vec<ValidationIssue>, ConfigError> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut issue = |path: &str, message: String, severity| {
            let issue = ValidationIssue {
                path: path.to_string(),
                message,
                severity,
            };
            match severity {
                Severity::Error => errors.push(issue),
                Severity::Warning => warnings.push(issue),
            }
        };

        for (field, value) in [
            ("default_value", self.default_value),
            ("attack_target", self.attack_target),
            ("sustain_target", self.sustain_target),
        ] {
            if !value.is_finite() {
                issue(field, format!("{field} must be finite, got {value}"), Severity::Error);
            }
        }
        if self.attack_target <= self.default_value {
            issue(
                "attack_target",
                format!(
                    "attack target {} must be above the default value {}",
                    self.attack_target, self.default_value
                ),
                Severity::Error,
            );
        }
        if self.attack_target < self.sustain_target {
            issue(
                "attack_target",
                format!(
                    "attack target {} must not be below the sustain target {}",
                    self.attack_target, self.sustain_target
                ),
                Severity::Error,
            );
        } else if approximately(self.attack_target, self.sustain_target, DEFAULT_TOLERANCE) {
            issue(
                "sustain_target",
                "sustain target equals the attack target; decay completes on entry".to_string(),
                Severity::Warning,
            );
        }
        if self.sustain_target <= self.default_value {
            issue(
                "sustain_target",
                format!(
                    "sustain target {} must be above the default value {}",
                    self.sustain_target, self.default_value
                ),
                Severity::Error,
            );
        }

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(ConfigError::ValidationError {
                path: "preset adsr".to_string(),
                errors,
            })
        }
    }

    /// The four-phase configuration described by these parameters.
    #[must_use]
    pub fn to_config(&self) -> EnvelopeConfig {
        let [attack, decay, sustain, release] = ADSR_PHASES;
        let formula = |text: &str| Some(text.trim().to_string()).filter(|t| !t.is_empty());
        let target = |value| CompletionConfig::Target {
            value,
            tolerance: None,
        };

        let phases = vec![
            PhaseConfig {
                formula: formula(&self.attack),
                ..PhaseConfig::new(attack, target(self.attack_target)).with_next(decay)
            },
            PhaseConfig {
                formula: formula(&self.decay),
                ..PhaseConfig::new(decay, target(self.sustain_target)).with_next(sustain)
            },
            PhaseConfig {
                formula: formula(&self.sustain),
                ..PhaseConfig::new(sustain, CompletionConfig::External).with_next(release)
            },
            PhaseConfig {
                formula: formula(&self.release),
                ..PhaseConfig::new(release, target(self.default_value))
            },
        ];

        let interrupts: IndexMap<String, Option<String>> = [attack, release]
            .into_iter()
            .map(|p| (p.to_string(), Some(p.to_string())))
            .collect();

        EnvelopeConfig {
            envelope: EnvelopeSettings {
                name: self.name.clone(),
                default_value: self.default_value,
                ..EnvelopeSettings::default()
            },
            phases,
            interrupts,
            simulation: Some(SimulationSettings::default()),
        }
    }

    /// Checks the parameters and builds a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for bad levels or formulas.
    pub fn build(&self) -> Result<LoadResult, ConfigError> {
        let mut warnings: Vec<LoadWarning> = self
            .check()?
            .into_iter()
            .map(|issue| LoadWarning {
                message: issue.message,
                location: Some(issue.path),
            })
            .collect();

        let config = self.to_config();
        let result = Validator::new().validate(&config, &ConfigLimits::default());
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: "preset adsr".to_string(),
                errors: result.errors,
            });
        }
        warnings.extend(result.warnings.into_iter().map(|issue| LoadWarning {
            message: issue.message,
            location: Some(issue.path),
        }));
        Ok(LoadResult { config, warnings })
    }
}
