//! Configuration schema types
//!
//! This module defines the persisted configuration for phase envelopes.
//! These types are deserialized from YAML (or JSON) configuration files.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Parameter bound to phase-local elapsed time when none is configured.
pub const DEFAULT_PARAMETER: &str = "X";

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Root configuration for a phase envelope.
///
/// An envelope is an ordered list of phases. Each phase contributes a
/// formula-driven delta on top of the value the previous phase ended at,
/// and completes according to its [`CompletionConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EnvelopeConfig {
    /// Envelope-level settings
    #[serde(default)]
    pub envelope: EnvelopeSettings,

    /// Ordered phase definitions (at least one)
    pub phases: Vec<PhaseConfig>,

    /// Global event → phase bindings checked in every phase and while idle.
    ///
    /// A `null` target deactivates the envelope.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub interrupts: IndexMap<String, Option<String>>,

    /// Defaults for batch simulation and playback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationSettings>,
}

impl EnvelopeConfig {
    /// Returns the phase with the given name, if any.
    #[must_use]
    pub fn phase(&self, name: &str) -> Option<&PhaseConfig> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Returns the names of all phases in declaration order.
    #[must_use]
    pub fn phase_names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.name.as_str()).collect()
    }

    /// Returns the name of the phase the envelope starts in.
    ///
    /// This is `envelope.start` when set, otherwise the first phase.
    #[must_use]
    pub fn start_phase(&self) -> Option<&str> {
        self.envelope
            .start
            .as_deref()
            .or_else(|| self.phases.first().map(|p| p.name.as_str()))
    }
}

// ============================================================================
// Envelope Settings
// ============================================================================

/// Envelope-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct EnvelopeSettings {
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Value reported while idle; the first phase starts from it
    #[serde(default)]
    pub default_value: f64,

    /// Identifier bound to phase-local elapsed time in every formula
    #[serde(default = "default_parameter")]
    pub parameter: String,

    /// Named variables available to every formula
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, f64>,

    /// Phase entered on activation (defaults to the first phase)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
}

impl Default for EnvelopeSettings {
    fn default() -> Self {
        Self {
            name: None,
            default_value: 0.0,
            parameter: default_parameter(),
            variables: IndexMap::new(),
            start: None,
        }
    }
}

fn default_parameter() -> String {
    DEFAULT_PARAMETER.to_string()
}

// ============================================================================
// Phases
// ============================================================================

/// A single phase of the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct PhaseConfig {
    /// Unique phase name
    pub name: String,

    /// Delta formula evaluated against phase-local elapsed time.
    ///
    /// Without a formula the phase holds the value it was entered with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,

    /// When the phase ends
    pub completion: CompletionConfig,

    /// Successor phase; absent returns the envelope to idle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,

    /// Per-phase event → phase bindings (`null` deactivates)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub triggers: IndexMap<String, Option<String>>,
}

impl PhaseConfig {
    /// Creates a phase with no formula, successor or triggers.
    #[must_use]
    pub fn new(name: impl Into<String>, completion: CompletionConfig) -> Self {
        Self {
            name: name.into(),
            formula: None,
            completion,
            next: None,
            triggers: IndexMap::new(),
        }
    }

    /// Sets the phase formula.
    #[must_use]
    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    /// Sets the successor phase.
    #[must_use]
    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }
}

/// Phase completion rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionConfig {
    /// Ends when the envelope value reaches or crosses `value`
    Target {
        /// Target value
        value: f64,
        /// Relative tolerance for the "arrived" test
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tolerance: Option<f64>,
    },
    /// Ends when phase-elapsed time reaches or crosses `value` seconds
    Duration {
        /// Phase length in seconds
        value: f64,
    },
    /// Ends only when an event names the successor phase
    External,
    /// Never ends on its own
    Indefinite,
}

impl CompletionConfig {
    /// Short lowercase name of the completion kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Target { .. } => "target",
            Self::Duration { .. } => "duration",
            Self::External => "external",
            Self::Indefinite => "indefinite",
        }
    }

    /// Returns the target value for target completions.
    #[must_use]
    pub const fn target(&self) -> Option<f64> {
        match self {
            Self::Target { value, .. } => Some(*value),
            _ => None,
        }
    }
}

// ============================================================================
// Simulation Settings
// ============================================================================

/// Defaults for batch simulation and scripted playback.
///
/// Command-line flags take precedence over these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct SimulationSettings {
    /// Fixed tick length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dt: Option<f64>,

    /// Phase-elapsed time after which external phases are released
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_time: Option<f64>,

    /// Safety cap on the number of ticks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ticks: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADSR: &str = r#"
envelope:
  name: adsr
  default_value: 0
phases:
  - name: attack
    formula: "10*X"
    completion: { kind: target, value: 10 }
    next: decay
  - name: decay
    formula: "-2*X"
    completion: { kind: target, value: 4, tolerance: 0.001 }
    next: sustain
  - name: sustain
    completion: { kind: external }
    next: release
    triggers: { stop: null }
  - name: release
    formula: "-1*X"
    completion: { kind: target, value: 0 }
interrupts:
  release: release
simulation:
  dt: 0.1
  trigger_time: 1.0
"#;

    #[test]
    fn test_parse_adsr_config() {
        let config: EnvelopeConfig = serde_yaml::from_str(ADSR).unwrap();
        assert_eq!(config.envelope.name.as_deref(), Some("adsr"));
        assert_eq!(config.envelope.parameter, "X");
        assert_eq!(config.phases.len(), 4);
        assert_eq!(
            config.phases[1].completion,
            CompletionConfig::Target {
                value: 4.0,
                tolerance: Some(0.001)
            }
        );
        assert_eq!(config.phases[2].completion, CompletionConfig::External);
        assert!(config.phases[3].next.is_none());
        assert_eq!(config.phases[2].triggers.get("stop"), Some(&None));
        assert_eq!(
            config.interrupts.get("release"),
            Some(&Some("release".to_string()))
        );
        assert_eq!(config.simulation.and_then(|s| s.dt), Some(0.1));
    }

    #[test]
    fn test_start_phase_defaults_to_first() {
        let mut config: EnvelopeConfig = serde_yaml::from_str(ADSR).unwrap();
        assert_eq!(config.start_phase(), Some("attack"));
        config.envelope.start = Some("decay".to_string());
        assert_eq!(config.start_phase(), Some("decay"));
    }

    #[test]
    fn test_envelope_section_optional() {
        let yaml = r"
phases:
  - name: hold
    completion: { kind: indefinite }
";
        let config: EnvelopeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.envelope, EnvelopeSettings::default());
        assert_eq!(config.phase_names(), vec!["hold"]);
    }

    #[test]
    fn test_unknown_phase_field_rejected() {
        let yaml = r"
phases:
  - name: hold
    complete: { kind: indefinite }
";
        assert!(serde_yaml::from_str::<EnvelopeConfig>(yaml).is_err());
    }

    #[test]
    fn test_target_requires_value() {
        let yaml = r"
phases:
  - name: attack
    completion: { kind: target }
";
        assert!(serde_yaml::from_str::<EnvelopeConfig>(yaml).is_err());
    }

    #[test]
    fn test_serialize_skips_empty_fields() {
        let config = EnvelopeConfig {
            envelope: EnvelopeSettings::default(),
            phases: vec![
                PhaseConfig::new("attack", CompletionConfig::Duration { value: 1.0 })
                    .with_formula("X"),
            ],
            interrupts: IndexMap::new(),
            simulation: None,
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("interrupts"));
        assert!(!yaml.contains("triggers"));
        assert!(yaml.contains("kind: duration"));

        let json = serde_json::to_string(&config).unwrap();
        let back: EnvelopeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_completion_kind_names() {
        assert_eq!(CompletionConfig::External.kind(), "external");
        assert_eq!(CompletionConfig::Indefinite.target(), None);
        assert_eq!(
            CompletionConfig::Target {
                value: 3.0,
                tolerance: None
            }
            .target(),
            Some(3.0)
        );
    }
}
