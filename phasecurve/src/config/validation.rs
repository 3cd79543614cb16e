//! Configuration validation
//!
//! Semantic validation of a deserialized [`EnvelopeConfig`]. Validation
//! collects ALL issues (it does not stop at the first) so that one run
//! reports everything wrong with a file. Errors prevent the envelope from
//! being built; warnings flag authoring that is legal but suspicious.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::loader::ConfigLimits;
use crate::error::{Severity, ValidationIssue};
use crate::formula::{Calculator, Expr, FormulaEvaluator, Function, suggest};
use crate::phase::DEFAULT_TOLERANCE;
use crate::phase::completion::approximately;
use phasecurve_core::config::{CompletionConfig, EnvelopeConfig, PhaseConfig};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// Event names may not contain whitespace or `@` (the CLI's time separator).
static EVENT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+$").expect("valid regex"));

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors followed by warnings.
    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.errors.iter().chain(&self.warnings)
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every issue found.
    pub fn validate(&mut self, config: &EnvelopeConfig, limits: &ConfigLimits) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        let calculator = self.validate_envelope(config, limits);
        self.validate_phases(config, calculator.as_ref(), limits);
        self.validate_references(config);
        self.validate_interrupts(config);
        self.validate_targets(config);
        self.validate_reachability(config);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Envelope Settings
    // ========================================================================

    /// Validates the `envelope` section and returns the calculator phase
    /// formulas should be compiled with, if the names allow building one.
    fn validate_envelope(&mut self, config: &EnvelopeConfig, limits: &ConfigLimits) -> Option<Calculator> {
        let settings = &config.envelope;

        if !settings.default_value.is_finite() {
            self.add_error("envelope.default_value", "default value must be finite");
        }

        let parameter_ok = self.validate_identifier(&settings.parameter, "envelope.parameter");

        if settings.variables.len() > limits.max_variables {
            self.add_error(
                "envelope.variables",
                &format!(
                    "too many variables: {} (maximum: {}). \
                     Set PHASECURVE_MAX_VARIABLES to increase the limit.",
                    settings.variables.len(),
                    limits.max_variables
                ),
            );
        }

        let mut variables_ok = true;
        let mut seen: HashSet<String> = HashSet::new();
        for (name, value) in &settings.variables {
            let path = format!("envelope.variables.{name}");
            if !self.validate_identifier(name, &path) {
                variables_ok = false;
                continue;
            }
            if name.eq_ignore_ascii_case(&settings.parameter) {
                self.add_error(
                    &path,
                    &format!("variable '{name}' collides with the parameter name"),
                );
                variables_ok = false;
            } else if !seen.insert(name.to_ascii_lowercase()) {
                self.add_error(
                    &path,
                    &format!("variable '{name}' is declared twice (names are case-insensitive)"),
                );
                variables_ok = false;
            }
            if !value.is_finite() {
                self.add_error(&path, "variable value must be finite");
            }
        }

        if !(parameter_ok && variables_ok) {
            return None;
        }
        settings
            .variables
            .iter()
            .try_fold(Calculator::new(&settings.parameter).ok()?, |calc, (name, value)| {
                calc.with_variable(name, *value).ok()
            })
    }

    /// Checks that `name` is a bindable identifier.
    fn validate_identifier(&mut self, name: &str, path: &str) -> bool {
        if !is_identifier(name) {
            self.add_error(
                path,
                &format!("'{name}' is not a valid identifier (letters, digits and '_', not starting with a digit)"),
            );
            return false;
        }
        if let Some(function) = Function::lookup(name) {
            self.add_error(
                path,
                &format!("'{name}' is reserved by the built-in function {}", function.name()),
            );
            return false;
        }
        true
    }

    // ========================================================================
    // Phases
    // ========================================================================

    fn validate_phases(
        &mut self,
        config: &EnvelopeConfig,
        calculator: Option<&Calculator>,
        limits: &ConfigLimits,
    ) {
        if config.phases.is_empty() {
            self.add_error("phases", "an envelope needs at least one phase");
            return;
        }
        if config.phases.len() > limits.max_phases {
            self.add_error(
                "phases",
                &format!(
                    "too many phases: {} (maximum: {}). \
                     Set PHASECURVE_MAX_PHASES to increase the limit.",
                    config.phases.len(),
                    limits.max_phases
                ),
            );
        }

        let mut names = HashSet::new();
        for (idx, phase) in config.phases.iter().enumerate() {
            let path = format!("phases[{idx}]");

            if phase.name.trim().is_empty() {
                self.add_error(&format!("{path}.name"), "phase name cannot be empty");
            } else if !names.insert(phase.name.as_str()) {
                self.add_error(
                    &format!("{path}.name"),
                    &format!("duplicate phase name: '{}'", phase.name),
                );
            }

            self.validate_completion(phase, &path);
            self.validate_formula(phase, &path, calculator, limits);

            for event in phase.triggers.keys() {
                self.validate_event_name(event, &format!("{path}.triggers.{event}"));
            }
        }
    }

    fn validate_completion(&mut self, phase: &PhaseConfig, path: &str) {
        let path = format!("{path}.completion");
        match phase.completion {
            CompletionConfig::Target { value, tolerance } => {
                if !value.is_finite() {
                    self.add_error(&format!("{path}.value"), "target must be finite");
                }
                if let Some(tolerance) = tolerance {
                    if !tolerance.is_finite() || tolerance <= 0.0 {
                        self.add_error(
                            &format!("{path}.tolerance"),
                            &format!("tolerance must be finite and positive, got {tolerance}"),
                        );
                    }
                }
            }
            CompletionConfig::Duration { value } => {
                if !value.is_finite() || value < 0.0 {
                    self.add_error(
                        &format!("{path}.value"),
                        &format!("duration must be finite and non-negative, got {value}"),
                    );
                }
            }
            CompletionConfig::External | CompletionConfig::Indefinite => {}
        }
    }

    fn validate_formula(
        &mut self,
        phase: &PhaseConfig,
        path: &str,
        calculator: Option<&Calculator>,
        limits: &ConfigLimits,
    ) {
        let path = format!("{path}.formula");
        let Some(formula) = &phase.formula else {
            if matches!(phase.completion, CompletionConfig::Target { .. }) {
                self.add_warning(
                    &path,
                    &format!(
                        "target phase '{}' has no formula; it only completes if entered on its target",
                        phase.name
                    ),
                );
            }
            return;
        };

        if formula.len() > limits.max_formula_length {
            self.add_error(
                &path,
                &format!(
                    "formula is {} bytes long (maximum: {}). \
                     Set PHASECURVE_MAX_FORMULA_LENGTH to increase the limit.",
                    formula.len(),
                    limits.max_formula_length
                ),
            );
            return;
        }

        // Without a usable calculator the name errors are already reported.
        let Some(calculator) = calculator else {
            return;
        };
        match calculator.compile(formula) {
            Ok(expression) => self.check_constant_formula(phase, &expression, &path),
            Err(e) => self.add_error(&path, &e.to_string()),
        }
    }

    fn check_constant_formula(&mut self, phase: &PhaseConfig, expression: &Expr, path: &str) {
        if expression.uses_parameter() {
            return;
        }
        if let CompletionConfig::Target { value, .. } = phase.completion {
            let lands = expression
                .constant()
                .is_some_and(|c| approximately(c, value, DEFAULT_TOLERANCE));
            if !lands {
                self.add_warning(
                    path,
                    "formula does not depend on the parameter; the value jumps once and may never reach the target",
                );
            }
        }
    }

    fn validate_event_name(&mut self, event: &str, path: &str) {
        if !EVENT_NAME.is_match(event) {
            self.add_error(
                path,
                &format!("invalid event name '{event}': must be non-empty without whitespace or '@'"),
            );
        }
    }

    // ========================================================================
    // Cross References
    // ========================================================================

    fn validate_references(&mut self, config: &EnvelopeConfig) {
        if let Some(start) = &config.envelope.start {
            self.check_phase_ref(config, start, "envelope.start");
        }
        for (idx, phase) in config.phases.iter().enumerate() {
            if let Some(next) = &phase.next {
                self.check_phase_ref(config, next, &format!("phases[{idx}].next"));
            }
            for (event, target) in &phase.triggers {
                if let Some(target) = target {
                    self.check_phase_ref(config, target, &format!("phases[{idx}].triggers.{event}"));
                }
            }
        }
    }

    fn validate_interrupts(&mut self, config: &EnvelopeConfig) {
        for (event, target) in &config.interrupts {
            let path = format!("interrupts.{event}");
            self.validate_event_name(event, &path);
            match target {
                Some(target) => self.check_phase_ref(config, target, &path),
                None => self.add_warning(
                    &path,
                    &format!("interrupt '{event}' deactivates the envelope and is ignored while idle"),
                ),
            }
            if config.phases.iter().any(|p| p.triggers.contains_key(event)) {
                self.add_warning(
                    &path,
                    &format!("interrupt '{event}' is shadowed by a phase trigger of the same name in some phases"),
                );
            }
        }
    }

    fn check_phase_ref(&mut self, config: &EnvelopeConfig, name: &str, path: &str) {
        if config.phase(name).is_some() {
            return;
        }
        let hint = suggest(name, config.phases.iter().map(|p| p.name.as_str()))
            .map_or_else(String::new, |s| format!(" (did you mean '{s}'?)"));
        self.add_error(path, &format!("unknown phase '{name}'{hint}"));
    }

    // ========================================================================
    // Targets
    // ========================================================================

    fn validate_targets(&mut self, config: &EnvelopeConfig) {
        let default_value = config.envelope.default_value;
        for (idx, phase) in config.phases.iter().enumerate() {
            let Some(target) = phase.completion.target() else {
                continue;
            };
            let path = format!("phases[{idx}].completion.value");

            if target < default_value {
                self.add_warning(
                    &path,
                    &format!("target {target} is below the default value {default_value}"),
                );
            }

            let predecessor = config
                .phases
                .iter()
                .filter(|p| p.next.as_deref() == Some(phase.name.as_str()))
                .find_map(|p| p.completion.target());
            if predecessor.is_some_and(|prev| approximately(prev, target, DEFAULT_TOLERANCE)) {
                self.add_warning(
                    &path,
                    &format!(
                        "phase '{}' targets the same value as its predecessor and completes on entry",
                        phase.name
                    ),
                );
            }
        }
    }

    // ========================================================================
    // Reachability
    // ========================================================================

    fn validate_reachability(&mut self, config: &EnvelopeConfig) {
        let index: HashMap<&str, usize> = config
            .phases
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.as_str(), i))
            .collect();
        let Some(start) = config.start_phase().and_then(|s| index.get(s).copied()) else {
            return;
        };

        let mut reached = vec![false; config.phases.len()];
        let mut queue: VecDeque<usize> = VecDeque::from([start]);
        queue.extend(
            config
                .interrupts
                .values()
                .flatten()
                .filter_map(|t| index.get(t.as_str()).copied()),
        );
        while let Some(i) = queue.pop_front() {
            if std::mem::replace(&mut reached[i], true) {
                continue;
            }
            let phase = &config.phases[i];
            queue.extend(
                phase
                    .next
                    .iter()
                    .chain(phase.triggers.values().flatten())
                    .filter_map(|t| index.get(t.as_str()).copied()),
            );
        }

        for (idx, phase) in config.phases.iter().enumerate() {
            if !reached[idx] {
                self.add_warning(
                    &format!("phases[{idx}]"),
                    &format!("phase '{}' is unreachable from the start phase", phase.name),
                );
            }
        }

        // Follow `next` from the start; a loop without a held phase never ends.
        let mut visited = vec![false; config.phases.len()];
        let mut current = Some(start);
        while let Some(i) = current {
            let phase = &config.phases[i];
            if matches!(
                phase.completion,
                CompletionConfig::External | CompletionConfig::Indefinite
            ) {
                return;
            }
            if std::mem::replace(&mut visited[i], true) {
                self.add_warning(
                    &format!("phases[{i}].next"),
                    &format!(
                        "phase '{}' starts a cycle with no external or indefinite phase; the envelope never returns to idle",
                        phase.name
                    ),
                );
                return;
            }
            current = phase.next.as_deref().and_then(|n| index.get(n).copied());
        }
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    /// Adds an error to the collection.
    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    /// Adds a warning to the collection.
    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ConfigLimits {
        ConfigLimits {
            max_phases: 8,
            max_formula_length: 64,
            max_variables: 4,
            max_config_size: 1024 * 1024,
        }
    }

    fn parse(yaml: &str) -> EnvelopeConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn validate(config: &EnvelopeConfig) -> ValidationResult {
        Validator::new().validate(config, &limits())
    }

    fn adsr() -> EnvelopeConfig {
        parse(
            r#"
phases:
  - name: attack
    formula: "10*X"
    completion: { kind: target, value: 10 }
    next: decay
  - name: decay
    formula: "-2*X"
    completion: { kind: target, value: 4 }
    next: sustain
  - name: sustain
    completion: { kind: external }
    next: release
  - name: release
    formula: "-1*X"
    completion: { kind: target, value: 0 }
interrupts:
  attack: attack
  release: release
"#,
        )
    }

    fn has_error(result: &ValidationResult, path: &str) -> bool {
        result.errors.iter().any(|e| e.path == path)
    }

    fn has_warning(result: &ValidationResult, path: &str) -> bool {
        result.warnings.iter().any(|e| e.path == path)
    }

    #[test]
    fn test_valid_adsr() {
        let result = validate(&adsr());
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_empty_phase_list() {
        let config = parse("phases: []");
        let result = validate(&config);
        assert!(has_error(&result, "phases"));
    }

    #[test]
    fn test_duplicate_and_empty_names() {
        let mut config = adsr();
        config.phases[1].name = "attack".to_string();
        config.phases[2].name = String::new();
        let result = validate(&config);
        assert!(has_error(&result, "phases[1].name"));
        assert!(has_error(&result, "phases[2].name"));
    }

    #[test]
    fn test_unknown_reference_suggests() {
        let mut config = adsr();
        config.phases[0].next = Some("decy".to_string());
        config.envelope.start = Some("atack".to_string());
        let result = validate(&config);
        let issue = result
            .errors
            .iter()
            .find(|e| e.path == "phases[0].next")
            .unwrap();
        assert!(issue.message.contains("did you mean 'decay'"));
        assert!(has_error(&result, "envelope.start"));
    }

    #[test]
    fn test_bad_completion_values() {
        let mut config = adsr();
        config.phases[0].completion = CompletionConfig::Target {
            value: f64::INFINITY,
            tolerance: Some(0.0),
        };
        config.phases[1].completion = CompletionConfig::Duration { value: -1.0 };
        let result = validate(&config);
        assert!(has_error(&result, "phases[0].completion.value"));
        assert!(has_error(&result, "phases[0].completion.tolerance"));
        assert!(has_error(&result, "phases[1].completion.value"));
    }

    #[test]
    fn test_formula_syntax_error() {
        let mut config = adsr();
        config.phases[0].formula = Some("10 * (X".to_string());
        config.phases[1].formula = Some("SQR(X)".to_string());
        let result = validate(&config);
        assert!(has_error(&result, "phases[0].formula"));
        let issue = result
            .errors
            .iter()
            .find(|e| e.path == "phases[1].formula")
            .unwrap();
        assert!(issue.message.contains("SQRT"));
    }

    #[test]
    fn test_formula_too_long() {
        let mut config = adsr();
        config.phases[0].formula = Some("X + ".repeat(40) + "X");
        let result = validate(&config);
        assert!(has_error(&result, "phases[0].formula"));
    }

    #[test]
    fn test_reserved_and_invalid_names() {
        let mut config = adsr();
        config.envelope.parameter = "PI".to_string();
        config.envelope.variables.insert("1st".to_string(), 1.0);
        config.envelope.variables.insert("max".to_string(), 1.0);
        let result = validate(&config);
        assert!(has_error(&result, "envelope.parameter"));
        assert!(has_error(&result, "envelope.variables.1st"));
        assert!(has_error(&result, "envelope.variables.max"));
        // Formulas are not compiled against a broken scope.
        assert!(!has_error(&result, "phases[0].formula"));
    }

    #[test]
    fn test_variable_collisions() {
        let mut config = adsr();
        config.envelope.variables.insert("x".to_string(), 1.0);
        config.envelope.variables.insert("Peak".to_string(), 1.0);
        config.envelope.variables.insert("PEAK".to_string(), 2.0);
        let result = validate(&config);
        assert!(has_error(&result, "envelope.variables.x"));
        assert!(has_error(&result, "envelope.variables.PEAK"));
    }

    #[test]
    fn test_variables_usable_in_formulas() {
        let mut config = adsr();
        config.envelope.variables.insert("PEAK".to_string(), 10.0);
        config.phases[0].formula = Some("PEAK * X".to_string());
        let result = validate(&config);
        assert!(result.is_valid(), "{:?}", result.errors);
    }

    #[test]
    fn test_too_many_phases() {
        let mut config = adsr();
        let extra = config.phases[3].clone();
        for i in 0..8 {
            let mut phase = extra.clone();
            phase.name = format!("extra{i}");
            config.phases.push(phase);
        }
        let result = validate(&config);
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.message.contains("too many phases"))
        );
    }

    #[test]
    fn test_name_patterns() {
        assert!(is_identifier("PEAK"));
        assert!(is_identifier("_t2"));
        assert!(!is_identifier("2x"));
        assert!(!is_identifier("a-b"));
        assert!(EVENT_NAME.is_match("note_on"));
        assert!(!EVENT_NAME.is_match("note on"));
    }

    #[test]
    fn test_invalid_event_names() {
        let mut config = adsr();
        config
            .interrupts
            .insert("note on".to_string(), Some("attack".to_string()));
        config.phases[2]
            .triggers
            .insert("stop@1".to_string(), None);
        let result = validate(&config);
        assert!(has_error(&result, "interrupts.note on"));
        assert!(has_error(&result, "phases[2].triggers.stop@1"));
    }

    #[test]
    fn test_equal_adjacent_targets_warn() {
        let mut config = adsr();
        config.phases[1].completion = CompletionConfig::Target {
            value: 10.0,
            tolerance: None,
        };
        let result = validate(&config);
        assert!(result.is_valid());
        assert!(has_warning(&result, "phases[1].completion.value"));
    }

    #[test]
    fn test_target_below_default_warns() {
        let mut config = adsr();
        config.envelope.default_value = 1.0;
        let result = validate(&config);
        assert!(has_warning(&result, "phases[3].completion.value"));
    }

    #[test]
    fn test_unreachable_phase_warns() {
        let mut config = adsr();
        config.interrupts.clear();
        config.phases[2].next = None;
        let result = validate(&config);
        assert!(has_warning(&result, "phases[3]"));
        assert!(!has_warning(&result, "phases[2]"));
    }

    #[test]
    fn test_interrupt_targets_count_as_reachable() {
        let mut config = adsr();
        config.phases[2].next = None;
        let result = validate(&config);
        assert!(!has_warning(&result, "phases[3]"));
    }

    #[test]
    fn test_endless_cycle_warns() {
        let config = parse(
            r#"
phases:
  - name: up
    formula: "X"
    completion: { kind: target, value: 1 }
    next: down
  - name: down
    formula: "-X"
    completion: { kind: target, value: 0 }
    next: up
"#,
        );
        let result = validate(&config);
        assert!(result.is_valid());
        assert!(has_warning(&result, "phases[0].next"));
    }

    #[test]
    fn test_cycle_through_external_phase_is_fine() {
        let mut config = adsr();
        config.phases[3].next = Some("attack".to_string());
        let result = validate(&config);
        assert!(!result.warnings.iter().any(|w| w.message.contains("cycle")));
    }

    #[test]
    fn test_constant_formula_warns() {
        let mut config = adsr();
        config.phases[0].formula = Some("3".to_string());
        let result = validate(&config);
        assert!(has_warning(&result, "phases[0].formula"));

        config.phases[0].formula = Some("10".to_string());
        let result = validate(&config);
        assert!(!has_warning(&result, "phases[0].formula"));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = adsr();
        config.phases[0].name = String::new();
        config.phases[1].next = Some("nowhere".to_string());
        config.phases[2].formula = Some("X +".to_string());
        config.envelope.default_value = f64::NAN;
        let result = validate(&config);
        assert!(result.errors.len() >= 4);
        assert_eq!(result.issues().count(), result.errors.len() + result.warnings.len());
    }
}
