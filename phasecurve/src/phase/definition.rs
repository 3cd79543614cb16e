//! Phase definitions and completion policies.

use std::fmt;

use serde::Serialize;

use super::trigger::TriggerMap;
use crate::error::FormulaError;
use crate::formula::FormulaEvaluator;

/// Relative tolerance for target and duration completion.
///
/// Also used as the absolute tolerance when both sides are close to zero.
pub const DEFAULT_TOLERANCE: f64 = 1e-5;

/// Index of a phase in its envelope's ordered phase list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PhaseId(pub usize);

impl PhaseId {
    /// Position in the phase list.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// When a phase ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompletionPolicy {
    /// Ends when the envelope value reaches or crosses `value`.
    Target {
        /// Target value; the envelope lands on it exactly
        value: f64,
        /// Relative tolerance for the "arrived" test
        tolerance: f64,
    },
    /// Ends when phase-elapsed time reaches or crosses `seconds`.
    Duration {
        /// Phase length
        seconds: f64,
    },
    /// Ends only on a trigger event.
    External,
    /// Never ends on its own.
    Indefinite,
}

impl CompletionPolicy {
    /// Target policy with [`DEFAULT_TOLERANCE`].
    #[must_use]
    pub const fn target(value: f64) -> Self {
        Self::Target {
            value,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Duration policy.
    #[must_use]
    pub const fn duration(seconds: f64) -> Self {
        Self::Duration { seconds }
    }

    /// Short lowercase name of the policy.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Target { .. } => "target",
            Self::Duration { .. } => "duration",
            Self::External => "external",
            Self::Indefinite => "indefinite",
        }
    }
}

/// One segment of an envelope.
///
/// Immutable once the envelope is built. `X` is the evaluator's compiled
/// expression type.
#[derive(Debug, Clone)]
pub struct PhaseDefinition<X> {
    name: String,
    formula: Option<String>,
    expression: Option<X>,
    completion: CompletionPolicy,
    next: Option<PhaseId>,
    triggers: TriggerMap,
}

impl<X> PhaseDefinition<X> {
    /// Creates a formula-less phase that returns to idle when it completes.
    #[must_use]
    pub fn new(name: impl Into<String>, completion: CompletionPolicy) -> Self {
        Self {
            name: name.into(),
            formula: None,
            expression: None,
            completion,
            next: None,
            triggers: TriggerMap::default(),
        }
    }

    /// Compiles `formula` with `evaluator` and attaches it.
    ///
    /// # Errors
    ///
    /// Returns the evaluator's compile error.
    pub fn with_formula<E>(mut self, evaluator: &E, formula: impl Into<String>) -> Result<Self, FormulaError>
    where
        E: FormulaEvaluator<Expression = X>,
    {
        let formula = formula.into();
        self.expression = Some(evaluator.compile(&formula)?);
        self.formula = Some(formula);
        Ok(self)
    }

    /// Sets the successor phase.
    #[must_use]
    pub const fn with_next(mut self, next: PhaseId) -> Self {
        self.next = Some(next);
        self
    }

    /// Binds `event` to `target` while this phase is active.
    ///
    /// A `None` target deactivates the envelope.
    #[must_use]
    pub fn with_trigger(mut self, event: impl Into<String>, target: Option<PhaseId>) -> Self {
        self.triggers.insert(event, target);
        self
    }

    /// Phase name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Formula source text, if any.
    #[must_use]
    pub fn formula(&self) -> Option<&str> {
        self.formula.as_deref()
    }

    /// Compiled formula, if any.
    #[must_use]
    pub const fn expression(&self) -> Option<&X> {
        self.expression.as_ref()
    }

    /// Completion policy.
    #[must_use]
    pub const fn completion(&self) -> CompletionPolicy {
        self.completion
    }

    /// Successor phase; `None` returns the envelope to idle.
    #[must_use]
    pub const fn next(&self) -> Option<PhaseId> {
        self.next
    }

    /// Per-phase trigger bindings.
    #[must_use]
    pub const fn triggers(&self) -> &TriggerMap {
        &self.triggers
    }
}
