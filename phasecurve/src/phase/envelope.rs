//! The phase envelope state machine.
//!
//! A [`PhaseEnvelope`] tracks one scalar through an ordered list of phases.
//! Each phase's formula produces a delta on top of the value the envelope
//! had when the phase was entered, so the value is continuous across phase
//! boundaries. The driver advances the envelope with [`PhaseEnvelope::tick`]
//! and feeds input through [`PhaseEnvelope::trigger`]; every state-changing
//! call returns the transitions it caused.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::completion::CrossingDetector;
use super::definition::{CompletionPolicy, DEFAULT_TOLERANCE, PhaseDefinition, PhaseId};
use super::trigger::{self, TriggerMap, TriggerSource};
use crate::error::EnvelopeError;
use crate::formula::{Calculator, FormulaEvaluator};
use crate::observability::metrics;

/// Why a transition happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionCause {
    /// The envelope was started explicitly
    Activated,
    /// The value reached or crossed the phase target
    TargetHit {
        /// Target the value was clamped to
        target: f64,
    },
    /// Phase-elapsed time reached or crossed the phase duration
    DurationElapsed {
        /// Configured phase length
        seconds: f64,
    },
    /// A trigger event pre-empted the phase
    Triggered {
        /// Event name
        event: String,
        /// Binding that matched
        source: TriggerSource,
    },
    /// The active phase was released to its successor by the driver
    Released,
    /// The envelope was stopped explicitly
    Deactivated,
}

impl TransitionCause {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Activated => "activated",
            Self::TargetHit { .. } => "target_hit",
            Self::DurationElapsed { .. } => "duration_elapsed",
            Self::Triggered { .. } => "triggered",
            Self::Released => "released",
            Self::Deactivated => "deactivated",
        }
    }
}

/// Record of one phase change.
///
/// `value` and the elapsed times are those observed at the moment the
/// `from` phase was left.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseTransition {
    /// Phase left (`None` when starting from idle)
    pub from: Option<PhaseId>,
    /// Phase entered (`None` when returning to idle)
    pub to: Option<PhaseId>,
    /// Why the transition happened
    pub cause: TransitionCause,
    /// Envelope value at the transition
    pub value: f64,
    /// Time spent in the `from` phase
    pub phase_elapsed: f64,
    /// Time since activation
    pub total_elapsed: f64,
}

/// Result of a [`PhaseEnvelope::tick`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    /// Envelope value after the tick
    pub value: f64,
    /// Transitions caused by the tick, in order
    pub transitions: Vec<PhaseTransition>,
}

/// Result of a [`PhaseEnvelope::trigger`].
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// The event matched a binding
    Transitioned(Vec<PhaseTransition>),
    /// Nothing was bound to the event in the current state
    Ignored,
}

impl TriggerOutcome {
    /// Transitions caused by the event (empty when ignored).
    #[must_use]
    pub fn transitions(&self) -> &[PhaseTransition] {
        match self {
            Self::Transitioned(transitions) => transitions,
            Self::Ignored => &[],
        }
    }
}

/// State that only exists while the envelope is active.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Running {
    phase: PhaseId,
    phase_elapsed: f64,
    total_elapsed: f64,
    /// Value the current phase was entered with.
    origin: f64,
    /// Absolute envelope value.
    value: f64,
    detector: CrossingDetector,
    below_default_reported: bool,
}

/// Formula-driven phase state machine.
///
/// Single-owner: every mutating method takes `&mut self`. Cloning gives an
/// independent envelope with the same configuration and state.
#[derive(Debug, Clone)]
pub struct PhaseEnvelope<E: FormulaEvaluator = Calculator> {
    name: Option<String>,
    evaluator: E,
    phases: Vec<PhaseDefinition<E::Expression>>,
    interrupts: TriggerMap,
    start: PhaseId,
    default_value: f64,
    state: Option<Running>,
}

impl<E: FormulaEvaluator> PhaseEnvelope<E> {
    /// Creates an idle envelope starting in the first phase.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::NoPhases`] for an empty list and
    /// [`EnvelopeError::UnknownPhase`] when a successor or trigger target
    /// is out of range.
    pub fn new(
        evaluator: E,
        phases: Vec<PhaseDefinition<E::Expression>>,
        default_value: f64,
    ) -> Result<Self, EnvelopeError> {
        if phases.is_empty() {
            return Err(EnvelopeError::NoPhases);
        }
        let count = phases.len();
        for phase in &phases {
            let targets = phase
                .next()
                .into_iter()
                .chain(phase.triggers().iter().filter_map(|(_, t)| t));
            for target in targets {
                check_range(target, count)?;
            }
        }
        Ok(Self {
            name: None,
            evaluator,
            phases,
            interrupts: TriggerMap::default(),
            start: PhaseId(0),
            default_value,
            state: None,
        })
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the phase entered by [`PhaseEnvelope::start`].
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::UnknownPhase`] if `start` is out of range.
    pub fn with_start(mut self, start: PhaseId) -> Result<Self, EnvelopeError> {
        check_range(start, self.phases.len())?;
        self.start = start;
        Ok(self)
    }

    /// Adds a global interrupt checked in every phase and while idle.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::UnknownPhase`] if `target` is out of range.
    pub fn with_interrupt(
        mut self,
        event: impl Into<String>,
        target: Option<PhaseId>,
    ) -> Result<Self, EnvelopeError> {
        if let Some(target) = target {
            check_range(target, self.phases.len())?;
        }
        self.interrupts.insert(event, target);
        Ok(self)
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Current value: `previous_phase_value + current_phase_value`.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.state.map_or(self.default_value, |run| run.value)
    }

    /// Active phase, `None` while idle.
    #[must_use]
    pub fn phase(&self) -> Option<PhaseId> {
        self.state.map(|run| run.phase)
    }

    /// Name of the active phase.
    #[must_use]
    pub fn phase_name(&self) -> Option<&str> {
        self.phase().map(|id| self.phases[id.index()].name())
    }

    /// Time spent in the active phase.
    #[must_use]
    pub fn phase_elapsed(&self) -> f64 {
        self.state.map_or(0.0, |run| run.phase_elapsed)
    }

    /// Time since activation.
    #[must_use]
    pub fn total_elapsed(&self) -> f64 {
        self.state.map_or(0.0, |run| run.total_elapsed)
    }

    /// Whether the envelope is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Value carried over from earlier phases.
    #[must_use]
    pub fn previous_phase_value(&self) -> f64 {
        self.state.map_or(self.default_value, |run| run.origin)
    }

    /// Contribution of the active phase.
    #[must_use]
    pub fn current_phase_value(&self) -> f64 {
        self.state.map_or(0.0, |run| run.value - run.origin)
    }

    /// Value reported while idle.
    #[must_use]
    pub const fn default_value(&self) -> f64 {
        self.default_value
    }

    /// Display name, if configured.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Phase definitions in order.
    #[must_use]
    pub fn phases(&self) -> &[PhaseDefinition<E::Expression>] {
        &self.phases
    }

    /// Looks up a phase by name.
    #[must_use]
    pub fn phase_id(&self, name: &str) -> Option<PhaseId> {
        self.phases
            .iter()
            .position(|p| p.name() == name)
            .map(PhaseId)
    }

    /// Name of `id`, or `"<idle>"` for `None`.
    #[must_use]
    pub fn phase_label(&self, id: Option<PhaseId>) -> &str {
        id.and_then(|id| self.phases.get(id.index()))
            .map_or("<idle>", PhaseDefinition::name)
    }

    /// Phase entered by [`PhaseEnvelope::start`].
    #[must_use]
    pub const fn start_phase(&self) -> PhaseId {
        self.start
    }

    /// Global interrupts.
    #[must_use]
    pub const fn interrupts(&self) -> &TriggerMap {
        &self.interrupts
    }

    /// The envelope's formula evaluator.
    #[must_use]
    pub const fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Mutable access to the evaluator, e.g. to reassign variables.
    pub const fn evaluator_mut(&mut self) -> &mut E {
        &mut self.evaluator
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Activates the envelope in the configured start phase.
    ///
    /// # Errors
    ///
    /// See [`PhaseEnvelope::activate`].
    pub fn start(&mut self) -> Result<Vec<PhaseTransition>, EnvelopeError> {
        self.activate(self.start)
    }

    /// Activates the envelope in `start`.
    ///
    /// Times reset to zero and the value to the default. The entry phase is
    /// checked for completion immediately, so zero-length phases cascade.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::AlreadyActive`] if the envelope is running,
    /// [`EnvelopeError::UnknownPhase`] for an out-of-range phase, or
    /// [`EnvelopeError::CascadeLimit`] if zero-length phases form a cycle.
    pub fn activate(&mut self, start: PhaseId) -> Result<Vec<PhaseTransition>, EnvelopeError> {
        if let Some(run) = self.state {
            return Err(EnvelopeError::AlreadyActive {
                phase: self.phases[run.phase.index()].name().to_string(),
            });
        }
        check_range(start, self.phases.len())?;
        self.atomically(|env, transitions| env.enter_from_idle(start, TransitionCause::Activated, transitions))
    }

    /// Returns the envelope to idle.
    ///
    /// Idempotent: on an idle envelope this does nothing and returns `None`.
    pub fn deactivate(&mut self) -> Option<PhaseTransition> {
        if self.state.is_none() {
            return None;
        }
        let mut transitions = Vec::with_capacity(1);
        self.leave(None, TransitionCause::Deactivated, &mut transitions);
        transitions.pop()
    }

    /// Moves the active phase on to its successor, or to idle without one.
    ///
    /// This is the driver-side gate release for `External` phases; it works
    /// for any phase and bypasses trigger bindings.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::NotActive`] while idle and
    /// [`EnvelopeError::CascadeLimit`] if the resulting cascade cycles.
    pub fn release(&mut self) -> Result<Vec<PhaseTransition>, EnvelopeError> {
        let phase = self.phase().ok_or(EnvelopeError::NotActive)?;
        let next = self.phases[phase.index()].next();
        self.atomically(|env, transitions| env.transition(next, TransitionCause::Released, transitions))
    }

    /// Advances the envelope by `dt` seconds.
    ///
    /// Evaluates the active phase's formula at the new phase-elapsed time,
    /// checks completion and performs any resulting transitions, including
    /// cascades through zero-length phases. Idle envelopes are unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidStep`] for a negative or non-finite
    /// `dt`, [`EnvelopeError::Evaluation`] when the formula fails, and
    /// [`EnvelopeError::CascadeLimit`] for a cycle of zero-length phases.
    /// The envelope is unchanged when an error is returned.
    pub fn tick(&mut self, dt: f64) -> Result<TickOutcome, EnvelopeError> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(EnvelopeError::InvalidStep { dt });
        }
        let Some(before) = self.state else {
            return Ok(TickOutcome {
                value: self.default_value,
                transitions: Vec::new(),
            });
        };

        let phase = &self.phases[before.phase.index()];
        let phase_elapsed = before.phase_elapsed + dt;
        let value = match phase.expression() {
            Some(expression) => {
                let delta = self
                    .evaluator
                    .evaluate(expression, phase_elapsed)
                    .map_err(|source| {
                        metrics::record_evaluation_error(phase.name());
                        EnvelopeError::Evaluation {
                            phase: phase.name().to_string(),
                            source,
                        }
                    })?;
                before.origin + delta
            }
            None => before.value,
        };

        let transitions = self.atomically(|env, transitions| {
            let mut run = before;
            run.phase_elapsed = phase_elapsed;
            run.total_elapsed = before.total_elapsed + dt;
            run.value = value;
            let cause = env.check_completion(&mut run);
            env.report_below_default(&mut run);
            env.state = Some(run);
            if let Some(cause) = cause {
                let next = env.phases[run.phase.index()].next();
                env.transition(next, cause, transitions)?;
            }
            Ok(())
        })?;

        let value = self.value();
        metrics::record_tick(value);
        Ok(TickOutcome { value, transitions })
    }

    /// Delivers a named input event.
    ///
    /// A matching binding transitions immediately, pre-empting natural
    /// completion. While idle only global interrupts apply; one that
    /// targets a phase activates the envelope there.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::CascadeLimit`] if the resulting cascade
    /// cycles. The envelope is unchanged when an error is returned.
    pub fn trigger(&mut self, event: &str) -> Result<TriggerOutcome, EnvelopeError> {
        let current = self.phase();
        let Some(matched) = trigger::resolve(event, &self.phases, current, &self.interrupts) else {
            debug!(event, phase = self.phase_label(current), "trigger ignored");
            metrics::record_trigger(false);
            return Ok(TriggerOutcome::Ignored);
        };

        let cause = TransitionCause::Triggered {
            event: event.to_string(),
            source: matched.source,
        };
        let transitions = match (current, matched.target) {
            (None, None) => {
                debug!(event, "trigger targets idle while already idle");
                metrics::record_trigger(false);
                return Ok(TriggerOutcome::Ignored);
            }
            (None, Some(target)) => {
                self.atomically(|env, transitions| env.enter_from_idle(target, cause, transitions))?
            }
            (Some(_), target) => {
                self.atomically(|env, transitions| env.transition(target, cause, transitions))?
            }
        };
        metrics::record_trigger(true);
        Ok(TriggerOutcome::Transitioned(transitions))
    }

    /// Forces the envelope value to exactly `value`.
    ///
    /// Adjusts the active phase's contribution so that
    /// `previous_phase_value + current_phase_value == value`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::NotActive`] while idle.
    pub fn set_value_exact(&mut self, value: f64) -> Result<(), EnvelopeError> {
        let phase = self.phase().ok_or(EnvelopeError::NotActive)?;
        let completion = self.phases[phase.index()].completion();
        if let Some(run) = self.state.as_mut() {
            run.value = value;
            // A manual jump must not read as a crossing on the next tick.
            if matches!(completion, CompletionPolicy::Target { .. }) {
                run.detector = CrossingDetector::new(value);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Runs `f`, restoring the previous state if it fails.
    fn atomically<F>(&mut self, f: F) -> Result<Vec<PhaseTransition>, EnvelopeError>
    where
        F: FnOnce(&mut Self, &mut Vec<PhaseTransition>) -> Result<(), EnvelopeError>,
    {
        let snapshot = self.state;
        let mut transitions = Vec::new();
        match f(self, &mut transitions) {
            Ok(()) => Ok(transitions),
            Err(e) => {
                self.state = snapshot;
                Err(e)
            }
        }
    }

    fn enter_from_idle(
        &mut self,
        start: PhaseId,
        cause: TransitionCause,
        transitions: &mut Vec<PhaseTransition>,
    ) -> Result<(), EnvelopeError> {
        info!(
            envelope = self.name.as_deref().unwrap_or(""),
            phase = self.phases[start.index()].name(),
            "envelope activated"
        );
        self.record(
            PhaseTransition {
                from: None,
                to: Some(start),
                cause,
                value: self.default_value,
                phase_elapsed: 0.0,
                total_elapsed: 0.0,
            },
            transitions,
        );
        self.state = Some(self.entry_state(start, self.default_value, 0.0));
        self.cascade(transitions)
    }

    /// Leaves the active phase for `target` and settles any cascade.
    fn transition(
        &mut self,
        target: Option<PhaseId>,
        cause: TransitionCause,
        transitions: &mut Vec<PhaseTransition>,
    ) -> Result<(), EnvelopeError> {
        self.leave(target, cause, transitions);
        self.cascade(transitions)
    }

    /// Leaves the active phase without checking the new one.
    fn leave(
        &mut self,
        target: Option<PhaseId>,
        cause: TransitionCause,
        transitions: &mut Vec<PhaseTransition>,
    ) {
        let Some(run) = self.state else {
            return;
        };
        self.record(
            PhaseTransition {
                from: Some(run.phase),
                to: target,
                cause,
                value: run.value,
                phase_elapsed: run.phase_elapsed,
                total_elapsed: run.total_elapsed,
            },
            transitions,
        );
        self.state = target.map(|next| self.entry_state(next, run.value, run.total_elapsed));
    }

    /// Completes zero-length phases until the envelope is stable.
    fn cascade(&mut self, transitions: &mut Vec<PhaseTransition>) -> Result<(), EnvelopeError> {
        let limit = self.phases.len();
        let origin = self.phase();
        let mut steps = 0;
        while let Some(mut run) = self.state {
            let Some(cause) = self.check_completion(&mut run) else {
                break;
            };
            steps += 1;
            if steps > limit {
                return Err(EnvelopeError::CascadeLimit {
                    phase: self.phase_label(origin).to_string(),
                    limit,
                });
            }
            debug!(
                phase = self.phases[run.phase.index()].name(),
                "phase completed on entry"
            );
            self.state = Some(run);
            let next = self.phases[run.phase.index()].next();
            self.leave(next, cause, transitions);
        }
        Ok(())
    }

    fn entry_state(&self, phase: PhaseId, value: f64, total_elapsed: f64) -> Running {
        let entry = match self.phases[phase.index()].completion() {
            CompletionPolicy::Duration { .. } => 0.0,
            _ => value,
        };
        Running {
            phase,
            phase_elapsed: 0.0,
            total_elapsed,
            origin: value,
            value,
            detector: CrossingDetector::new(entry),
            below_default_reported: false,
        }
    }

    /// Applies the completion policy to `run`, clamping target hits.
    fn check_completion(&self, run: &mut Running) -> Option<TransitionCause> {
        match self.phases[run.phase.index()].completion() {
            CompletionPolicy::Target { value, tolerance } => {
                if run.detector.observe(run.value, value, tolerance) {
                    run.value = value;
                    return Some(TransitionCause::TargetHit { target: value });
                }
                None
            }
            CompletionPolicy::Duration { seconds } => {
                if run
                    .detector
                    .observe(run.phase_elapsed, seconds, DEFAULT_TOLERANCE)
                {
                    return Some(TransitionCause::DurationElapsed { seconds });
                }
                None
            }
            CompletionPolicy::External | CompletionPolicy::Indefinite => None,
        }
    }

    fn report_below_default(&self, run: &mut Running) {
        if run.value < self.default_value && !run.below_default_reported {
            run.below_default_reported = true;
            let phase = self.phases[run.phase.index()].name();
            warn!(
                phase,
                value = run.value,
                default_value = self.default_value,
                "envelope value dropped below the default value"
            );
            metrics::record_below_default(phase);
        }
    }

    fn record(&self, transition: PhaseTransition, transitions: &mut Vec<PhaseTransition>) {
        let from = transition.from.map(|id| self.phases[id.index()].name());
        let to = transition.to.map(|id| self.phases[id.index()].name());
        info!(
            from = from.unwrap_or("<idle>"),
            to = to.unwrap_or("<idle>"),
            cause = transition.cause.label(),
            value = transition.value,
            total_elapsed = transition.total_elapsed,
            "phase transition"
        );
        metrics::record_phase_transition(from, to, transition.cause.label());
        metrics::set_active_phase(to, from);
        transitions.push(transition);
    }
}

fn check_range(id: PhaseId, count: usize) -> Result<(), EnvelopeError> {
    if id.index() < count {
        Ok(())
    } else {
        Err(EnvelopeError::UnknownPhase {
            name: id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormulaError;

    fn calc() -> Calculator {
        Calculator::default()
    }

    fn phase(name: &str, formula: Option<&str>, completion: CompletionPolicy) -> PhaseDefinition<crate::formula::Expr> {
        let def = PhaseDefinition::new(name, completion);
        match formula {
            Some(text) => def.with_formula(&calc(), text).unwrap(),
            None => def,
        }
    }

    /// attack(10*X → 10) → decay(-2*X → 4) → sustain(external) → release(-1*X → 0)
    fn adsr() -> PhaseEnvelope {
        let phases = vec![
            phase("attack", Some("10*X"), CompletionPolicy::target(10.0)).with_next(PhaseId(1)),
            phase("decay", Some("-2*X"), CompletionPolicy::target(4.0)).with_next(PhaseId(2)),
            phase("sustain", None, CompletionPolicy::External).with_next(PhaseId(3)),
            phase("release", Some("-1*X"), CompletionPolicy::target(0.0)),
        ];
        PhaseEnvelope::new(calc(), phases, 0.0)
            .unwrap()
            .with_interrupt("release", Some(PhaseId(3)))
            .unwrap()
            .with_interrupt("attack", Some(PhaseId(0)))
            .unwrap()
    }

    #[test]
    fn test_new_rejects_empty_and_out_of_range() {
        assert_eq!(
            PhaseEnvelope::new(calc(), Vec::new(), 0.0).unwrap_err(),
            EnvelopeError::NoPhases
        );
        let phases = vec![phase("a", None, CompletionPolicy::Indefinite).with_next(PhaseId(4))];
        assert!(matches!(
            PhaseEnvelope::new(calc(), phases, 0.0),
            Err(EnvelopeError::UnknownPhase { .. })
        ));
        let phases = vec![phase("a", None, CompletionPolicy::Indefinite)];
        let env = PhaseEnvelope::new(calc(), phases, 0.0).unwrap();
        assert!(env.clone().with_start(PhaseId(1)).is_err());
        assert!(env.with_interrupt("go", Some(PhaseId(2))).is_err());
    }

    #[test]
    fn test_idle_observers() {
        let env = adsr();
        assert!(!env.is_active());
        assert_eq!(env.phase(), None);
        assert_eq!(env.phase_name(), None);
        assert_eq!(env.value(), 0.0);
        assert_eq!(env.phase_elapsed(), 0.0);
        assert_eq!(env.total_elapsed(), 0.0);
        assert_eq!(env.previous_phase_value(), 0.0);
        assert_eq!(env.current_phase_value(), 0.0);
        assert_eq!(env.phase_id("decay"), Some(PhaseId(1)));
        assert_eq!(env.phase_label(None), "<idle>");
    }

    #[test]
    fn test_activate_resets_and_records() {
        let mut env = adsr();
        let transitions = env.activate(PhaseId(0)).unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from, None);
        assert_eq!(transitions[0].to, Some(PhaseId(0)));
        assert_eq!(transitions[0].cause, TransitionCause::Activated);
        assert!(env.is_active());
        assert_eq!(env.phase_name(), Some("attack"));
        assert_eq!(env.value(), 0.0);
    }

    #[test]
    fn test_activate_while_active_fails() {
        let mut env = adsr();
        env.start().unwrap();
        assert_eq!(
            env.activate(PhaseId(1)).unwrap_err(),
            EnvelopeError::AlreadyActive {
                phase: "attack".to_string()
            }
        );
        assert_eq!(env.phase(), Some(PhaseId(0)));
    }

    #[test]
    fn test_tick_accumulates_relative_to_phase_origin() {
        let mut env = adsr();
        env.start().unwrap();
        let outcome = env.tick(0.5).unwrap();
        assert_eq!(outcome.value, 5.0);
        assert!(outcome.transitions.is_empty());
        assert_eq!(env.previous_phase_value(), 0.0);
        assert_eq!(env.current_phase_value(), 5.0);
        assert_eq!(env.phase_elapsed(), 0.5);
        assert_eq!(env.total_elapsed(), 0.5);
    }

    #[test]
    fn test_target_hit_transitions_and_carries_value() {
        let mut env = adsr();
        env.start().unwrap();
        let outcome = env.tick(1.0).unwrap();
        assert_eq!(outcome.value, 10.0);
        assert_eq!(outcome.transitions.len(), 1);
        assert_eq!(
            outcome.transitions[0].cause,
            TransitionCause::TargetHit { target: 10.0 }
        );
        assert_eq!(env.phase_name(), Some("decay"));
        assert_eq!(env.previous_phase_value(), 10.0);
        assert_eq!(env.current_phase_value(), 0.0);
        assert_eq!(env.phase_elapsed(), 0.0);
        assert_eq!(env.total_elapsed(), 1.0);
    }

    #[test]
    fn test_target_hit_is_exact() {
        let phases = vec![
            phase("rise", Some("5 + 1e-7"), CompletionPolicy::target(5.0)).with_next(PhaseId(1)),
            phase("hold", None, CompletionPolicy::Indefinite),
        ];
        let mut env = PhaseEnvelope::new(calc(), phases, 0.0).unwrap();
        env.start().unwrap();
        let outcome = env.tick(0.1).unwrap();
        assert_eq!(outcome.value, 5.0);
        assert_eq!(env.value().to_bits(), 5.0f64.to_bits());
        assert_eq!(env.phase_name(), Some("hold"));
    }

    #[test]
    fn test_overshoot_detected_on_crossing_tick() {
        // 4.0 after the first tick, 6.0 after the second.
        let phases = vec![
            phase("jump", Some("IF(X < 1.5, 4, 6)"), CompletionPolicy::target(5.0))
                .with_next(PhaseId(1)),
            phase("hold", None, CompletionPolicy::Indefinite),
        ];
        let mut env = PhaseEnvelope::new(calc(), phases, 0.0).unwrap();
        env.start().unwrap();
        assert!(env.tick(1.0).unwrap().transitions.is_empty());
        assert_eq!(env.value(), 4.0);
        let outcome = env.tick(1.0).unwrap();
        assert_eq!(outcome.transitions.len(), 1);
        assert_eq!(env.value(), 5.0);
        assert_eq!(env.phase_name(), Some("hold"));
    }

    #[test]
    fn test_duration_completion_keeps_value() {
        let phases = vec![
            phase("ramp", Some("3*X"), CompletionPolicy::duration(0.25)).with_next(PhaseId(1)),
            phase("hold", None, CompletionPolicy::Indefinite),
        ];
        let mut env = PhaseEnvelope::new(calc(), phases, 0.0).unwrap();
        env.start().unwrap();
        env.tick(0.2).unwrap();
        let outcome = env.tick(0.2).unwrap();
        assert_eq!(
            outcome.transitions[0].cause,
            TransitionCause::DurationElapsed { seconds: 0.25 }
        );
        // Overshot duration: value is not clamped.
        assert!((env.value() - 1.2).abs() < 1e-12);
        assert_eq!(env.phase_name(), Some("hold"));
    }

    #[test]
    fn test_cascade_skips_zero_length_phase() {
        let phases = vec![
            phase("attack", Some("10*X"), CompletionPolicy::target(5.0)).with_next(PhaseId(1)),
            phase("decay", Some("-X"), CompletionPolicy::target(5.0)).with_next(PhaseId(2)),
            phase("sustain", None, CompletionPolicy::External),
        ];
        let mut env = PhaseEnvelope::new(calc(), phases, 0.0).unwrap();
        env.start().unwrap();
        let outcome = env.tick(0.5).unwrap();
        assert_eq!(outcome.transitions.len(), 2);
        assert_eq!(outcome.transitions[1].from, Some(PhaseId(1)));
        assert_eq!(outcome.transitions[1].phase_elapsed, 0.0);
        assert_eq!(env.phase_name(), Some("sustain"));
        assert_eq!(env.value(), 5.0);
    }

    #[test]
    fn test_zero_length_first_phase_cascades_on_activation() {
        let phases = vec![
            phase("instant", None, CompletionPolicy::duration(0.0)).with_next(PhaseId(1)),
            phase("hold", None, CompletionPolicy::Indefinite),
        ];
        let mut env = PhaseEnvelope::new(calc(), phases, 0.0).unwrap();
        let transitions = env.start().unwrap();
        assert_eq!(transitions.len(), 2);
        assert_eq!(env.phase_name(), Some("hold"));
    }

    #[test]
    fn test_cascade_cycle_is_reported_and_rolled_back() {
        let phases = vec![
            phase("a", None, CompletionPolicy::duration(0.0)).with_next(PhaseId(1)),
            phase("b", None, CompletionPolicy::duration(0.0)).with_next(PhaseId(0)),
        ];
        let mut env = PhaseEnvelope::new(calc(), phases, 0.0).unwrap();
        assert!(matches!(
            env.start(),
            Err(EnvelopeError::CascadeLimit { limit: 2, .. })
        ));
        assert!(!env.is_active());
    }

    #[test]
    fn test_external_phase_never_auto_completes() {
        let mut env = adsr();
        env.start().unwrap();
        env.tick(1.0).unwrap();
        env.tick(3.0).unwrap();
        assert_eq!(env.phase_name(), Some("sustain"));
        for _ in 0..1_000 {
            assert!(env.tick(1.0).unwrap().transitions.is_empty());
        }
        assert_eq!(env.phase_name(), Some("sustain"));
        assert_eq!(env.value(), 4.0);
    }

    #[test]
    fn test_trigger_releases_external_phase() {
        let mut env = adsr();
        env.start().unwrap();
        env.tick(1.0).unwrap();
        env.tick(3.0).unwrap();
        let outcome = env.trigger("release").unwrap();
        assert_eq!(outcome.transitions().len(), 1);
        assert_eq!(env.phase_name(), Some("release"));
        assert_eq!(env.previous_phase_value(), 4.0);
    }

    #[test]
    fn test_interrupt_preempts_any_phase() {
        let mut env = adsr();
        env.start().unwrap();
        env.tick(0.3).unwrap();
        let outcome = env.trigger("release").unwrap();
        let TriggerOutcome::Transitioned(transitions) = outcome else {
            panic!("expected transition");
        };
        assert!(matches!(
            transitions[0].cause,
            TransitionCause::Triggered {
                source: TriggerSource::Interrupt,
                ..
            }
        ));
        assert_eq!(env.phase_name(), Some("release"));
        assert_eq!(env.previous_phase_value(), 3.0);
    }

    #[test]
    fn test_interrupt_activates_idle_envelope() {
        let mut env = adsr();
        let outcome = env.trigger("attack").unwrap();
        assert_eq!(outcome.transitions()[0].from, None);
        assert_eq!(env.phase_name(), Some("attack"));
        assert_eq!(env.value(), 0.0);
    }

    #[test]
    fn test_retrigger_restarts_phase_from_current_value() {
        let mut env = adsr();
        env.start().unwrap();
        env.tick(0.4).unwrap();
        env.trigger("attack").unwrap();
        assert_eq!(env.phase_name(), Some("attack"));
        assert_eq!(env.phase_elapsed(), 0.0);
        assert_eq!(env.previous_phase_value(), 4.0);
        env.tick(0.6).unwrap();
        assert_eq!(env.value(), 10.0);
        assert_eq!(env.phase_name(), Some("decay"));
    }

    #[test]
    fn test_unmatched_trigger_ignored() {
        let mut env = adsr();
        assert_eq!(env.trigger("jump").unwrap(), TriggerOutcome::Ignored);
        // Entering release at its own target completes it on entry.
        assert_eq!(env.trigger("release").unwrap().transitions().len(), 2);
        assert!(!env.is_active());
        env.start().unwrap();
        assert_eq!(env.trigger("sustain").unwrap(), TriggerOutcome::Ignored);
    }

    #[test]
    fn test_release_moves_to_successor() {
        let mut env = adsr();
        assert_eq!(env.release().unwrap_err(), EnvelopeError::NotActive);
        env.start().unwrap();
        env.tick(1.0).unwrap();
        env.tick(3.0).unwrap();
        let transitions = env.release().unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].cause, TransitionCause::Released);
        assert_eq!(env.phase_name(), Some("release"));
        env.tick(4.0).unwrap();
        assert!(!env.is_active());
    }

    #[test]
    fn test_deactivate_is_idempotent() {
        let mut env = adsr();
        env.start().unwrap();
        env.tick(0.5).unwrap();
        let transition = env.deactivate().unwrap();
        assert_eq!(transition.to, None);
        assert_eq!(transition.value, 5.0);
        assert_eq!(transition.cause, TransitionCause::Deactivated);
        assert!(env.deactivate().is_none());
        for _ in 0..10 {
            let outcome = env.tick(0.1).unwrap();
            assert_eq!(outcome.value, 0.0);
        }
        assert_eq!(env.phase(), None);
        assert_eq!(env.total_elapsed(), 0.0);
    }

    #[test]
    fn test_release_returns_to_idle() {
        let mut env = adsr();
        env.start().unwrap();
        env.tick(1.0).unwrap();
        env.trigger("release").unwrap();
        let outcome = env.tick(10.0).unwrap();
        assert_eq!(outcome.transitions.last().unwrap().to, None);
        assert!(!env.is_active());
        assert_eq!(env.value(), 0.0);
    }

    #[test]
    fn test_invalid_step_rejected() {
        let mut env = adsr();
        env.start().unwrap();
        assert_eq!(
            env.tick(-0.1).unwrap_err(),
            EnvelopeError::InvalidStep { dt: -0.1 }
        );
        assert!(env.tick(f64::NAN).is_err());
        assert!(env.tick(f64::INFINITY).is_err());
        assert_eq!(env.phase_elapsed(), 0.0);
    }

    #[test]
    fn test_evaluation_error_leaves_state_untouched() {
        let phases = vec![
            phase("risky", Some("1 / (X - 1)"), CompletionPolicy::target(100.0)),
        ];
        let mut env = PhaseEnvelope::new(calc(), phases, 0.0).unwrap();
        env.start().unwrap();
        env.tick(0.5).unwrap();
        let value = env.value();
        let err = env.tick(0.5).unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::Evaluation {
                phase: "risky".to_string(),
                source: FormulaError::DivisionByZero,
            }
        );
        assert_eq!(env.value(), value);
        assert_eq!(env.phase_elapsed(), 0.5);
        assert_eq!(env.total_elapsed(), 0.5);
    }

    #[test]
    fn test_formula_less_phase_holds_value() {
        let phases = vec![phase("hold", None, CompletionPolicy::Indefinite)];
        let mut env = PhaseEnvelope::new(calc(), phases, 2.5).unwrap();
        env.start().unwrap();
        env.tick(1.0).unwrap();
        assert_eq!(env.value(), 2.5);
        assert_eq!(env.current_phase_value(), 0.0);
    }

    #[test]
    fn test_set_value_exact() {
        let mut env = adsr();
        assert_eq!(env.set_value_exact(3.0), Err(EnvelopeError::NotActive));
        env.start().unwrap();
        env.tick(1.0).unwrap();
        env.set_value_exact(7.25).unwrap();
        assert_eq!(env.value(), 7.25);
        assert_eq!(env.previous_phase_value() + env.current_phase_value(), 7.25);
    }

    #[test]
    fn test_evaluator_variables_are_per_envelope() {
        let calc = Calculator::default().with_variable("PEAK", 10.0).unwrap();
        let phases = vec![
            PhaseDefinition::new("rise", CompletionPolicy::Indefinite)
                .with_formula(&calc, "PEAK * X")
                .unwrap(),
        ];
        let mut a = PhaseEnvelope::new(calc, phases, 0.0).unwrap();
        let mut b = a.clone();
        a.evaluator_mut().set_variable("PEAK", 1.0).unwrap();
        a.start().unwrap();
        b.start().unwrap();
        assert_eq!(a.tick(1.0).unwrap().value, 1.0);
        assert_eq!(b.tick(1.0).unwrap().value, 10.0);
    }

    #[test]
    fn test_below_default_flagged_not_clamped() {
        let phases = vec![phase("dip", Some("-X"), CompletionPolicy::Indefinite)];
        let mut env = PhaseEnvelope::new(calc(), phases, 1.0).unwrap();
        env.start().unwrap();
        env.tick(2.0).unwrap();
        assert_eq!(env.value(), -1.0);
    }
}
