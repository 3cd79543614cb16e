//! Batch simulation and sample recording.
//!
//! [`PhaseEnvelope::simulate`] runs a clone of an envelope from activation
//! back to idle at a fixed step, releasing externally gated phases after a
//! configurable hold time, and returns every sample and transition. The
//! receiver is never mutated, so the same envelope can be simulated any
//! number of times with identical results.

use serde::Serialize;
use tracing::{debug, info};

use crate::error::SimulationError;
use crate::formula::FormulaEvaluator;
use crate::observability::metrics;
use crate::phase::completion::approximately;
use crate::phase::{CompletionPolicy, DEFAULT_TOLERANCE, PhaseEnvelope, PhaseId, PhaseTransition};

/// Default simulation step (50 Hz).
pub const DEFAULT_DT: f64 = 0.02;

/// Default hold time before an external phase is released.
pub const DEFAULT_TRIGGER_TIME: f64 = 1.0;

/// Default tick budget.
pub const DEFAULT_MAX_TICKS: usize = 100_000;

// ============================================================================
// Options
// ============================================================================

/// Parameters of a batch simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationOptions {
    /// Fixed tick length in seconds
    pub dt: f64,
    /// Seconds an `External` or `Indefinite` phase is held
    pub trigger_time: f64,
    /// Tick budget before giving up
    pub max_ticks: usize,
    /// Phase to activate; the envelope's start phase when `None`
    pub start: Option<PhaseId>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            dt: DEFAULT_DT,
            trigger_time: DEFAULT_TRIGGER_TIME,
            max_ticks: DEFAULT_MAX_TICKS,
            start: None,
        }
    }
}

impl SimulationOptions {
    /// Default options with the given hold time.
    #[must_use]
    pub fn new(trigger_time: f64) -> Self {
        Self {
            trigger_time,
            ..Self::default()
        }
    }

    /// Sets the tick length.
    #[must_use]
    pub const fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    /// Sets the tick budget.
    #[must_use]
    pub const fn with_max_ticks(mut self, max_ticks: usize) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Starts the simulation in `start` instead of the configured phase.
    #[must_use]
    pub const fn with_start(mut self, start: PhaseId) -> Self {
        self.start = Some(start);
        self
    }

    /// Checks the options.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidOptions`] for a non-positive step,
    /// a negative hold time or a zero tick budget.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(SimulationError::InvalidOptions(format!(
                "dt must be finite and positive, got {}",
                self.dt
            )));
        }
        if !self.trigger_time.is_finite() || self.trigger_time < 0.0 {
            return Err(SimulationError::InvalidOptions(format!(
                "trigger time must be finite and non-negative, got {}",
                self.trigger_time
            )));
        }
        if self.max_ticks == 0 {
            return Err(SimulationError::InvalidOptions(
                "max ticks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Samples
// ============================================================================

/// Envelope state captured after one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Phase the sample belongs to
    pub phase: PhaseId,
    /// Envelope value
    pub value: f64,
    /// Time since activation
    pub total_elapsed: f64,
    /// Time since the phase was entered
    pub phase_elapsed: f64,
}

impl Sample {
    /// Captures an active envelope; `None` while idle.
    #[must_use]
    pub fn capture<E: FormulaEvaluator>(envelope: &PhaseEnvelope<E>) -> Option<Self> {
        envelope.phase().map(|phase| Self {
            phase,
            value: envelope.value(),
            total_elapsed: envelope.total_elapsed(),
            phase_elapsed: envelope.phase_elapsed(),
        })
    }

    /// The state at the moment `transition` left its phase.
    #[must_use]
    pub fn leaving(transition: &PhaseTransition) -> Option<Self> {
        transition.from.map(|phase| Self {
            phase,
            value: transition.value,
            total_elapsed: transition.total_elapsed,
            phase_elapsed: transition.phase_elapsed,
        })
    }
}

/// A contiguous run of samples in the same phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// Phase of the run
    pub phase: PhaseId,
    /// Index of the first sample
    pub start: usize,
    /// Index one past the last sample
    pub end: usize,
}

/// Ordered sample buffer with a running value range.
///
/// The range starts at the envelope's default value so that a plot of the
/// samples always includes the idle baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRecorder {
    samples: Vec<Sample>,
    lowest: f64,
    highest: f64,
}

impl SampleRecorder {
    /// Creates an empty recorder whose range includes `baseline`.
    #[must_use]
    pub const fn new(baseline: f64) -> Self {
        Self {
            samples: Vec::new(),
            lowest: baseline,
            highest: baseline,
        }
    }

    /// Appends a sample.
    pub fn push(&mut self, sample: Sample) {
        self.lowest = self.lowest.min(sample.value);
        self.highest = self.highest.max(sample.value);
        self.samples.push(sample);
    }

    /// Appends a sample of `envelope` if it is active.
    ///
    /// Returns whether a sample was recorded.
    pub fn record<E: FormulaEvaluator>(&mut self, envelope: &PhaseEnvelope<E>) -> bool {
        Sample::capture(envelope).map(|sample| self.push(sample)).is_some()
    }

    /// All samples in order.
    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Most recent sample.
    #[must_use]
    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Lowest and highest value seen, including the baseline.
    #[must_use]
    pub const fn value_range(&self) -> (f64, f64) {
        (self.lowest, self.highest)
    }

    /// Splits the samples into per-phase runs.
    #[must_use]
    pub fn segments(&self) -> Vec<Segment> {
        let mut segments: Vec<Segment> = Vec::new();
        for (index, sample) in self.samples.iter().enumerate() {
            match segments.last_mut() {
                Some(segment) if segment.phase == sample.phase => segment.end = index + 1,
                _ => segments.push(Segment {
                    phase: sample.phase,
                    start: index,
                    end: index + 1,
                }),
            }
        }
        segments
    }

    /// Time covered by the samples.
    #[must_use]
    pub fn total_time(&self) -> f64 {
        self.samples.last().map_or(0.0, |s| s.total_elapsed)
    }
}

// ============================================================================
// Simulation
// ============================================================================

/// How a simulation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimulationEnd {
    /// The envelope returned to idle
    Idle,
    /// An `Indefinite` phase was held for the trigger time
    Held {
        /// The held phase
        phase: PhaseId,
    },
}

/// Result of a batch simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Simulation {
    /// Activation sample followed by one sample per tick
    pub samples: SampleRecorder,
    /// Every transition, starting with the activation
    pub transitions: Vec<PhaseTransition>,
    /// Ticks executed
    pub ticks: usize,
    /// Why the run stopped
    pub end: SimulationEnd,
}

impl<E: FormulaEvaluator> PhaseEnvelope<E> {
    /// Simulates with default options and the given hold time.
    ///
    /// # Errors
    ///
    /// See [`PhaseEnvelope::simulate_with`].
    pub fn simulate(&self, trigger_time: f64) -> Result<Simulation, SimulationError> {
        self.simulate_with(&SimulationOptions::new(trigger_time))
    }

    /// Runs a clone of this envelope from activation until it returns to idle.
    ///
    /// The clone is reset first, so an active receiver simulates from the
    /// start like an idle one. Each loop iteration releases an `External`
    /// phase once it has been held for `trigger_time` seconds, then ticks.
    /// An `Indefinite` phase held that long ends the run.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidOptions`] for bad options,
    /// [`SimulationError::IterationCapExceeded`] when the envelope is still
    /// active after `max_ticks`, and wrapped envelope errors.
    pub fn simulate_with(&self, options: &SimulationOptions) -> Result<Simulation, SimulationError> {
        options.validate()?;
        let mut envelope = self.clone();
        envelope.deactivate();

        let mut samples = SampleRecorder::new(envelope.default_value());
        let start = options.start.unwrap_or_else(|| envelope.start_phase());
        let mut transitions = envelope.activate(start)?;
        samples.record(&envelope);

        let mut ticks = 0;
        let end = loop {
            let Some(phase) = envelope.phase() else {
                break SimulationEnd::Idle;
            };
            let held = held_long_enough(envelope.phase_elapsed(), options.trigger_time);
            match envelope.phases()[phase.index()].completion() {
                CompletionPolicy::Indefinite if held => break SimulationEnd::Held { phase },
                CompletionPolicy::External if held => {
                    debug!(phase = envelope.phase_label(Some(phase)), "releasing held phase");
                    transitions.extend(envelope.release()?);
                    continue;
                }
                _ => {}
            }

            if ticks == options.max_ticks {
                return Err(SimulationError::IterationCapExceeded {
                    ticks,
                    phase: envelope.phase_label(Some(phase)).to_string(),
                });
            }
            let outcome = envelope.tick(options.dt)?;
            ticks += 1;
            if !samples.record(&envelope) {
                if let Some(sample) = outcome.transitions.last().and_then(Sample::leaving) {
                    samples.push(sample);
                }
            }
            transitions.extend(outcome.transitions);
        };

        info!(
            envelope = envelope.name().unwrap_or(""),
            ticks,
            samples = samples.len(),
            transitions = transitions.len(),
            "simulation finished"
        );
        metrics::record_simulation(ticks);
        Ok(Simulation {
            samples,
            transitions,
            ticks,
            end,
        })
    }
}

fn held_long_enough(elapsed: f64, trigger_time: f64) -> bool {
    elapsed >= trigger_time || approximately(elapsed, trigger_time, DEFAULT_TOLERANCE)
}
