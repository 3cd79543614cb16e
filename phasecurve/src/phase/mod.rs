//! Phase envelope state machine.
//!
//! Tracks a modulated scalar through an ordered list of phases, evaluating
//! each phase's formula against phase-local elapsed time and transitioning
//! when the phase's completion policy is met.
//!
//! # Architecture
//!
//! - [`PhaseDefinition`] — immutable per-phase description
//! - [`completion`] — target/duration crossing detection
//! - [`trigger`] — event bindings and lookup order
//! - [`PhaseEnvelope`] — the state machine driven by `tick` and `trigger`

pub mod completion;
pub mod definition;
pub mod envelope;
pub mod trigger;

pub use definition::{CompletionPolicy, DEFAULT_TOLERANCE, PhaseDefinition, PhaseId};
pub use envelope::{PhaseEnvelope, PhaseTransition, TickOutcome, TransitionCause, TriggerOutcome};
pub use trigger::{TriggerMap, TriggerSource};
