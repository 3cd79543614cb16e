//! `PhaseCurve` - formula-driven phase envelopes
//!
//! A deterministic, sample-driven state machine that moves a scalar through
//! an ordered list of phases, each shaped by a formula of phase-local time.
//! The library exposes the envelope, its default formula evaluator, the
//! configuration pipeline and batch simulation; the binary drives them from
//! the command line.

pub mod cli;
pub mod config;
pub mod error;
pub mod formula;
pub mod observability;
pub mod phase;
pub mod simulate;
