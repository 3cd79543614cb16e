//! Configuration pipeline
//!
//! Loads envelope configurations from YAML or JSON, validates them,
//! compiles them into [`PhaseEnvelope`](crate::phase::PhaseEnvelope)s and
//! provides the built-in ADSR preset. The persisted schema itself lives in
//! `phasecurve-core` and is re-exported here.

pub mod build;
pub mod loader;
pub mod preset;
pub mod validation;

pub use build::{build_envelope, completion_policy, probe_formulas, simulation_options};
pub use loader::{ConfigLimits, ConfigLoader, LoadResult, LoadWarning, LoaderOptions};
pub use phasecurve_core::config::*;
pub use preset::{ADSR_PHASES, AdsrParams};
pub use validation::{ValidationResult, Validator};
