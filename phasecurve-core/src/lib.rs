//! `PhaseCurve` Core — configuration schema and shared error types
//!
//! This crate provides the persisted configuration shape for phase
//! envelopes and the configuration/validation error types shared by the
//! `phasecurve` runtime and command-line driver.

pub mod config;
pub mod error;

/// Version of the core crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
