//! Persisted envelope configuration.
//!
//! These types are deserialized from YAML or JSON files and compiled into
//! a running envelope by the `phasecurve` crate.

pub mod schema;

pub use schema::*;
