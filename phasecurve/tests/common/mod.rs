//! Shared integration-test harness for running the `phasecurve` binary
//! against fixture configurations.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Command, Output};

/// Helpers for invoking the built `phasecurve` binary.
pub struct PhaseCurveProcess;

impl PhaseCurveProcess {
    /// Runs the binary with `args` and waits for it to exit.
    #[allow(clippy::missing_panics_doc)]
    pub fn spawn_command(args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_phasecurve"))
            .args(args)
            .env_remove("PHASECURVE_LOG_LEVEL")
            .env_remove("PHASECURVE_CONFIG")
            .output()
            .expect("failed to run phasecurve")
    }

    /// Runs the binary and returns `(exit code, stdout, stderr)`.
    #[allow(clippy::missing_panics_doc)]
    pub fn run(args: &[&str]) -> (i32, String, String) {
        let output = Self::spawn_command(args);
        (
            output.status.code().expect("terminated by signal"),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        )
    }

    /// Returns the path to a test fixture.
    #[must_use]
    pub fn fixture_path(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    /// Returns a fixture path as a string argument.
    #[must_use]
    pub fn fixture(name: &str) -> String {
        Self::fixture_path(name).to_string_lossy().into_owned()
    }
}
