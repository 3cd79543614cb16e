//! `validate` command
//!
//! Loads each file through the full pipeline (including compiling the
//! envelope) and reports every issue. In strict mode warnings count as
//! failures.

use std::path::Path;

use serde::Serialize;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::{ConfigLoader, build_envelope, probe_formulas};
use crate::error::{ConfigError, PhaseCurveError, Severity, ValidationIssue};

/// Outcome of validating one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    /// File as given on the command line
    pub file: String,
    /// Whether the file passed
    pub valid: bool,
    /// Errors (and warnings promoted in strict mode)
    pub errors: Vec<ValidationIssue>,
    /// Warnings
    pub warnings: Vec<ValidationIssue>,
}

/// Validate configuration files.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationFailed`] when any file fails.
pub fn run(args: &ValidateArgs) -> Result<(), PhaseCurveError> {
    let loader = ConfigLoader::with_defaults();
    let reports: Vec<FileReport> = args
        .files
        .iter()
        .map(|path| check_file(&loader, path, args.strict))
        .collect();

    match args.format {
        OutputFormat::Human => {
            for report in &reports {
                print_human(report);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }

    let count = reports.iter().filter(|r| !r.valid).count();
    if count > 0 {
        return Err(ConfigError::ValidationFailed { count }.into());
    }
    Ok(())
}

/// Validates one file.
pub fn check_file(loader: &ConfigLoader, path: &Path, strict: bool) -> FileReport {
    tracing::info!(file = %path.display(), "validating configuration");
    let file = path.display().to_string();

    let (mut errors, mut warnings) = match loader.load(path) {
        Ok(loaded) => {
            let warnings = loaded
                .warnings
                .into_iter()
                .map(|w| ValidationIssue {
                    path: w.location.unwrap_or_default(),
                    message: w.message,
                    severity: Severity::Warning,
                })
                .collect();
            let errors = build_envelope(&loaded.config)
                .and_then(|envelope| probe_formulas(&envelope))
                .err()
                .map(|e| vec![issue_from(&e)])
                .unwrap_or_default();
            (errors, warnings)
        }
        Err(ConfigError::ValidationError { errors, .. }) => (errors, Vec::new()),
        Err(e) => (vec![issue_from(&e)], Vec::new()),
    };

    if strict {
        errors.extend(warnings.iter().map(|w| ValidationIssue {
            severity: Severity::Error,
            ..w.clone()
        }));
        warnings.clear();
    }

    FileReport {
        file,
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn issue_from(err: &ConfigError) -> ValidationIssue {
    let path = match err {
        ConfigError::Formula { location, .. } => location.clone(),
        ConfigError::InvalidValue { field, .. } => field.clone(),
        _ => String::new(),
    };
    ValidationIssue {
        path,
        message: err.to_string(),
        severity: Severity::Error,
    }
}

fn print_human(report: &FileReport) {
    let status = if report.valid { "ok" } else { "FAILED" };
    println!("{}: {status}", report.file);
    for issue in report.errors.iter().chain(&report.warnings) {
        println!("  {issue}");
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const VALID: &str = r#"
phases:
  - name: rise
    formula: "2*X"
    completion: { kind: target, value: 1 }
"#;

    fn file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_valid_file() {
        let f = file(VALID);
        let report = check_file(&ConfigLoader::with_defaults(), f.path(), false);
        assert!(report.valid, "{report:?}");
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_collects_every_error() {
        let f = file(
            r#"
phases:
  - name: a
    formula: "2*Y"
    completion: { kind: target, value: 1 }
    next: nowhere
"#,
        );
        let report = check_file(&ConfigLoader::with_defaults(), f.path(), false);
        assert!(!report.valid);
        assert!(report.errors.len() >= 2, "{:?}", report.errors);
    }

    #[test]
    fn test_strict_promotes_warnings() {
        let f = file(
            r#"
phases:
  - name: hold
    completion: { kind: target, value: 1 }
"#,
        );
        let loader = ConfigLoader::with_defaults();
        let lenient = check_file(&loader, f.path(), false);
        assert!(lenient.valid);
        assert!(!lenient.warnings.is_empty());

        let strict = check_file(&loader, f.path(), true);
        assert!(!strict.valid);
        assert!(strict.warnings.is_empty());
        assert!(strict.errors.iter().all(|e| e.severity == Severity::Error));
    }

    #[test]
    fn test_missing_file() {
        let report = check_file(
            &ConfigLoader::with_defaults(),
            Path::new("/nonexistent/envelope.yaml"),
            false,
        );
        assert!(!report.valid);
        assert!(report.errors[0].message.contains("file not found"));
    }

    #[test]
    fn test_runtime_probe_failure_reported() {
        let f = file(
            r#"
phases:
  - name: log
    formula: "LN(X)"
    completion: { kind: duration, value: 1 }
"#,
        );
        let report = check_file(&ConfigLoader::with_defaults(), f.path(), false);
        assert!(!report.valid);
        assert_eq!(report.errors[0].path, "phases[0].formula");
    }
}
