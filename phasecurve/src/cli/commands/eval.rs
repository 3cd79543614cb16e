//! `eval` command: evaluate one formula at a list of parameter values.

use serde::Serialize;

use crate::cli::args::{EvalArgs, OutputFormat};
use crate::error::PhaseCurveError;
use crate::formula::{Calculator, FormulaEvaluator};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
struct Point {
    at: f64,
    value: f64,
}

/// Compile the formula once and print its value at each `--at`.
///
/// # Errors
///
/// Returns a formula error for bad names, a compile error, or the first
/// evaluation failure.
pub fn run(args: &EvalArgs) -> Result<(), PhaseCurveError> {
    let points = evaluate(args)?;
    match args.format {
        OutputFormat::Human => {
            for point in &points {
                println!("{} = {}", point.at, point.value);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&points)?),
    }
    Ok(())
}

fn evaluate(args: &EvalArgs) -> Result<Vec<Point>, PhaseCurveError> {
    let calculator = args
        .vars
        .iter()
        .try_fold(Calculator::new(&args.parameter)?, |calc, var| {
            calc.with_variable(&var.name, var.value)
        })?;
    let expression = calculator.compile(&args.formula)?;
    tracing::debug!(formula = %args.formula, constant = ?expression.constant(), "compiled");

    let at: &[f64] = if args.at.is_empty() { &[0.0] } else { &args.at };
    at.iter()
        .map(|&x| {
            Ok(Point {
                at: x,
                value: calculator.evaluate(&expression, x)?,
            })
        })
        .collect()
}
