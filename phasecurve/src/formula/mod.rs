//! Formula compilation and evaluation.
//!
//! The envelope only depends on the [`FormulaEvaluator`] trait: compile a
//! formula once, then evaluate it every tick with the phase-local elapsed
//! time bound to a parameter. [`Calculator`] is the built-in
//! spreadsheet-style implementation.

pub mod functions;
mod lexer;
mod parser;

use std::fmt;

use crate::error::FormulaError;

pub use functions::Function;
pub use parser::{BinaryOp, Expr};

/// Compiles and evaluates phase formulas.
///
/// Each envelope owns its evaluator, so named variables never leak
/// between envelopes.
pub trait FormulaEvaluator: Clone + fmt::Debug {
    /// Compiled form of a formula.
    type Expression: Clone + fmt::Debug;

    /// Compiles formula text.
    ///
    /// # Errors
    ///
    /// Returns a [`FormulaError`] for malformed text or unknown names.
    fn compile(&self, text: &str) -> Result<Self::Expression, FormulaError>;

    /// Evaluates a compiled formula with the parameter bound to `binding`.
    ///
    /// # Errors
    ///
    /// Returns a [`FormulaError`] for arithmetic or domain failures and for
    /// non-finite results.
    fn evaluate(&self, expression: &Self::Expression, binding: f64) -> Result<f64, FormulaError>;

    /// Whether `name` is reserved by the evaluator and cannot be bound.
    fn is_reserved(&self, name: &str) -> bool;
}

/// Spreadsheet-style formula evaluator.
///
/// Identifiers are case-insensitive. The parameter (default `X`) is bound
/// at evaluation time; variables are declared up front and may be
/// reassigned later with [`Calculator::set_variable`].
#[derive(Debug, Clone, PartialEq)]
pub struct Calculator {
    parameter: String,
    names: Vec<String>,
    values: Vec<f64>,
}

impl Default for Calculator {
    fn default() -> Self {
        Self {
            parameter: phasecurve_core::config::DEFAULT_PARAMETER.to_string(),
            names: Vec::new(),
            values: Vec::new(),
        }
    }
}

impl Calculator {
    /// Creates a calculator binding `parameter`.
    ///
    /// # Errors
    ///
    /// Returns [`FormulaError::InvalidName`] or [`FormulaError::ReservedName`]
    /// when `parameter` cannot be used as an identifier.
    pub fn new(parameter: impl Into<String>) -> Result<Self, FormulaError> {
        let parameter = parameter.into();
        let calculator = Self::default();
        calculator.check_name(&parameter)?;
        Ok(Self {
            parameter,
            ..calculator
        })
    }

    /// Declares a named variable with an initial value.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, reserved, or already bound.
    pub fn with_variable(mut self, name: impl Into<String>, value: f64) -> Result<Self, FormulaError> {
        let name = name.into();
        self.check_name(&name)?;
        if self.is_bound(&name) {
            return Err(FormulaError::DuplicateName { name });
        }
        self.names.push(name);
        self.values.push(value);
        Ok(self)
    }

    /// Name bound to the phase-local elapsed time.
    #[must_use]
    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    /// Declared variables and their current values.
    pub fn variables(&self) -> impl Iterator<Item = (&str, f64)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    /// Current value of a declared variable.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<f64> {
        self.position(name).map(|i| self.values[i])
    }

    /// Reassigns a declared variable.
    ///
    /// Formulas compiled earlier see the new value on their next evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`FormulaError::UnknownVariable`] if `name` was never declared.
    pub fn set_variable(&mut self, name: &str, value: f64) -> Result<(), FormulaError> {
        let index = self
            .position(name)
            .ok_or_else(|| FormulaError::UnknownVariable {
                name: name.to_string(),
            })?;
        self.values[index] = value;
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n.eq_ignore_ascii_case(name))
    }

    fn is_bound(&self, name: &str) -> bool {
        self.parameter.eq_ignore_ascii_case(name) || self.position(name).is_some()
    }

    fn check_name(&self, name: &str) -> Result<(), FormulaError> {
        let mut chars = name.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(FormulaError::InvalidName {
                name: name.to_string(),
            });
        }
        if self.is_reserved(name) {
            return Err(FormulaError::ReservedName {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

impl FormulaEvaluator for Calculator {
    type Expression = Expr;

    fn compile(&self, text: &str) -> Result<Expr, FormulaError> {
        let scope = parser::Scope {
            parameter: &self.parameter,
            variables: &self.names,
        };
        parser::parse(text, &scope)
    }

    fn evaluate(&self, expression: &Expr, binding: f64) -> Result<f64, FormulaError> {
        let value = expression.evaluate(binding, &self.values)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(FormulaError::NonFinite { value })
        }
    }

    fn is_reserved(&self, name: &str) -> bool {
        Function::lookup(name).is_some()
    }
}

/// Suggests the closest candidate for a misspelled name.
///
/// Returns the nearest match if its Damerau-Levenshtein distance is at
/// most 3, comparing case-insensitively.
pub(crate) fn suggest<'a>(
    input: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> Option<String> {
    let input = input.to_ascii_lowercase();
    candidates
        .into_iter()
        .map(|c| (c, strsim::damerau_levenshtein(&input, &c.to_ascii_lowercase())))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(name, _)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(calc: &Calculator, text: &str, binding: f64) -> Result<f64, FormulaError> {
        calc.evaluate(&calc.compile(text)?, binding)
    }

    #[test]
    fn test_default_parameter_is_x() {
        let calc = Calculator::default();
        assert_eq!(calc.parameter(), "X");
        let expr = calc.compile("10*X").unwrap();
        assert_eq!(calc.evaluate(&expr, 0.5).unwrap(), 5.0);
    }

    #[test]
    fn test_custom_parameter() {
        let calc = Calculator::new("t").unwrap();
        assert_eq!(eval(&calc, "2*T + 1", 3.0).unwrap(), 7.0);
        assert!(matches!(
            eval(&calc, "X", 1.0),
            Err(FormulaError::UnknownIdentifier { .. })
        ));
    }

    #[test]
    fn test_parameter_collides_with_builtin() {
        assert_eq!(
            Calculator::new("Sin"),
            Err(FormulaError::ReservedName {
                name: "Sin".to_string()
            })
        );
        assert!(matches!(
            Calculator::new("2x"),
            Err(FormulaError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_variables() {
        let mut calc = Calculator::default()
            .with_variable("peak", 10.0)
            .unwrap();
        let expr = calc.compile("PEAK * X").unwrap();
        assert_eq!(calc.evaluate(&expr, 0.5).unwrap(), 5.0);

        calc.set_variable("Peak", 4.0).unwrap();
        assert_eq!(calc.evaluate(&expr, 0.5).unwrap(), 2.0);
        assert_eq!(calc.variable("PEAK"), Some(4.0));
        assert_eq!(calc.variables().collect::<Vec<_>>(), vec![("peak", 4.0)]);

        assert!(matches!(
            calc.set_variable("missing", 1.0),
            Err(FormulaError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn test_variable_name_conflicts() {
        assert!(matches!(
            Calculator::default().with_variable("x", 1.0),
            Err(FormulaError::DuplicateName { .. })
        ));
        assert!(matches!(
            Calculator::default().with_variable("MAX", 1.0),
            Err(FormulaError::ReservedName { .. })
        ));
    }

    #[test]
    fn test_runtime_errors_propagate() {
        let calc = Calculator::default();
        assert_eq!(
            eval(&calc, "1 / X", 0.0),
            Err(FormulaError::DivisionByZero)
        );
        assert!(matches!(
            eval(&calc, "SQRT(X - 1)", 0.0),
            Err(FormulaError::Domain { .. })
        ));
        assert!(matches!(
            eval(&calc, "EXP(X)", 1000.0),
            Err(FormulaError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_is_reserved() {
        let calc = Calculator::default();
        assert!(calc.is_reserved("log10"));
        assert!(!calc.is_reserved("X"));
    }

    #[test]
    fn test_suggest() {
        assert_eq!(suggest("atack", ["attack", "decay"]), Some("attack".to_string()));
        assert_eq!(suggest("zzzzzzzz", ["attack"]), None);
    }
}
