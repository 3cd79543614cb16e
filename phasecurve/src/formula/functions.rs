//! Built-in spreadsheet functions.
//!
//! Names are matched case-insensitively. Arity is checked when a formula
//! is compiled; domain errors surface when it is evaluated.

use crate::error::FormulaError;

/// A built-in function callable from formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Sqrt,
    Exp,
    Ln,
    Log,
    Log10,
    Power,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Min,
    Max,
    Round,
    Floor,
    Ceiling,
    Int,
    Sign,
    Mod,
    Pi,
    If,
    Clamp,
    Lerp,
}

impl Function {
    /// Every built-in, in documentation order.
    pub const ALL: [Self; 29] = [
        Self::Abs,
        Self::Sqrt,
        Self::Exp,
        Self::Ln,
        Self::Log,
        Self::Log10,
        Self::Power,
        Self::Sin,
        Self::Cos,
        Self::Tan,
        Self::Asin,
        Self::Acos,
        Self::Atan,
        Self::Atan2,
        Self::Sinh,
        Self::Cosh,
        Self::Tanh,
        Self::Min,
        Self::Max,
        Self::Round,
        Self::Floor,
        Self::Ceiling,
        Self::Int,
        Self::Sign,
        Self::Mod,
        Self::Pi,
        Self::If,
        Self::Clamp,
        Self::Lerp,
    ];

    /// Canonical upper-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Abs => "ABS",
            Self::Sqrt => "SQRT",
            Self::Exp => "EXP",
            Self::Ln => "LN",
            Self::Log => "LOG",
            Self::Log10 => "LOG10",
            Self::Power => "POWER",
            Self::Sin => "SIN",
            Self::Cos => "COS",
            Self::Tan => "TAN",
            Self::Asin => "ASIN",
            Self::Acos => "ACOS",
            Self::Atan => "ATAN",
            Self::Atan2 => "ATAN2",
            Self::Sinh => "SINH",
            Self::Cosh => "COSH",
            Self::Tanh => "TANH",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Round => "ROUND",
            Self::Floor => "FLOOR",
            Self::Ceiling => "CEILING",
            Self::Int => "INT",
            Self::Sign => "SIGN",
            Self::Mod => "MOD",
            Self::Pi => "PI",
            Self::If => "IF",
            Self::Clamp => "CLAMP",
            Self::Lerp => "LERP",
        }
    }

    /// Looks up a built-in by name, ignoring case.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    /// Returns `(min, max)` argument counts; `None` means unbounded.
    #[must_use]
    pub const fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::Pi => (0, Some(0)),
            Self::Log | Self::Round => (1, Some(2)),
            Self::Power | Self::Atan2 | Self::Mod => (2, Some(2)),
            Self::If => (2, Some(3)),
            Self::Clamp | Self::Lerp => (3, Some(3)),
            Self::Min | Self::Max => (1, None),
            _ => (1, Some(1)),
        }
    }

    const fn arity_text(self) -> &'static str {
        match self.arity() {
            (0, Some(0)) => "0",
            (1, Some(1)) => "1",
            (1, Some(2)) => "1 or 2",
            (2, Some(2)) => "2",
            (2, Some(3)) => "2 or 3",
            (3, Some(3)) => "3",
            _ => "at least 1",
        }
    }

    /// Verifies that `found` arguments are acceptable.
    ///
    /// # Errors
    ///
    /// Returns [`FormulaError::Arity`] when the count is out of range.
    pub fn check_arity(self, found: usize) -> Result<(), FormulaError> {
        let (min, max) = self.arity();
        if found < min || max.is_some_and(|limit| found > limit) {
            return Err(FormulaError::Arity {
                function: self.name(),
                expected: self.arity_text(),
                found,
            });
        }
        Ok(())
    }

    /// Applies the function to already-evaluated arguments.
    ///
    /// # Errors
    ///
    /// Returns a domain or division error for arguments outside the
    /// function's domain.
    pub fn apply(self, args: &[f64]) -> Result<f64, FormulaError> {
        let arg = |i: usize| args.get(i).copied().unwrap_or(0.0);
        let x = arg(0);
        let value = match self {
            Self::Abs => x.abs(),
            Self::Sqrt => {
                self.require(x >= 0.0, x)?;
                x.sqrt()
            }
            Self::Exp => x.exp(),
            Self::Ln => {
                self.require(x > 0.0, x)?;
                x.ln()
            }
            Self::Log => {
                self.require(x > 0.0, x)?;
                match args.get(1) {
                    Some(&base) => {
                        self.require(base > 0.0 && base != 1.0, base)?;
                        x.log(base)
                    }
                    None => x.log10(),
                }
            }
            Self::Log10 => {
                self.require(x > 0.0, x)?;
                x.log10()
            }
            Self::Power => x.powf(arg(1)),
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tan => x.tan(),
            Self::Asin => {
                self.require((-1.0..=1.0).contains(&x), x)?;
                x.asin()
            }
            Self::Acos => {
                self.require((-1.0..=1.0).contains(&x), x)?;
                x.acos()
            }
            Self::Atan => x.atan(),
            Self::Atan2 => x.atan2(arg(1)),
            Self::Sinh => x.sinh(),
            Self::Cosh => x.cosh(),
            Self::Tanh => x.tanh(),
            Self::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Round => round_to(x, arg(1)),
            Self::Floor => x.floor(),
            Self::Ceiling => x.ceil(),
            Self::Int => x.floor(),
            Self::Sign => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            Self::Mod => {
                let divisor = arg(1);
                if divisor == 0.0 {
                    return Err(FormulaError::DivisionByZero);
                }
                // Result takes the sign of the divisor.
                x - divisor * (x / divisor).floor()
            }
            Self::Pi => std::f64::consts::PI,
            Self::If => {
                if x == 0.0 {
                    arg(2)
                } else {
                    arg(1)
                }
            }
            Self::Clamp => x.max(arg(1)).min(arg(2)),
            Self::Lerp => arg(1).mul_add(arg(2), x.mul_add(-arg(2), x)),
        };
        Ok(value)
    }

    fn require(self, ok: bool, argument: f64) -> Result<(), FormulaError> {
        if ok {
            Ok(())
        } else {
            Err(FormulaError::Domain {
                function: self.name(),
                argument,
            })
        }
    }
}

fn round_to(x: f64, digits: f64) -> f64 {
    if digits == 0.0 {
        return x.round();
    }
    let scale = 10f64.powf(digits.trunc());
    (x * scale).round() / scale
}
