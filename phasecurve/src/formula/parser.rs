//! Recursive-descent formula parser and expression tree.
//!
//! Precedence, lowest first: comparison, additive, multiplicative, unary
//! sign, power (right-associative), postfix percent, atoms. Constant
//! sub-trees are folded while the tree is built.

use super::functions::Function;
use super::lexer::{Operator, Spanned, Token, lex};
use super::suggest;
use crate::error::FormulaError;

/// Deepest nesting of parentheses, call arguments and signs.
pub const MAX_DEPTH: usize = 256;

/// Most binary and postfix operators in one formula.
///
/// Operator chains are parsed iteratively but still build a tree that is
/// as deep as the chain is long, so they are capped separately.
pub const MAX_OPERATORS: usize = 4096;

/// Binary operators after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl BinaryOp {
    fn apply(self, lhs: f64, rhs: f64) -> Result<f64, FormulaError> {
        let truth = |b: bool| if b { 1.0 } else { 0.0 };
        let value = match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => {
                if rhs == 0.0 {
                    return Err(FormulaError::DivisionByZero);
                }
                lhs / rhs
            }
            Self::Pow => lhs.powf(rhs),
            #[allow(clippy::float_cmp)]
            Self::Eq => truth(lhs == rhs),
            #[allow(clippy::float_cmp)]
            Self::NotEq => truth(lhs != rhs),
            Self::Less => truth(lhs < rhs),
            Self::LessEq => truth(lhs <= rhs),
            Self::Greater => truth(lhs > rhs),
            Self::GreaterEq => truth(lhs >= rhs),
        };
        Ok(value)
    }

    const fn from_comparison(op: Operator) -> Option<Self> {
        match op {
            Operator::Eq => Some(Self::Eq),
            Operator::NotEq => Some(Self::NotEq),
            Operator::Less => Some(Self::Less),
            Operator::LessEq => Some(Self::LessEq),
            Operator::Greater => Some(Self::Greater),
            Operator::GreaterEq => Some(Self::GreaterEq),
            _ => None,
        }
    }
}

/// Compiled formula.
///
/// Variables are referenced by their declaration index in the owning
/// [`Calculator`](super::Calculator).
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Parameter,
    Variable(usize),
    Negate(Box<Expr>),
    Percent(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call(Function, Vec<Expr>),
}

impl Expr {
    /// Returns the value of a fully folded constant expression.
    #[must_use]
    pub const fn constant(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether the expression depends on the bound parameter.
    #[must_use]
    pub fn uses_parameter(&self) -> bool {
        match self {
            Self::Parameter => true,
            Self::Number(_) | Self::Variable(_) => false,
            Self::Negate(inner) | Self::Percent(inner) => inner.uses_parameter(),
            Self::Binary { lhs, rhs, .. } => lhs.uses_parameter() || rhs.uses_parameter(),
            Self::Call(_, args) => args.iter().any(Self::uses_parameter),
        }
    }

    /// Evaluates the expression.
    ///
    /// # Errors
    ///
    /// Returns division-by-zero or domain errors raised along the way.
    pub fn evaluate(&self, parameter: f64, variables: &[f64]) -> Result<f64, FormulaError> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Parameter => Ok(parameter),
            Self::Variable(index) => variables.get(*index).copied().ok_or_else(|| {
                FormulaError::UnknownVariable {
                    name: format!("#{index}"),
                }
            }),
            Self::Negate(inner) => Ok(-inner.evaluate(parameter, variables)?),
            Self::Percent(inner) => Ok(inner.evaluate(parameter, variables)? / 100.0),
            Self::Binary { op, lhs, rhs } => op.apply(
                lhs.evaluate(parameter, variables)?,
                rhs.evaluate(parameter, variables)?,
            ),
            Self::Call(Function::If, args) => {
                // Only the selected branch is evaluated.
                let condition = args[0].evaluate(parameter, variables)?;
                if condition == 0.0 {
                    args.get(2)
                        .map_or(Ok(0.0), |branch| branch.evaluate(parameter, variables))
                } else {
                    args[1].evaluate(parameter, variables)
                }
            }
            Self::Call(function, args) => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(parameter, variables))
                    .collect::<Result<Vec<_>, _>>()?;
                function.apply(&values)
            }
        }
    }

    fn negate(inner: Self) -> Self {
        Self::Negate(Box::new(inner)).fold()
    }

    fn percent(inner: Self) -> Self {
        Self::Percent(Box::new(inner)).fold()
    }

    fn binary(op: BinaryOp, lhs: Self, rhs: Self) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
        .fold()
    }

    fn call(function: Function, args: Vec<Self>) -> Self {
        if function == Function::If {
            if let Some(condition) = args[0].constant() {
                let branch = if condition == 0.0 { args.get(2) } else { args.get(1) };
                return branch.cloned().unwrap_or(Self::Number(0.0));
            }
        }
        Self::Call(function, args).fold()
    }

    /// Replaces the node with its value when every input is constant and
    /// evaluation succeeds. Failing constants are kept so the error is
    /// reported when the formula runs.
    fn fold(self) -> Self {
        let all_constant = match &self {
            Self::Number(_) | Self::Parameter | Self::Variable(_) => return self,
            Self::Negate(inner) | Self::Percent(inner) => inner.constant().is_some(),
            Self::Binary { lhs, rhs, .. } => lhs.constant().is_some() && rhs.constant().is_some(),
            Self::Call(_, args) => args.iter().all(|arg| arg.constant().is_some()),
        };
        if !all_constant {
            return self;
        }
        match self.evaluate(0.0, &[]) {
            Ok(value) if value.is_finite() => Self::Number(value),
            _ => self,
        }
    }
}

/// Names visible to a formula.
pub struct Scope<'a> {
    pub parameter: &'a str,
    pub variables: &'a [String],
}

impl Scope<'_> {
    fn resolve(&self, name: &str) -> Option<Expr> {
        if name.eq_ignore_ascii_case(self.parameter) {
            return Some(Expr::Parameter);
        }
        self.variables
            .iter()
            .position(|v| v.eq_ignore_ascii_case(name))
            .map(Expr::Variable)
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.parameter).chain(self.variables.iter().map(String::as_str))
    }
}

/// Parses `src` into a folded expression tree.
///
/// # Errors
///
/// Returns a syntax, unknown-name or arity error.
pub fn parse(src: &str, scope: &Scope<'_>) -> Result<Expr, FormulaError> {
    let tokens = lex(src)?;
    let mut parser = Parser {
        tokens,
        index: 0,
        end: src.len(),
        scope,
        depth: 0,
        operators: 0,
    };
    if parser.tokens.is_empty() {
        return Err(FormulaError::Syntax {
            position: 0,
            message: "empty formula".to_string(),
        });
    }
    let expr = parser.parse_cmp()?;
    if let Some(extra) = parser.tokens.get(parser.index) {
        return Err(FormulaError::Syntax {
            position: extra.offset,
            message: format!("unexpected {}", describe(&extra.token)),
        });
    }
    Ok(expr)
}

struct Parser<'s, 'a> {
    tokens: Vec<Spanned>,
    index: usize,
    end: usize,
    scope: &'s Scope<'a>,
    depth: usize,
    operators: usize,
}

impl Parser<'_, '_> {
    fn parse_cmp(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_add()?;
        while let Some(op) = self.peek_op().and_then(BinaryOp::from_comparison) {
            self.operator()?;
            let rhs = self.parse_add()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_add(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek_op() {
                Some(Operator::Add) => BinaryOp::Add,
                Some(Operator::Sub) => BinaryOp::Sub,
                _ => break,
            };
            self.operator()?;
            let rhs = self.parse_mul()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_op() {
                Some(Operator::Mul) => BinaryOp::Mul,
                Some(Operator::Div) => BinaryOp::Div,
                _ => break,
            };
            self.operator()?;
            let rhs = self.parse_unary()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek_op() {
            Some(Operator::Sub) => {
                self.descend()?;
                let expr = Expr::negate(self.parse_unary()?);
                self.depth -= 1;
                Ok(expr)
            }
            Some(Operator::Add) => {
                self.descend()?;
                let expr = self.parse_unary()?;
                self.depth -= 1;
                Ok(expr)
            }
            _ => self.parse_pow(),
        }
    }

    fn parse_pow(&mut self) -> Result<Expr, FormulaError> {
        let base = self.parse_postfix()?;
        if self.peek_op() == Some(Operator::Pow) {
            self.descend()?;
            // Exponent may carry its own sign: 2^-1.
            let exponent = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, FormulaError> {
        let mut expr = self.parse_atom()?;
        while self.peek_op() == Some(Operator::Percent) {
            self.operator()?;
            expr = Expr::percent(expr);
        }
        Ok(expr)
    }

    fn parse_atom(&mut self) -> Result<Expr, FormulaError> {
        let Some(Spanned { token, offset }) = self.next() else {
            return Err(syntax(self.end, "unexpected end of formula"));
        };
        match token {
            Token::Num(n) => Ok(Expr::Number(n)),
            Token::Id(name) => {
                if matches!(self.peek(), Some(Token::Lp)) {
                    return self.parse_call(&name);
                }
                self.scope
                    .resolve(&name)
                    .ok_or_else(|| FormulaError::UnknownIdentifier {
                        suggestion: suggest(&name, self.scope.names()),
                        name,
                    })
            }
            Token::Lp => {
                self.enter(offset)?;
                let expr = self.parse_cmp()?;
                self.expect_rp()?;
                self.depth -= 1;
                Ok(expr)
            }
            other => Err(syntax(offset, &format!("unexpected {}", describe(&other)))),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr, FormulaError> {
        let function = Function::lookup(name).ok_or_else(|| FormulaError::UnknownFunction {
            name: name.to_string(),
            suggestion: suggest(name, Function::ALL.iter().map(|f| f.name())),
        })?;
        let Some(Spanned { offset, .. }) = self.next() else {
            return Err(syntax(self.end, "expected '('"));
        };
        self.enter(offset)?;
        let mut args = Vec::new();
        if !matches!(self.peek(), Some(Token::Rp)) {
            loop {
                args.push(self.parse_cmp()?);
                if matches!(self.peek(), Some(Token::Comma)) {
                    self.next();
                    continue;
                }
                break;
            }
        }
        self.expect_rp()?;
        self.depth -= 1;
        function.check_arity(args.len())?;
        Ok(Expr::call(function, args))
    }

    /// Consumes a nesting token at `offset`, failing past [`MAX_DEPTH`].
    fn enter(&mut self, offset: usize) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(syntax(offset, "formula nests too deeply"));
        }
        Ok(())
    }

    /// Consumes the current token and opens one nesting level.
    fn descend(&mut self) -> Result<(), FormulaError> {
        let offset = self.offset();
        self.next();
        self.enter(offset)
    }

    /// Consumes a binary or postfix operator, failing past [`MAX_OPERATORS`].
    fn operator(&mut self) -> Result<(), FormulaError> {
        let offset = self.offset();
        self.next();
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(syntax(offset, "formula has too many operators"));
        }
        Ok(())
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.index).map_or(self.end, |s| s.offset)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|s| &s.token)
    }

    fn peek_op(&self) -> Option<Operator> {
        match self.peek() {
            Some(Token::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn expect_rp(&mut self) -> Result<(), FormulaError> {
        match self.next() {
            Some(Spanned {
                token: Token::Rp, ..
            }) => Ok(()),
            Some(other) => Err(syntax(
                other.offset,
                &format!("expected ')', found {}", describe(&other.token)),
            )),
            None => Err(syntax(self.end, "expected ')'")),
        }
    }
}

fn syntax(position: usize, message: &str) -> FormulaError {
    FormulaError::Syntax {
        position,
        message: message.to_string(),
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Num(n) => format!("number {n}"),
        Token::Id(name) => format!("identifier '{name}'"),
        Token::Op(op) => format!("operator {op:?}"),
        Token::Lp => "'('".to_string(),
        Token::Rp => "')'".to_string(),
        Token::Comma => "','".to_string(),
    }
}
