//! Formula tokenizer.

use crate::error::FormulaError;

/// Binary and postfix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Percent,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Num(f64),
    Id(String),
    Op(Operator),
    Lp,
    Rp,
    Comma,
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub fn lex(src: &str) -> Result<Vec<Spanned>, FormulaError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut index = 0usize;

    while index < bytes.len() {
        let b = bytes[index];
        if b.is_ascii_whitespace() {
            index += 1;
            continue;
        }

        let start = index;
        let token = match b {
            b'(' => {
                index += 1;
                Token::Lp
            }
            b')' => {
                index += 1;
                Token::Rp
            }
            b',' => {
                index += 1;
                Token::Comma
            }
            b'0'..=b'9' | b'.' => {
                index = scan_number(bytes, index);
                let text = &src[start..index];
                let value = text.parse::<f64>().map_err(|_| FormulaError::Syntax {
                    position: start,
                    message: format!("invalid number '{text}'"),
                })?;
                Token::Num(value)
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                index += 1;
                while index < bytes.len()
                    && (bytes[index].is_ascii_alphanumeric() || bytes[index] == b'_')
                {
                    index += 1;
                }
                Token::Id(src[start..index].to_string())
            }
            _ => {
                let next = bytes.get(index + 1).copied();
                let (op, consumed) = operator(b, next).ok_or_else(|| FormulaError::Syntax {
                    position: start,
                    message: format!(
                        "unexpected character '{}'",
                        src[start..].chars().next().unwrap_or('?')
                    ),
                })?;
                index += consumed;
                Token::Op(op)
            }
        };
        tokens.push(Spanned {
            token,
            offset: start,
        });
    }

    Ok(tokens)
}

fn scan_number(bytes: &[u8], mut index: usize) -> usize {
    while index < bytes.len() && (bytes[index].is_ascii_digit() || bytes[index] == b'.') {
        index += 1;
    }
    // Exponent only when followed by digits, so "2E" stays a number and an identifier.
    if index < bytes.len() && matches!(bytes[index], b'e' | b'E') {
        let mut probe = index + 1;
        if probe < bytes.len() && matches!(bytes[probe], b'+' | b'-') {
            probe += 1;
        }
        if probe < bytes.len() && bytes[probe].is_ascii_digit() {
            index = probe;
            while index < bytes.len() && bytes[index].is_ascii_digit() {
                index += 1;
            }
        }
    }
    index
}

const fn operator(b: u8, next: Option<u8>) -> Option<(Operator, usize)> {
    let op = match (b, next) {
        (b'<', Some(b'>')) => (Operator::NotEq, 2),
        (b'<', Some(b'=')) => (Operator::LessEq, 2),
        (b'>', Some(b'=')) => (Operator::GreaterEq, 2),
        (b'<', _) => (Operator::Less, 1),
        (b'>', _) => (Operator::Greater, 1),
        (b'=', _) => (Operator::Eq, 1),
        (b'+', _) => (Operator::Add, 1),
        (b'-', _) => (Operator::Sub, 1),
        (b'*', _) => (Operator::Mul, 1),
        (b'/', _) => (Operator::Div, 1),
        (b'^', _) => (Operator::Pow, 1),
        (b'%', _) => (Operator::Percent, 1),
        _ => return None,
    };
    Some(op)
}
