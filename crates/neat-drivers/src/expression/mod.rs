//! Comparison expressions evaluated against a test's result record.
//!
//! The grammar, loosest binding first:
//!
//! ```text
//! or         := and ( "||" and )*
//! and        := comparison ( "&&" comparison )*
//! comparison := unary ( ( "==" | "!=" | "<" | "<=" | ">" | ">=" ) unary )?
//! unary      := "!" unary | primary
//! primary    := number | string | "true" | "false" | "null"
//!             | identifier | "(" or ")"
//! ```
//!
//! Parentheses and `!` nest at most 64 levels deep.
//!
//! Identifiers name fields of the result record. Numbers compare numerically,
//! strings lexically, and booleans and `null` only for equality. The whole
//! expression must produce a boolean.

mod lexer;
mod parser;

use std::cmp::Ordering;

use neat_core::ResultRecord;
use serde_json::Value as Json;
use thiserror::Error;

use self::parser::Parser;

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    /// A character that starts no token.
    #[error("unexpected character '{found}' at offset {offset}")]
    UnexpectedCharacter {
        /// Offending character.
        found: char,
        /// Byte offset in the expression.
        offset: usize,
    },
    /// A string literal without its closing quote.
    #[error("unterminated string starting at offset {offset}")]
    UnterminatedString {
        /// Byte offset of the opening quote.
        offset: usize,
    },
    /// A numeric literal that does not parse.
    #[error("invalid number '{text}' at offset {offset}")]
    InvalidNumber {
        /// Literal text.
        text: String,
        /// Byte offset in the expression.
        offset: usize,
    },
    /// A token where the grammar expected something else.
    #[error("unexpected {found} at offset {offset}")]
    UnexpectedToken {
        /// Description of the token.
        found: String,
        /// Byte offset in the expression.
        offset: usize,
    },
    /// The expression ended early.
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    /// Parentheses or `!` nested past the parser's limit.
    #[error("expression nested deeper than {limit} levels at offset {offset}")]
    TooDeep {
        /// Deepest nesting accepted.
        limit: usize,
        /// Byte offset of the token that went too deep.
        offset: usize,
    },
    /// An identifier that is not a field of the result.
    #[error("unknown field '{name}'")]
    UnknownField {
        /// Identifier.
        name: String,
    },
    /// A result field holding an array or object.
    #[error("field '{name}' holds a {kind}, which cannot be compared")]
    UnsupportedField {
        /// Identifier.
        name: String,
        /// JSON type of the value.
        kind: &'static str,
    },
    /// An operator applied to operands it does not accept.
    #[error("cannot apply '{operator}' to {left} and {right}")]
    TypeMismatch {
        /// Operator symbol.
        operator: &'static str,
        /// Type of the left operand.
        left: &'static str,
        /// Type of the right operand.
        right: &'static str,
    },
    /// `!`, `&&` or `||` applied to a non-boolean.
    #[error("'{operator}' expects a bool, found {found}")]
    NotBoolean {
        /// Operator symbol.
        operator: &'static str,
        /// Type of the operand.
        found: &'static str,
    },
    /// The expression produced a non-boolean.
    #[error("expression did not evaluate to bool (found {found})")]
    NonBooleanResult {
        /// Type of the result.
        found: &'static str,
    },
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    root: Node,
}

impl Expression {
    /// Parses `source`.
    ///
    /// # Errors
    ///
    /// Returns an [`ExpressionError`] describing the first syntax error.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = lexer::tokenize(source)?;
        let root = Parser::new(tokens).parse()?;
        Ok(Self { root })
    }

    /// Evaluates the expression against a result record.
    ///
    /// # Errors
    ///
    /// Returns an [`ExpressionError`] when a field is missing, operands have
    /// incompatible types, or the result is not a boolean.
    pub fn evaluate(&self, record: &ResultRecord) -> Result<bool, ExpressionError> {
        match self.root.evaluate(record)? {
            Operand::Bool(value) => Ok(value),
            other => Err(ExpressionError::NonBooleanResult {
                found: other.type_name(),
            }),
        }
    }
}

/// Parses and evaluates `source` in one step.
///
/// # Errors
///
/// Returns the parse or evaluation error.
pub fn evaluate(source: &str, record: &ResultRecord) -> Result<bool, ExpressionError> {
    Expression::parse(source)?.evaluate(record)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    const fn is_equality(self) -> bool {
        matches!(self, Self::Eq | Self::Ne)
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Logical {
    And,
    Or,
}

impl Logical {
    const fn symbol(self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Literal(Operand),
    Field(String),
    Not(Box<Node>),
    Compare {
        op: Comparison,
        left: Box<Node>,
        right: Box<Node>,
    },
    Logic {
        op: Logical,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn evaluate(&self, record: &ResultRecord) -> Result<Operand, ExpressionError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Field(name) => field(record, name),
            Self::Not(inner) => inner
                .evaluate(record)?
                .as_bool("!")
                .map(|value| Operand::Bool(!value)),
            Self::Compare { op, left, right } => {
                compare(*op, &left.evaluate(record)?, &right.evaluate(record)?)
                    .map(Operand::Bool)
            }
            Self::Logic { op, left, right } => {
                let lhs = left.evaluate(record)?.as_bool(op.symbol())?;
                let short_circuit = match op {
                    Logical::And => !lhs,
                    Logical::Or => lhs,
                };
                if short_circuit {
                    return Ok(Operand::Bool(lhs));
                }
                right
                    .evaluate(record)?
                    .as_bool(op.symbol())
                    .map(Operand::Bool)
            }
        }
    }
}

/// A value during evaluation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
}

impl Operand {
    const fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Text(_) => "string",
            Self::Bool(_) => "bool",
            Self::Null => "null",
        }
    }

    fn as_bool(&self, operator: &'static str) -> Result<bool, ExpressionError> {
        match self {
            Self::Bool(value) => Ok(*value),
            other => Err(ExpressionError::NotBoolean {
                operator,
                found: other.type_name(),
            }),
        }
    }
}

fn field(record: &ResultRecord, name: &str) -> Result<Operand, ExpressionError> {
    let value = record
        .get(name)
        .ok_or_else(|| ExpressionError::UnknownField {
            name: name.to_owned(),
        })?;
    match value {
        Json::Null => Ok(Operand::Null),
        Json::Bool(flag) => Ok(Operand::Bool(*flag)),
        Json::Number(number) => number.as_f64().map(Operand::Number).ok_or_else(|| {
            ExpressionError::UnsupportedField {
                name: name.to_owned(),
                kind: "number",
            }
        }),
        Json::String(text) => Ok(Operand::Text(text.clone())),
        Json::Array(_) => Err(ExpressionError::UnsupportedField {
            name: name.to_owned(),
            kind: "array",
        }),
        Json::Object(_) => Err(ExpressionError::UnsupportedField {
            name: name.to_owned(),
            kind: "object",
        }),
    }
}

fn compare(op: Comparison, left: &Operand, right: &Operand) -> Result<bool, ExpressionError> {
    let mismatch = || ExpressionError::TypeMismatch {
        operator: op.symbol(),
        left: left.type_name(),
        right: right.type_name(),
    };
    let ordering = match (left, right) {
        (Operand::Number(lhs), Operand::Number(rhs)) => lhs.partial_cmp(rhs),
        (Operand::Text(lhs), Operand::Text(rhs)) => Some(lhs.cmp(rhs)),
        (Operand::Bool(lhs), Operand::Bool(rhs)) if op.is_equality() => Some(lhs.cmp(rhs)),
        (Operand::Null, Operand::Null) if op.is_equality() => Some(Ordering::Equal),
        (Operand::Null, _) | (_, Operand::Null) if op.is_equality() => Some(Ordering::Less),
        _ => return Err(mismatch()),
    };
    // NaN compares unequal to everything.
    Ok(ordering.map_or(op == Comparison::Ne, |found| op.holds(found)))
}
