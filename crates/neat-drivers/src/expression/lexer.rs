use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use super::{Comparison, ExpressionError, Logical};

#[derive(Debug, Clone, PartialEq)]
pub(super) enum TokenKind {
    Number(f64),
    Text(String),
    Ident(String),
    True,
    False,
    Null,
    Bang,
    LeftParen,
    RightParen,
    Compare(Comparison),
    Logic(Logical),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(formatter, "number {value}"),
            Self::Text(value) => write!(formatter, "string \"{value}\""),
            Self::Ident(name) => write!(formatter, "identifier '{name}'"),
            Self::True => formatter.write_str("'true'"),
            Self::False => formatter.write_str("'false'"),
            Self::Null => formatter.write_str("'null'"),
            Self::Bang => formatter.write_str("'!'"),
            Self::LeftParen => formatter.write_str("'('"),
            Self::RightParen => formatter.write_str("')'"),
            Self::Compare(op) => write!(formatter, "'{}'", op.symbol()),
            Self::Logic(op) => write!(formatter, "'{}'", op.symbol()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Token {
    pub(super) kind: TokenKind,
    pub(super) offset: usize,
}

pub(super) fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut chars = source.char_indices().peekable();
    let mut tokens = Vec::new();
    while let Some(&(offset, current)) = chars.peek() {
        if current.is_whitespace() {
            chars.next();
            continue;
        }
        let kind = match current {
            '(' => single(&mut chars, TokenKind::LeftParen),
            ')' => single(&mut chars, TokenKind::RightParen),
            '"' | '\'' => text(&mut chars, offset)?,
            '0'..='9' | '.' | '-' => number(&mut chars, offset)?,
            '=' | '!' | '<' | '>' | '&' | '|' => operator(&mut chars, offset)?,
            c if c.is_alphabetic() || c == '_' => word(&mut chars),
            found => return Err(ExpressionError::UnexpectedCharacter { found, offset }),
        };
        tokens.push(Token { kind, offset });
    }
    Ok(tokens)
}

type Chars<'a> = Peekable<CharIndices<'a>>;

fn single(chars: &mut Chars<'_>, kind: TokenKind) -> TokenKind {
    chars.next();
    kind
}

fn text(chars: &mut Chars<'_>, offset: usize) -> Result<TokenKind, ExpressionError> {
    let quote = chars.next().map(|(_, c)| c);
    let mut value = String::new();
    let mut escaped = false;
    for (_, c) in chars.by_ref() {
        match c {
            _ if escaped => {
                value.push(c);
                escaped = false;
            }
            '\\' => escaped = true,
            _ if Some(c) == quote => return Ok(TokenKind::Text(value)),
            _ => value.push(c),
        }
    }
    Err(ExpressionError::UnterminatedString { offset })
}

fn number(chars: &mut Chars<'_>, offset: usize) -> Result<TokenKind, ExpressionError> {
    let mut literal = String::new();
    if let Some((_, '-')) = chars.peek() {
        literal.push('-');
        chars.next();
    }
    while let Some(&(_, c)) = chars.peek() {
        let exponent_sign = (c == '-' || c == '+') && literal.ends_with(['e', 'E']);
        if !(c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '_') || exponent_sign) {
            break;
        }
        if c != '_' {
            literal.push(c);
        }
        chars.next();
    }
    literal
        .parse()
        .map(TokenKind::Number)
        .map_err(|_| ExpressionError::InvalidNumber {
            text: literal,
            offset,
        })
}

fn operator(chars: &mut Chars<'_>, offset: usize) -> Result<TokenKind, ExpressionError> {
    let first = chars.next().map_or(' ', |(_, c)| c);
    let second = chars.next_if(|&(_, c)| {
        matches!(
            (first, c),
            ('=' | '!' | '<' | '>', '=') | ('&', '&') | ('|', '|')
        )
    });
    let kind = match (first, second.map(|(_, c)| c)) {
        ('=', Some('=')) => TokenKind::Compare(Comparison::Eq),
        ('!', Some('=')) => TokenKind::Compare(Comparison::Ne),
        ('<', Some('=')) => TokenKind::Compare(Comparison::Le),
        ('>', Some('=')) => TokenKind::Compare(Comparison::Ge),
        ('<', None) => TokenKind::Compare(Comparison::Lt),
        ('>', None) => TokenKind::Compare(Comparison::Gt),
        ('!', None) => TokenKind::Bang,
        ('&', Some('&')) => TokenKind::Logic(Logical::And),
        ('|', Some('|')) => TokenKind::Logic(Logical::Or),
        (found, _) => return Err(ExpressionError::UnexpectedCharacter { found, offset }),
    };
    Ok(kind)
}

fn word(chars: &mut Chars<'_>) -> TokenKind {
    let mut name = String::new();
    while let Some((_, c)) = chars.next_if(|&(_, c)| c.is_alphanumeric() || c == '_') {
        name.push(c);
    }
    match name.as_str() {
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        _ => TokenKind::Ident(name),
    }
}
