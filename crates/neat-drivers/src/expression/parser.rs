use std::iter::Peekable;
use std::vec::IntoIter;

use super::lexer::{Token, TokenKind};
use super::{ExpressionError, Logical, Node, Operand};

/// Deepest nesting of parentheses and `!` the parser accepts.
const MAX_NESTING: usize = 64;

pub(super) struct Parser {
    tokens: Peekable<IntoIter<Token>>,
    depth: usize,
}

impl Parser {
    pub(super) fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens: tokens.into_iter().peekable(),
            depth: 0,
        }
    }

    /// Runs `parse` one nesting level deeper.
    fn nested(
        &mut self,
        offset: usize,
        parse: impl FnOnce(&mut Self) -> Result<Node, ExpressionError>,
    ) -> Result<Node, ExpressionError> {
        if self.depth >= MAX_NESTING {
            return Err(ExpressionError::TooDeep {
                limit: MAX_NESTING,
                offset,
            });
        }
        self.depth += 1;
        let node = parse(self);
        self.depth -= 1;
        node
    }

    pub(super) fn parse(mut self) -> Result<Node, ExpressionError> {
        let root = self.logic(Logical::Or)?;
        match self.tokens.next() {
            None => Ok(root),
            Some(token) => Err(unexpected(&token)),
        }
    }

    /// Parses a left-associative chain of `op`; `||` chains `&&` chains.
    fn logic(&mut self, op: Logical) -> Result<Node, ExpressionError> {
        let operand = |parser: &mut Self| match op {
            Logical::Or => parser.logic(Logical::And),
            Logical::And => parser.comparison(),
        };
        let mut node = operand(self)?;
        while self
            .tokens
            .next_if(|token| token.kind == TokenKind::Logic(op))
            .is_some()
        {
            node = Node::Logic {
                op,
                left: Box::new(node),
                right: Box::new(operand(self)?),
            };
        }
        Ok(node)
    }

    fn comparison(&mut self) -> Result<Node, ExpressionError> {
        let left = self.unary()?;
        let op = match self.tokens.peek() {
            Some(Token {
                kind: TokenKind::Compare(op),
                ..
            }) => *op,
            _ => return Ok(left),
        };
        self.tokens.next();
        Ok(Node::Compare {
            op,
            left: Box::new(left),
            right: Box::new(self.unary()?),
        })
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        if let Some(bang) = self.tokens.next_if(|token| token.kind == TokenKind::Bang) {
            return self
                .nested(bang.offset, Self::unary)
                .map(|inner| Node::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Node, ExpressionError> {
        let token = self.tokens.next().ok_or(ExpressionError::UnexpectedEnd)?;
        match token.kind {
            TokenKind::Number(value) => Ok(Node::Literal(Operand::Number(value))),
            TokenKind::Text(value) => Ok(Node::Literal(Operand::Text(value))),
            TokenKind::True => Ok(Node::Literal(Operand::Bool(true))),
            TokenKind::False => Ok(Node::Literal(Operand::Bool(false))),
            TokenKind::Null => Ok(Node::Literal(Operand::Null)),
            TokenKind::Ident(name) => Ok(Node::Field(name)),
            TokenKind::LeftParen => self.nested(token.offset, Self::group),
            TokenKind::Bang
            | TokenKind::RightParen
            | TokenKind::Compare(_)
            | TokenKind::Logic(_) => Err(unexpected(&token)),
        }
    }

    /// Parses the inside of a parenthesised group and its closing `)`.
    fn group(&mut self) -> Result<Node, ExpressionError> {
        let inner = self.logic(Logical::Or)?;
        match self.tokens.next() {
            Some(Token {
                kind: TokenKind::RightParen,
                ..
            }) => Ok(inner),
            Some(other) => Err(unexpected(&other)),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

fn unexpected(token: &Token) -> ExpressionError {
    ExpressionError::UnexpectedToken {
        found: token.kind.to_string(),
        offset: token.offset,
    }
}
