//! Recursive-descent parser producing the expression tree.
//!
//! Precedence, loosest first: ternary, `||`, `&&`, equality, relational and
//! `in`, additive, multiplicative, unary, then postfix member access,
//! indexing and `|transform` pipes.

use serde_json::Value;

use super::lexer::{tokenize, Spanned, Token};
use crate::error::ConditionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Identifier(String),
    Array(Vec<Expr>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Transform {
        input: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
}

/// Deepest nesting a condition may use, counted both while parsing
/// (parentheses, unary operators, ternaries, brackets and transform
/// arguments) and in the resulting tree.
pub const MAX_DEPTH: usize = 64;

/// Parses a whole condition string.
pub fn parse(source: &str) -> Result<Expr, ConditionError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ConditionError::Parse {
            offset: 0,
            message: "empty expression".to_string(),
        });
    }

    let mut parser = Parser {
        tokens,
        position: 0,
        end: source.len(),
        depth: 0,
    };
    let expr = parser.expression()?;

    if let Some(extra) = parser.tokens.get(parser.position) {
        return Err(ConditionError::Parse {
            offset: extra.offset,
            message: format!("unexpected trailing {:?}", extra.token),
        });
    }

    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.position)
            .map(|s| s.offset)
            .unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).map(|s| s.token.clone());
        self.position += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ConditionError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}", expected)))
        }
    }

    fn error(&self, message: String) -> ConditionError {
        let found = match self.peek() {
            Some(token) => format!("{:?}", token),
            None => "end of input".to_string(),
        };
        ConditionError::Parse {
            offset: self.offset(),
            message: format!("{}, found {}", message, found),
        }
    }

    fn descend(&mut self) -> Result<(), ConditionError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.too_deep());
        }
        self.depth += 1;
        Ok(())
    }

    fn too_deep(&self) -> ConditionError {
        ConditionError::Parse {
            offset: self.offset(),
            message: format!("expression nested deeper than {} levels", MAX_DEPTH),
        }
    }

    /// Rejects a freshly built node whose tree is too deep to walk safely.
    fn bounded(&self, expr: Expr) -> Result<Expr, ConditionError> {
        if depth(&expr) > MAX_DEPTH {
            return Err(self.too_deep());
        }
        Ok(expr)
    }

    fn expression(&mut self) -> Result<Expr, ConditionError> {
        self.descend()?;
        let expr = self.ternary();
        self.depth -= 1;
        expr
    }

    fn ternary(&mut self) -> Result<Expr, ConditionError> {
        let condition = self.or()?;
        if self.eat(&Token::Question) {
            let then = self.expression()?;
            self.expect(Token::Colon)?;
            let otherwise = self.expression()?;
            return self.bounded(Expr::Conditional(
                Box::new(condition),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(condition)
    }

    fn or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = self.bounded(Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right)))?;
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.equality()?;
        while self.eat(&Token::And) {
            let right = self.equality()?;
            left = self.bounded(Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right)))?;
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::NotEq,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.relational()?;
            left = self.bounded(Expr::Binary(op, Box::new(left), Box::new(right)))?;
        }
    }

    fn relational(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::LtEq) => BinaryOp::LtEq,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::GtEq) => BinaryOp::GtEq,
                Some(Token::In) => BinaryOp::In,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.additive()?;
            left = self.bounded(Expr::Binary(op, Box::new(left), Box::new(right)))?;
        }
    }

    fn additive(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.multiplicative()?;
            left = self.bounded(Expr::Binary(op, Box::new(left), Box::new(right)))?;
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.unary()?;
            left = self.bounded(Expr::Binary(op, Box::new(left), Box::new(right)))?;
        }
    }

    fn unary(&mut self) -> Result<Expr, ConditionError> {
        let op = if self.eat(&Token::Not) {
            UnaryOp::Not
        } else if self.eat(&Token::Minus) {
            UnaryOp::Neg
        } else {
            return self.postfix();
        };

        self.descend()?;
        let operand = self.unary();
        self.depth -= 1;
        self.bounded(Expr::Unary(op, Box::new(operand?)))
    }

    fn postfix(&mut self) -> Result<Expr, ConditionError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = self.identifier()?;
                expr = self.bounded(Expr::Member(Box::new(expr), name))?;
            } else if self.eat(&Token::LBracket) {
                let index = self.expression()?;
                self.expect(Token::RBracket)?;
                expr = self.bounded(Expr::Index(Box::new(expr), Box::new(index)))?;
            } else if self.eat(&Token::Pipe) {
                let name = self.identifier()?;
                let args = if self.eat(&Token::LParen) {
                    self.arguments(Token::RParen)?
                } else {
                    Vec::new()
                };
                expr = self.bounded(Expr::Transform {
                    input: Box::new(expr),
                    name,
                    args,
                })?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn identifier(&mut self) -> Result<String, ConditionError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.position += 1;
                Ok(name)
            }
            _ => Err(self.error("expected identifier".to_string())),
        }
    }

    /// Comma separated expressions up to and including `close`.
    fn arguments(&mut self, close: Token) -> Result<Vec<Expr>, ConditionError> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }

    fn primary(&mut self) -> Result<Expr, ConditionError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number_literal(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Ident(name)) => Ok(Expr::Identifier(name)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let items = self.arguments(Token::RBracket)?;
                self.bounded(Expr::Array(items))
            }
            Some(other) => Err(ConditionError::Parse {
                offset,
                message: format!("unexpected {:?}", other),
            }),
            None => Err(ConditionError::Parse {
                offset,
                message: "unexpected end of input".to_string(),
            }),
        }
    }
}

/// Height of the tree rooted at `expr`. Only called on children that already
/// passed [`Parser::bounded`], so the recursion stays shallow.
fn depth(expr: &Expr) -> usize {
    let below = match expr {
        Expr::Literal(_) | Expr::Identifier(_) => 0,
        Expr::Array(items) => items.iter().map(depth).max().unwrap_or(0),
        Expr::Member(inner, _) | Expr::Unary(_, inner) => depth(inner),
        Expr::Index(left, right) | Expr::Binary(_, left, right) => depth(left).max(depth(right)),
        Expr::Conditional(condition, then, otherwise) => {
            depth(condition).max(depth(then)).max(depth(otherwise))
        }
        Expr::Transform { input, args, .. } => {
            args.iter().map(depth).fold(depth(input), usize::max)
        }
    };
    below + 1
}

/// Integral literals stay integers so they compare cleanly with context values.
fn number_literal(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
