//! Recursive-descent parser.
//!
//! Grammar, lowest precedence first:
//! ```text
//! expr        = coalesce ( "?" expr ":" expr )?
//! coalesce    = or ( "??" or )*
//! or          = and ( "||" and )*
//! and         = equality ( "&&" equality )*
//! equality    = additive ( ( "==" | "!=" ) additive )*
//! additive    = unary ( "+" unary )*
//! unary       = "!" unary | primary
//! primary     = literal | "(" expr ")" | function "(" args ")" | path
//! ```
//! Paths are resolved to accessors here, so an unknown field is a compile error.

use crate::telemetry::expr::lexer::{Spanned, Token};
use crate::telemetry::expr::{ExprError, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceTiming {
    ConnAcquire,
    Dns,
    Tls,
    Fetch,
}

/// A field of the evaluation context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    RequestHeader(String),
    RequestMethod,
    RequestPath,
    RequestHost,
    RequestError,
    AuthClaim(Vec<String>),
    TraceSampled,
    OperationName,
    OperationType,
    OperationHash,
    OperationSha256,
    OperationPersistedId,
    ClientName,
    ClientVersion,
    SubgraphName,
    SubgraphId,
    SubgraphError,
    ClientTrace(TraceTiming),
}

impl Accessor {
    pub fn is_subgraph(&self) -> bool {
        matches!(
            self,
            Accessor::SubgraphName
                | Accessor::SubgraphId
                | Accessor::SubgraphError
                | Accessor::ClientTrace(_)
        )
    }

    fn resolve(path: &[String]) -> Result<Self, ExprError> {
        let segments: Vec<&str> = path.iter().map(String::as_str).collect();
        let accessor = match segments.as_slice() {
            ["request", "url", "method"] => Accessor::RequestMethod,
            ["request", "url", "path"] => Accessor::RequestPath,
            ["request", "url", "host"] => Accessor::RequestHost,
            ["request", "error"] => Accessor::RequestError,
            ["request", "auth", "claims", rest @ ..] if !rest.is_empty() => {
                Accessor::AuthClaim(rest.iter().map(|s| s.to_string()).collect())
            }
            ["request", "trace", "sampled"] => Accessor::TraceSampled,
            ["request", "operation", "name"] => Accessor::OperationName,
            ["request", "operation", "type"] => Accessor::OperationType,
            ["request", "operation", "hash"] => Accessor::OperationHash,
            ["request", "operation", "sha256"] => Accessor::OperationSha256,
            ["request", "operation", "persistedId"] => Accessor::OperationPersistedId,
            ["request", "client", "name"] => Accessor::ClientName,
            ["request", "client", "version"] => Accessor::ClientVersion,
            ["subgraph", "name"] => Accessor::SubgraphName,
            ["subgraph", "id"] => Accessor::SubgraphId,
            ["subgraph", "request", "error"] => Accessor::SubgraphError,
            ["subgraph", "request", "clientTrace", timing] => Accessor::ClientTrace(match *timing {
                "connAcquireDuration" => TraceTiming::ConnAcquire,
                "dnsDuration" => TraceTiming::Dns,
                "tlsDuration" => TraceTiming::Tls,
                "fetchDuration" => TraceTiming::Fetch,
                _ => return Err(ExprError::UnknownPath(path.join("."))),
            }),
            _ => return Err(ExprError::UnknownPath(path.join("."))),
        };
        Ok(accessor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    String,
    Upper,
    Lower,
    Trim,
    Int,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Function::String),
            "upper" => Some(Function::Upper),
            "lower" => Some(Function::Lower),
            "trim" => Some(Function::Trim),
            "int" => Some(Function::Int),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::String => "string",
            Function::Upper => "upper",
            Function::Lower => "lower",
            Function::Trim => "trim",
            Function::Int => "int",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    And,
    Or,
    Add,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Access(Accessor),
    Call(Function, Vec<Expr>),
    Not(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Coalesce(Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Visit every accessor in the tree.
    pub fn accessors(&self, visit: &mut impl FnMut(&Accessor)) {
        match self {
            Expr::Literal(_) => {}
            Expr::Access(accessor) => visit(accessor),
            Expr::Call(_, args) => args.iter().for_each(|a| a.accessors(visit)),
            Expr::Not(inner) => inner.accessors(visit),
            Expr::Binary(_, l, r) | Expr::Coalesce(l, r) => {
                l.accessors(visit);
                r.accessors(visit);
            }
            Expr::Conditional(c, t, e) => {
                c.accessors(visit);
                t.accessors(visit);
                e.accessors(visit);
            }
        }
    }
}

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parse a complete expression; trailing tokens are an error.
    pub fn parse(mut self) -> Result<Expr, ExprError> {
        let expr = self.expr()?;
        self.expect(&Token::Eof, "end of expression")?;
        Ok(expr)
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map(|(t, _)| t).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Spanned {
        let token = self.tokens.get(self.pos).cloned().unwrap_or((Token::Eof, 0));
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, expected: &'static str) -> Result<(), ExprError> {
        let (found, offset) = self.advance();
        if &found == token {
            Ok(())
        } else {
            Err(ExprError::UnexpectedToken {
                found: found.to_string(),
                expected,
                offset,
            })
        }
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let condition = self.coalesce()?;
        if !self.eat(&Token::Question) {
            return Ok(condition);
        }
        let then = self.expr()?;
        self.expect(&Token::Colon, "':'")?;
        let otherwise = self.expr()?;
        Ok(Expr::Conditional(Box::new(condition), Box::new(then), Box::new(otherwise)))
    }

    fn coalesce(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.or()?;
        while self.eat(&Token::Coalesce) {
            let right = self.or()?;
            left = Expr::Coalesce(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.equality()?;
        while self.eat(&Token::And) {
            let right = self.equality()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinaryOp::Eq,
                Token::Ne => BinaryOp::Ne,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn additive(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;
        while self.eat(&Token::Plus) {
            let right = self.unary()?;
            left = Expr::Binary(BinaryOp::Add, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let (token, offset) = self.advance();
        match token {
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "nil" => Ok(Expr::Literal(Value::Nil)),
                _ if self.peek() == &Token::LParen => self.call(name),
                _ => self.path(name),
            },
            other => Err(ExprError::UnexpectedToken {
                found: other.to_string(),
                expected: "a value",
                offset,
            }),
        }
    }

    fn call(&mut self, name: String) -> Result<Expr, ExprError> {
        let function = Function::lookup(&name).ok_or(ExprError::UnknownFunction(name))?;
        self.expect(&Token::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.expr()?);
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(&Token::Comma, "',' or ')'")?;
            }
        }
        if args.len() != 1 {
            return Err(ExprError::Arity {
                function: function.name(),
                expected: 1,
                found: args.len(),
            });
        }
        Ok(Expr::Call(function, args))
    }

    fn path(&mut self, root: String) -> Result<Expr, ExprError> {
        let mut segments = vec![root];
        while self.eat(&Token::Dot) {
            let (token, offset) = self.advance();
            match token {
                Token::Ident(segment) => segments.push(segment),
                other => {
                    return Err(ExprError::UnexpectedToken {
                        found: other.to_string(),
                        expected: "a field name",
                        offset,
                    })
                }
            }
        }

        // request.header.Get('name')
        if segments.len() == 3
            && segments[0] == "request"
            && segments[1] == "header"
            && segments[2] == "Get"
        {
            self.expect(&Token::LParen, "'('")?;
            let (token, offset) = self.advance();
            let Token::Str(header) = token else {
                return Err(ExprError::UnexpectedToken {
                    found: token.to_string(),
                    expected: "a header name string",
                    offset,
                });
            };
            self.expect(&Token::RParen, "')'")?;
            return Ok(Expr::Access(Accessor::RequestHeader(header.to_ascii_lowercase())));
        }

        Accessor::resolve(&segments).map(Expr::Access)
    }
}
