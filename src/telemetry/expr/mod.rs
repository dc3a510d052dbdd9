//! Attribute expressions.
//!
//! A small expression language over a fixed request/subgraph schema:
//!
//! ```text
//! request.header.Get('x-tenant') ?? 'unknown'
//! request.error != nil ? "error" : "success"
//! upper(request.client.name)
//! subgraph.request.clientTrace.connAcquireDuration
//! ```
//!
//! Expressions are compiled once when the config is loaded. Unknown fields,
//! unknown functions and syntax errors are reported at compile time, so a
//! bad expression keeps the router from starting rather than silently
//! dropping attributes.

mod eval;
mod lexer;
mod parser;

use serde_json::Value as Json;

use crate::telemetry::context::{RequestContext, SubgraphContext};
use crate::telemetry::model::AttributeValue;

pub use parser::{Accessor, TraceTiming};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    #[error("unexpected character {ch:?} at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid number {0:?}")]
    InvalidNumber(String),

    #[error("unexpected {found} at offset {offset}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
        offset: usize,
    },

    #[error("unknown field {0:?}")]
    UnknownPath(String),

    #[error("unknown function {0:?}")]
    UnknownFunction(String),

    #[error("function {function} takes {expected} argument(s), got {found}")]
    Arity {
        function: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("cannot convert {0:?} to int")]
    InvalidInt(String),
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
        }
    }

    fn as_bool(&self, op: &str) -> Result<bool, ExprError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(ExprError::TypeMismatch(format!(
                "{op} expects bool, got {}",
                other.type_name()
            ))),
        }
    }

    fn as_str(&self, function: &str) -> Result<&str, ExprError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(ExprError::TypeMismatch(format!(
                "{function}() expects string, got {}",
                other.type_name()
            ))),
        }
    }

    fn from_json(value: &Json) -> Self {
        match value {
            Json::Null => Value::Nil,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => {
                n.as_i64().map(Value::Int).unwrap_or_else(|| Value::Str(n.to_string()))
            }
            Json::String(s) => Value::Str(s.clone()),
            other => Value::Str(other.to_string()),
        }
    }

    /// Attribute value, or `None` for nil and empty strings.
    pub fn into_attribute(self) -> Option<AttributeValue> {
        match self {
            Value::Nil => None,
            Value::Str(s) if s.is_empty() => None,
            Value::Str(s) => Some(AttributeValue::String(s)),
            Value::Bool(b) => Some(AttributeValue::Bool(b)),
            Value::Int(n) => Some(AttributeValue::Int(n)),
        }
    }
}

impl From<Option<String>> for Value {
    fn from(value: Option<String>) -> Self {
        value.map_or(Value::Nil, Value::Str)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => f.write_str("<nil>"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

/// A compiled expression.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: parser::Expr,
    uses_subgraph: bool,
    reads_sha256: bool,
}

impl Expression {
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        let tokens = lexer::tokenize(source)?;
        let root = parser::Parser::new(tokens).parse()?;

        let mut uses_subgraph = false;
        let mut reads_sha256 = false;
        root.accessors(&mut |accessor| {
            uses_subgraph |= accessor.is_subgraph();
            reads_sha256 |= *accessor == Accessor::OperationSha256;
        });

        Ok(Self {
            source: source.to_string(),
            root,
            uses_subgraph,
            reads_sha256,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the expression reads subgraph fields.
    pub fn uses_subgraph(&self) -> bool {
        self.uses_subgraph
    }

    /// Whether the expression reads the operation SHA-256.
    pub fn reads_sha256(&self) -> bool {
        self.reads_sha256
    }

    /// Evaluate against a request, and a subgraph fetch if there is one.
    pub fn evaluate(
        &self,
        request: &RequestContext,
        subgraph: Option<&SubgraphContext>,
    ) -> Result<Value, ExprError> {
        eval::Evaluator { request, subgraph }.eval(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::context::ClientTrace;
    use serde_json::json;
    use std::time::Duration;

    fn eval(source: &str, request: &RequestContext) -> Result<Value, ExprError> {
        Expression::compile(source).unwrap().evaluate(request, None)
    }

    #[test]
    fn reads_headers_case_insensitively() {
        let request = RequestContext::new("POST", "/graphql").with_header("X-Tenant", "acme");
        assert_eq!(eval("request.header.Get('x-tenant')", &request), Ok(Value::Str("acme".into())));
        assert_eq!(eval("request.header.Get('missing')", &request), Ok(Value::Nil));
    }

    #[test]
    fn missing_header_takes_the_fallback() {
        let source = "request.header.Get('x-tenant') ?? 'unknown'";
        let anonymous = RequestContext::new("POST", "/graphql");
        assert_eq!(eval(source, &anonymous), Ok(Value::Str("unknown".into())));

        let tenant = anonymous.clone().with_header("x-tenant", "acme");
        assert_eq!(eval(source, &tenant), Ok(Value::Str("acme".into())));
    }

    #[test]
    fn coalesce_falls_back_on_nil() {
        let request = RequestContext::new("POST", "/graphql");
        assert_eq!(
            eval("request.error ?? request.url.method", &request),
            Ok(Value::Str("POST".into()))
        );

        let failed = request.clone().with_error("subgraph timeout");
        assert_eq!(
            eval("request.error ?? request.url.method", &failed),
            Ok(Value::Str("subgraph timeout".into()))
        );
        assert_eq!(
            eval("request.error != nil ? 'error' : 'success'", &failed),
            Ok(Value::Str("error".into()))
        );
    }

    #[test]
    fn functions_and_concatenation() {
        let request = RequestContext::new("get", "/graphql").with_header("x-name", "  Acme ");
        assert_eq!(
            eval("upper(request.url.method) + ':' + trim(request.header.Get('x-name'))", &request),
            Ok(Value::Str("GET:Acme".into()))
        );
        assert_eq!(eval("string(int('42') + 1)", &request), Ok(Value::Str("43".into())));
        assert_eq!(eval("string(int('a'))", &request), Err(ExprError::InvalidInt("a".into())));
    }

    #[test]
    fn logical_operators_need_booleans() {
        let request = RequestContext::new("POST", "/graphql");
        assert_eq!(eval("!request.trace.sampled && true", &request), Ok(Value::Bool(true)));
        assert!(matches!(
            eval("request.url.method || true", &request),
            Err(ExprError::TypeMismatch(_))
        ));
    }

    #[test]
    fn reads_claims() {
        let request = RequestContext::new("POST", "/graphql")
            .with_claims(json!({"sub": "user-1", "tier": 3}));
        assert_eq!(eval("request.auth.claims.sub", &request), Ok(Value::Str("user-1".into())));
        assert_eq!(eval("request.auth.claims.tier", &request), Ok(Value::Int(3)));
        assert_eq!(eval("request.auth.claims.missing", &request), Ok(Value::Nil));
    }

    #[test]
    fn subgraph_fields_need_a_fetch() {
        let expression =
            Expression::compile("subgraph.request.clientTrace.connAcquireDuration").unwrap();
        assert!(expression.uses_subgraph());

        let request = RequestContext::new("POST", "/graphql");
        assert_eq!(expression.evaluate(&request, None), Ok(Value::Nil));

        let mut subgraph = SubgraphContext::new("employees", "0");
        subgraph.client_trace = ClientTrace {
            conn_acquire: Some(Duration::from_micros(250)),
            ..ClientTrace::default()
        };
        assert_eq!(expression.evaluate(&request, Some(&subgraph)), Ok(Value::Int(250_000)));
    }

    #[test]
    fn detects_sha256_usage() {
        assert!(Expression::compile("request.operation.sha256 ?? ''").unwrap().reads_sha256());
        assert!(!Expression::compile("request.operation.hash").unwrap().reads_sha256());
    }

    #[test]
    fn empty_values_are_not_attributes() {
        assert_eq!(Value::Str(String::new()).into_attribute(), None);
        assert_eq!(Value::Nil.into_attribute(), None);
        assert_eq!(Value::Int(1).into_attribute(), Some(AttributeValue::Int(1)));
    }
}
