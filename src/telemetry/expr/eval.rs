//! Tree-walking evaluator.

use crate::telemetry::context::{RequestContext, SubgraphContext};
use crate::telemetry::expr::parser::{Accessor, BinaryOp, Expr, Function, TraceTiming};
use crate::telemetry::expr::{ExprError, Value};

pub struct Evaluator<'a> {
    pub request: &'a RequestContext,
    pub subgraph: Option<&'a SubgraphContext>,
}

impl Evaluator<'_> {
    pub fn eval(&self, expr: &Expr) -> Result<Value, ExprError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Access(accessor) => Ok(self.access(accessor)),
            Expr::Call(function, args) => {
                let arg = match args.first() {
                    Some(arg) => self.eval(arg)?,
                    None => Value::Nil,
                };
                call(*function, arg)
            }
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.as_bool("!")?)),
            Expr::Binary(op, left, right) => self.binary(*op, left, right),
            Expr::Coalesce(left, right) => match self.eval(left)? {
                Value::Nil => self.eval(right),
                value => Ok(value),
            },
            Expr::Conditional(condition, then, otherwise) => {
                if self.eval(condition)?.as_bool("?:")? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, ExprError> {
        match op {
            BinaryOp::And => {
                if !self.eval(left)?.as_bool("&&")? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(right)?.as_bool("&&")?))
            }
            BinaryOp::Or => {
                if self.eval(left)?.as_bool("||")? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(right)?.as_bool("||")?))
            }
            BinaryOp::Eq => Ok(Value::Bool(self.eval(left)? == self.eval(right)?)),
            BinaryOp::Ne => Ok(Value::Bool(self.eval(left)? != self.eval(right)?)),
            BinaryOp::Add => match (self.eval(left)?, self.eval(right)?) {
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
                (Value::Int(a), Value::Int(b)) => a
                    .checked_add(b)
                    .map(Value::Int)
                    .ok_or_else(|| ExprError::TypeMismatch("integer overflow in '+'".to_string())),
                (a, b) => Err(ExprError::TypeMismatch(format!(
                    "cannot add {} and {}",
                    a.type_name(),
                    b.type_name()
                ))),
            },
        }
    }

    fn access(&self, accessor: &Accessor) -> Value {
        let request = self.request;
        let operation = &request.operation;
        match accessor {
            // a missing header reads as nil so `??` can supply a fallback
            Accessor::RequestHeader(name) => {
                request.header(name).map_or(Value::Nil, |v| Value::Str(v.to_string()))
            }
            Accessor::RequestMethod => Value::Str(request.method.clone()),
            Accessor::RequestPath => Value::Str(request.path.clone()),
            Accessor::RequestHost => Value::Str(request.host.clone()),
            Accessor::RequestError => Value::from(request.error.clone()),
            Accessor::AuthClaim(path) => {
                request.claim(path).map(Value::from_json).unwrap_or(Value::Nil)
            }
            Accessor::TraceSampled => Value::Bool(request.trace_sampled),
            Accessor::OperationName => Value::from(operation.name.clone()),
            Accessor::OperationType => {
                Value::from(operation.operation_type.map(|t| t.as_str().to_string()))
            }
            Accessor::OperationHash => Value::from(operation.hash.clone()),
            Accessor::OperationSha256 => Value::from(operation.sha256.clone()),
            Accessor::OperationPersistedId => Value::from(operation.persisted_id.clone()),
            Accessor::ClientName => Value::Str(request.client.name.clone()),
            Accessor::ClientVersion => Value::Str(request.client.version.clone()),
            Accessor::SubgraphName => {
                self.subgraph.map_or(Value::Nil, |s| Value::Str(s.name.clone()))
            }
            Accessor::SubgraphId => self.subgraph.map_or(Value::Nil, |s| Value::Str(s.id.clone())),
            Accessor::SubgraphError => {
                self.subgraph.map_or(Value::Nil, |s| Value::from(s.error.clone()))
            }
            Accessor::ClientTrace(timing) => {
                let trace = match self.subgraph {
                    Some(subgraph) => subgraph.client_trace,
                    None => return Value::Nil,
                };
                let duration = match timing {
                    TraceTiming::ConnAcquire => trace.conn_acquire,
                    TraceTiming::Dns => trace.dns,
                    TraceTiming::Tls => trace.tls,
                    TraceTiming::Fetch => trace.fetch,
                };
                duration.map_or(Value::Nil, |d| {
                    Value::Int(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
                })
            }
        }
    }
}

fn call(function: Function, arg: Value) -> Result<Value, ExprError> {
    match function {
        Function::String => Ok(Value::Str(arg.to_string())),
        Function::Upper => Ok(Value::Str(arg.as_str("upper")?.to_uppercase())),
        Function::Lower => Ok(Value::Str(arg.as_str("lower")?.to_lowercase())),
        Function::Trim => Ok(Value::Str(arg.as_str("trim")?.trim().to_string())),
        Function::Int => match arg {
            Value::Int(n) => Ok(Value::Int(n)),
            Value::Bool(b) => Ok(Value::Int(i64::from(b))),
            Value::Str(s) => s
                .trim()
                .parse()
                .map(Value::Int)
                .map_err(|_| ExprError::InvalidInt(s)),
            Value::Nil => Err(ExprError::TypeMismatch("int() of nil".to_string())),
        },
    }
}
