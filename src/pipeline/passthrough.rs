//! Lexical engine.
//!
//! Collapses insignificant whitespace, selects the operation to run and
//! checks bracket balance. It does not know any schema; plans are a single
//! fetch of the normalized document. Used when no real engine is attached
//! and as a predictable engine in tests.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;

use crate::pipeline::engine::{
    EngineError, ExecutionPlan, GraphqlEngine, NormalizedOperation, OperationType,
    ValidationOutcome,
};

const PUNCTUATORS: &[char] = &['{', '}', '(', ')', ':', ',', '[', ']', '!', '=', '@', '$', '.'];

#[derive(Debug, Default)]
pub struct PassthroughEngine {
    /// (client name, sha256) → operation text
    persisted: RwLock<HashMap<(String, String), String>>,
}

impl PassthroughEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a persisted operation available to a client.
    pub fn register_persisted(&self, client_name: &str, sha256_hash: &str, text: &str) {
        self.persisted
            .write()
            .insert((client_name.to_string(), sha256_hash.to_string()), text.to_string());
    }
}

impl GraphqlEngine for PassthroughEngine {
    fn normalize(
        &self,
        query: &str,
        operation_name: Option<&str>,
    ) -> Result<NormalizedOperation, EngineError> {
        let content = collapse_whitespace(query);
        if content.is_empty() {
            return Err(EngineError::Parse("empty document".to_string()));
        }

        let operations = scan_operations(&content);
        let (operation_type, name) = match operation_name {
            Some(wanted) => operations
                .into_iter()
                .find(|(_, name)| name.as_deref() == Some(wanted))
                .ok_or_else(|| EngineError::OperationNotFound(wanted.to_string()))?,
            None => {
                let mut operations = operations.into_iter();
                match (operations.next(), operations.next()) {
                    (Some(op), None) => op,
                    (None, _) => {
                        return Err(EngineError::Parse("document has no operation".to_string()))
                    }
                    (Some(_), Some(_)) => {
                        return Err(EngineError::Parse(
                            "operation name is required for documents with several operations"
                                .to_string(),
                        ))
                    }
                }
            }
        };

        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        name.hash(&mut hasher);

        Ok(NormalizedOperation {
            hash: hasher.finish(),
            content,
            name,
            operation_type,
        })
    }

    fn validate(&self, operation: &NormalizedOperation) -> ValidationOutcome {
        let mut errors = Vec::new();
        let mut braces = 0i64;
        let mut parens = 0i64;
        for c in operation.content.chars() {
            match c {
                '{' => braces += 1,
                '}' => braces -= 1,
                '(' => parens += 1,
                ')' => parens -= 1,
                _ => {}
            }
            if braces < 0 || parens < 0 {
                break;
            }
        }
        if braces != 0 {
            errors.push("unbalanced braces".to_string());
        }
        if parens != 0 {
            errors.push("unbalanced parentheses".to_string());
        }

        if errors.is_empty() {
            ValidationOutcome::valid()
        } else {
            ValidationOutcome::invalid(errors)
        }
    }

    fn plan(&self, operation: &NormalizedOperation) -> Result<ExecutionPlan, EngineError> {
        Ok(ExecutionPlan {
            root: Arc::new(json!({
                "kind": "Single",
                "operationType": operation.operation_type,
                "document": operation.content,
            })),
            subgraphs: Arc::from(Vec::new()),
        })
    }

    fn load_persisted_operation(
        &self,
        client_name: &str,
        sha256_hash: &str,
    ) -> Result<String, EngineError> {
        self.persisted
            .read()
            .get(&(client_name.to_string(), sha256_hash.to_string()))
            .cloned()
            .ok_or_else(|| EngineError::PersistedOperationNotFound(sha256_hash.to_string()))
    }
}

/// Collapse whitespace runs and drop whitespace around punctuators.
fn collapse_whitespace(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut pending_space = false;
    for c in query.chars() {
        if c.is_whitespace() || c == ',' {
            pending_space = true;
            continue;
        }
        if pending_space {
            let after_punct = out.chars().last().map_or(true, |p| PUNCTUATORS.contains(&p));
            if !after_punct && !PUNCTUATORS.contains(&c) {
                out.push(' ');
            }
            pending_space = false;
        }
        out.push(c);
    }
    out
}

/// Top-level operation definitions: (type, name).
fn scan_operations(content: &str) -> Vec<(OperationType, Option<String>)> {
    let mut operations = Vec::new();
    let mut depth = 0usize;
    let mut parens = 0usize;
    let mut pending: Option<(OperationType, Option<String>)> = None;
    let mut skipping_fragment = false;
    let mut chars = content.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            '{' => {
                if depth == 0 && parens == 0 {
                    if let Some(operation) = pending.take() {
                        operations.push(operation);
                    } else if skipping_fragment {
                        skipping_fragment = false;
                    } else {
                        // shorthand query
                        operations.push((OperationType::Query, None));
                    }
                }
                depth += 1;
            }
            '}' => depth = depth.saturating_sub(1),
            '(' => parens += 1,
            ')' => parens = parens.saturating_sub(1),
            c if (c.is_alphanumeric() || c == '_') && depth == 0 && parens == 0 => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, next)) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        end = i + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = &content[start..end];
                if content[..start].ends_with('@') {
                    continue;
                }
                match pending.as_mut() {
                    None => match word {
                        "query" => pending = Some((OperationType::Query, None)),
                        "mutation" => pending = Some((OperationType::Mutation, None)),
                        "subscription" => pending = Some((OperationType::Subscription, None)),
                        "fragment" => skipping_fragment = true,
                        _ => {}
                    },
                    Some((_, name)) if name.is_none() => *name = Some(word.to_string()),
                    Some(_) => {}
                }
            }
            _ => {}
        }
    }
    operations
}
