//! Path resolution for the reference subset of JSONPath.
//!
//! Supported expressions:
//!
//! - `$` selects the whole document
//! - `$.a.b` selects a nested field of the document
//! - `$$` / `$$.Task.Token` select from the context object instead
//!
//! Field names match by exact key equality. Wildcards, slices, filters and recursive descent are
//! rejected with [`EngineError::UnsupportedExpression`]; arrays are not traversable by name.

use serde_json::Value;

use crate::error::EngineError;

pub const ROOT_MARKER: &str = "$";
pub const CONTEXT_MARKER: &str = "$$";

const UNSUPPORTED_CHARACTERS: [char; 7] = ['[', ']', '*', '?', '@', '(', ')'];

/// Which document a reference path is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRoot {
    Payload,
    Context,
}

/// A parsed reference expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePath {
    pub root: PathRoot,
    pub segments: Vec<String>,
}

impl ReferencePath {
    pub fn parse(expression: &str) -> Result<Self, EngineError> {
        let (root, remainder) = if let Some(remainder) = expression.strip_prefix(CONTEXT_MARKER) {
            (PathRoot::Context, remainder)
        } else if let Some(remainder) = expression.strip_prefix(ROOT_MARKER) {
            (PathRoot::Payload, remainder)
        } else {
            return Err(unsupported(expression, "expression must start with '$'"));
        };

        if remainder.is_empty() {
            return Ok(Self { root, segments: Vec::new() });
        }

        let Some(dotted) = remainder.strip_prefix('.') else {
            return Err(unsupported(expression, "only dotted field references are supported"));
        };

        let mut segments = Vec::new();
        for segment in dotted.split('.') {
            if segment.is_empty() {
                return Err(unsupported(expression, "empty field name or recursive descent"));
            }
            if let Some(character) = segment.chars().find(|character| UNSUPPORTED_CHARACTERS.contains(character)) {
                return Err(unsupported(expression, &format!("'{character}' is not supported")));
            }
            segments.push(segment.to_string());
        }

        Ok(Self { root, segments })
    }

    /// True for `$` and `$$`.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_context(&self) -> bool {
        self.root == PathRoot::Context
    }
}

/// Resolves `expression` against `document`, or against `context` for `$$` expressions.
///
/// The returned value is an independent copy; mutating it never affects `document`.
pub fn resolve(document: &Value, context: &Value, expression: &str) -> Result<Value, EngineError> {
    select(document, context, expression).cloned()
}

/// Borrowing flavour of [`resolve`].
pub fn select<'a>(document: &'a Value, context: &'a Value, expression: &str) -> Result<&'a Value, EngineError> {
    let reference = ReferencePath::parse(expression)?;
    let origin = match reference.root {
        PathRoot::Payload => document,
        PathRoot::Context => context,
    };
    walk(origin, &reference.segments).ok_or_else(|| EngineError::PathNotFound {
        path: expression.to_string(),
    })
}

/// Resolves a payload-only expression; `$$` references are rejected.
pub fn resolve_payload(document: &Value, expression: &str) -> Result<Value, EngineError> {
    let reference = ReferencePath::parse(expression)?;
    if reference.is_context() {
        return Err(unsupported(expression, "context references are not allowed here"));
    }
    walk(document, &reference.segments)
        .cloned()
        .ok_or_else(|| EngineError::PathNotFound {
            path: expression.to_string(),
        })
}

fn walk<'a>(origin: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments.iter().try_fold(origin, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        _ => None,
    })
}

pub(crate) fn unsupported(expression: &str, reason: &str) -> EngineError {
    EngineError::UnsupportedExpression {
        expression: expression.to_string(),
        reason: reason.to_string(),
    }
}

/// Short JSON type name for diagnostics.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
