//! Choice rule evaluation.
//!
//! Rules are evaluated against the Choice state's effective input. Operands of the wrong type never
//! match; a missing `Variable` path is an error except for `IsPresent`.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde_json::Value;
use sfsim_types::{ChoiceRule, Comparison, Operand, Relation, TypeTest, ValueKind};

use crate::error::EngineError;
use crate::path;

/// Evaluates `rule` against `input`, resolving `$$` references against `context`.
pub fn evaluate(rule: &ChoiceRule, input: &Value, context: &Value) -> Result<bool, EngineError> {
    match &rule.comparison {
        Comparison::And(rules) => {
            for nested in rules {
                if !evaluate(nested, input, context)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Comparison::Or(rules) => {
            for nested in rules {
                if evaluate(nested, input, context)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Comparison::Not(nested) => Ok(!evaluate(nested, input, context)?),
        Comparison::Test { test, expected } => {
            let variable = required_variable(rule)?;
            let selected = match path::select(input, context, variable) {
                Ok(value) => Some(value),
                Err(EngineError::PathNotFound { .. }) if *test == TypeTest::IsPresent => None,
                Err(error) => return Err(error),
            };
            Ok(type_test(*test, selected) == *expected)
        }
        Comparison::Matches(pattern) => {
            let value = path::select(input, context, required_variable(rule)?)?;
            match value.as_str() {
                Some(text) => Ok(wildcard_regex(pattern)?.is_match(text)),
                None => Ok(false),
            }
        }
        Comparison::Compare { kind, relation, operand } => {
            let left = path::select(input, context, required_variable(rule)?)?;
            let right = match operand {
                Operand::Literal(value) => value,
                Operand::Path(expression) => path::select(input, context, expression)?,
            };
            Ok(compare(*kind, left, right).is_some_and(|ordering| holds(*relation, ordering)))
        }
    }
}

fn required_variable(rule: &ChoiceRule) -> Result<&str, EngineError> {
    rule.variable.as_deref().ok_or_else(|| EngineError::UnsupportedExpression {
        expression: rule.comparison.operator_name(),
        reason: "comparison requires a Variable".to_string(),
    })
}

fn type_test(test: TypeTest, selected: Option<&Value>) -> bool {
    match test {
        TypeTest::IsPresent => selected.is_some(),
        TypeTest::IsNull => selected.is_some_and(Value::is_null),
        TypeTest::IsNumeric => selected.is_some_and(Value::is_number),
        TypeTest::IsString => selected.is_some_and(Value::is_string),
        TypeTest::IsBoolean => selected.is_some_and(Value::is_boolean),
        TypeTest::IsTimestamp => selected.and_then(Value::as_str).and_then(parse_timestamp).is_some(),
    }
}

/// Orders two operands of `kind`; `None` when either has the wrong type.
fn compare(kind: ValueKind, left: &Value, right: &Value) -> Option<Ordering> {
    match kind {
        ValueKind::String => Some(left.as_str()?.cmp(right.as_str()?)),
        ValueKind::Numeric => compare_numbers(left, right),
        ValueKind::Boolean => Some(left.as_bool()?.cmp(&right.as_bool()?)),
        ValueKind::Timestamp => Some(parse_timestamp(left.as_str()?)?.cmp(&parse_timestamp(right.as_str()?)?)),
    }
}

/// Integers compare exactly; anything else falls back to `f64`.
fn compare_numbers(left: &Value, right: &Value) -> Option<Ordering> {
    let (Value::Number(left), Value::Number(right)) = (left, right) else {
        return None;
    };
    if let (Some(left), Some(right)) = (left.as_i64(), right.as_i64()) {
        return Some(left.cmp(&right));
    }
    if let (Some(left), Some(right)) = (left.as_u64(), right.as_u64()) {
        return Some(left.cmp(&right));
    }
    left.as_f64()?.partial_cmp(&right.as_f64()?)
}

fn holds(relation: Relation, ordering: Ordering) -> bool {
    match relation {
        Relation::Equals => ordering == Ordering::Equal,
        Relation::LessThan => ordering == Ordering::Less,
        Relation::GreaterThan => ordering == Ordering::Greater,
        Relation::LessThanEquals => ordering != Ordering::Greater,
        Relation::GreaterThanEquals => ordering != Ordering::Less,
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text).ok()
}

/// Compiles a `StringMatches` pattern: `*` matches any run of characters, `\*` a literal star.
fn wildcard_regex(pattern: &str) -> Result<Regex, EngineError> {
    let mut expression = String::from("^");
    let mut characters = pattern.chars().peekable();
    while let Some(character) = characters.next() {
        match character {
            '\\' if characters.peek() == Some(&'*') => {
                characters.next();
                expression.push_str(r"\*");
            }
            '*' => expression.push_str(".*"),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    expression.push('$');
    Regex::new(&format!("(?s){expression}")).map_err(|error| path::unsupported(pattern, &error.to_string()))
}
