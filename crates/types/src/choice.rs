//! Choice rule model.
//!
//! A rule is authored as a flat JSON object where the comparison operator is a key, for example
//! `{"Variable": "$.x", "NumericGreaterThan": 10, "Next": "Big"}`. Rules are parsed from the raw
//! object so the operator name can be decomposed into a value kind, a relation and whether the
//! comparand is a literal or another path.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A single Choice rule, either top-level (with `Next`) or nested inside `And`/`Or`/`Not`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct ChoiceRule {
    /// Path selecting the value under test. Boolean combinators carry none.
    pub variable: Option<String>,
    pub comparison: Comparison,
    /// Destination state; only meaningful on top-level rules.
    pub next: Option<String>,
}

/// The test a rule applies.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    And(Vec<ChoiceRule>),
    Or(Vec<ChoiceRule>),
    Not(Box<ChoiceRule>),
    Compare {
        kind: ValueKind,
        relation: Relation,
        operand: Operand,
    },
    /// `StringMatches` with `*` wildcards.
    Matches(String),
    Test {
        test: TypeTest,
        expected: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Numeric,
    Boolean,
    Timestamp,
}

impl ValueKind {
    fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "String",
            ValueKind::Numeric => "Numeric",
            ValueKind::Boolean => "Boolean",
            ValueKind::Timestamp => "Timestamp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Equals,
    LessThan,
    GreaterThan,
    LessThanEquals,
    GreaterThanEquals,
}

impl Relation {
    fn as_str(&self) -> &'static str {
        match self {
            Relation::Equals => "Equals",
            Relation::LessThan => "LessThan",
            Relation::GreaterThan => "GreaterThan",
            Relation::LessThanEquals => "LessThanEquals",
            Relation::GreaterThanEquals => "GreaterThanEquals",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "Equals" => Relation::Equals,
            "LessThan" => Relation::LessThan,
            "GreaterThan" => Relation::GreaterThan,
            "LessThanEquals" => Relation::LessThanEquals,
            "GreaterThanEquals" => Relation::GreaterThanEquals,
            _ => return None,
        })
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    /// Path resolved against the same input as `Variable`.
    Path(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTest {
    IsNull,
    IsPresent,
    IsNumeric,
    IsString,
    IsBoolean,
    IsTimestamp,
}

impl TypeTest {
    const ALL: [TypeTest; 6] = [
        TypeTest::IsNull,
        TypeTest::IsPresent,
        TypeTest::IsNumeric,
        TypeTest::IsString,
        TypeTest::IsBoolean,
        TypeTest::IsTimestamp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTest::IsNull => "IsNull",
            TypeTest::IsPresent => "IsPresent",
            TypeTest::IsNumeric => "IsNumeric",
            TypeTest::IsString => "IsString",
            TypeTest::IsBoolean => "IsBoolean",
            TypeTest::IsTimestamp => "IsTimestamp",
        }
    }
}

impl Comparison {
    /// Authoring name of the operator, e.g. `NumericGreaterThanPath`.
    pub fn operator_name(&self) -> String {
        match self {
            Comparison::And(_) => "And".to_string(),
            Comparison::Or(_) => "Or".to_string(),
            Comparison::Not(_) => "Not".to_string(),
            Comparison::Compare { kind, relation, operand } => {
                let suffix = if matches!(operand, Operand::Path(_)) { "Path" } else { "" };
                format!("{}{}{}", kind.as_str(), relation.as_str(), suffix)
            }
            Comparison::Matches(_) => "StringMatches".to_string(),
            Comparison::Test { test, .. } => test.as_str().to_string(),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.operator_name())
    }
}

/// Reasons a Choice rule object cannot be understood.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChoiceRuleError {
    #[error("choice rule has no comparison operator")]
    MissingOperator,
    #[error("choice rule has more than one comparison operator: {0}")]
    MultipleOperators(String),
    #[error("choice rule field '{field}' must be {expected}")]
    InvalidField { field: String, expected: &'static str },
    #[error("unsupported choice operator '{0}'")]
    UnsupportedOperator(String),
}

impl TryFrom<Map<String, Value>> for ChoiceRule {
    type Error = ChoiceRuleError;

    fn try_from(mut object: Map<String, Value>) -> Result<Self, Self::Error> {
        let variable = take_optional_string(&mut object, "Variable")?;
        let next = take_optional_string(&mut object, "Next")?;
        object.remove("Comment");

        let mut operators = object.into_iter();
        let (operator, operand) = operators.next().ok_or(ChoiceRuleError::MissingOperator)?;
        let remaining: Vec<String> = operators.map(|(key, _)| key).collect();
        if !remaining.is_empty() {
            return Err(ChoiceRuleError::MultipleOperators(format!("{}, {}", operator, remaining.join(", "))));
        }

        Ok(ChoiceRule {
            variable,
            comparison: parse_comparison(&operator, operand)?,
            next,
        })
    }
}

impl From<ChoiceRule> for Map<String, Value> {
    fn from(rule: ChoiceRule) -> Self {
        let mut object = Map::new();
        if let Some(variable) = rule.variable {
            object.insert("Variable".into(), Value::String(variable));
        }
        let operator = rule.comparison.operator_name();
        let operand = match rule.comparison {
            Comparison::And(rules) | Comparison::Or(rules) => Value::Array(rules.into_iter().map(|rule| Value::Object(rule.into())).collect()),
            Comparison::Not(rule) => Value::Object((*rule).into()),
            Comparison::Compare { operand, .. } => match operand {
                Operand::Literal(value) => value,
                Operand::Path(path) => Value::String(path),
            },
            Comparison::Matches(pattern) => Value::String(pattern),
            Comparison::Test { expected, .. } => Value::Bool(expected),
        };
        object.insert(operator, operand);
        if let Some(next) = rule.next {
            object.insert("Next".into(), Value::String(next));
        }
        object
    }
}

fn take_optional_string(object: &mut Map<String, Value>, field: &str) -> Result<Option<String>, ChoiceRuleError> {
    match object.remove(field) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(_) => Err(invalid_field(field, "a string")),
    }
}

fn invalid_field(field: &str, expected: &'static str) -> ChoiceRuleError {
    ChoiceRuleError::InvalidField {
        field: field.to_string(),
        expected,
    }
}

fn parse_comparison(operator: &str, operand: Value) -> Result<Comparison, ChoiceRuleError> {
    match operator {
        "And" | "Or" => {
            let Value::Array(items) = operand else {
                return Err(invalid_field(operator, "an array of rules"));
            };
            let rules = items.into_iter().map(parse_nested_rule).collect::<Result<Vec<_>, _>>()?;
            return Ok(if operator == "And" { Comparison::And(rules) } else { Comparison::Or(rules) });
        }
        "Not" => return Ok(Comparison::Not(Box::new(parse_nested_rule(operand)?))),
        "StringMatches" => {
            let Value::String(pattern) = operand else {
                return Err(invalid_field(operator, "a string"));
            };
            return Ok(Comparison::Matches(pattern));
        }
        _ => {}
    }

    if let Some(test) = TypeTest::ALL.into_iter().find(|test| test.as_str() == operator) {
        let Value::Bool(expected) = operand else {
            return Err(invalid_field(operator, "a boolean"));
        };
        return Ok(Comparison::Test { test, expected });
    }

    let (base, is_path) = match operator.strip_suffix("Path") {
        Some(base) => (base, true),
        None => (operator, false),
    };
    let (kind, relation_name) = [ValueKind::String, ValueKind::Numeric, ValueKind::Boolean, ValueKind::Timestamp]
        .into_iter()
        .find_map(|kind| base.strip_prefix(kind.as_str()).map(|rest| (kind, rest)))
        .ok_or_else(|| ChoiceRuleError::UnsupportedOperator(operator.to_string()))?;
    let relation = Relation::parse(relation_name).ok_or_else(|| ChoiceRuleError::UnsupportedOperator(operator.to_string()))?;
    if kind == ValueKind::Boolean && relation != Relation::Equals {
        return Err(ChoiceRuleError::UnsupportedOperator(operator.to_string()));
    }

    let operand = if is_path {
        let Value::String(path) = operand else {
            return Err(invalid_field(operator, "a path string"));
        };
        Operand::Path(path)
    } else {
        check_literal(operator, kind, &operand)?;
        Operand::Literal(operand)
    };

    Ok(Comparison::Compare { kind, relation, operand })
}

fn check_literal(operator: &str, kind: ValueKind, operand: &Value) -> Result<(), ChoiceRuleError> {
    let valid = match kind {
        ValueKind::String | ValueKind::Timestamp => operand.is_string(),
        ValueKind::Numeric => operand.is_number(),
        ValueKind::Boolean => operand.is_boolean(),
    };
    if valid {
        return Ok(());
    }
    let expected = match kind {
        ValueKind::String => "a string",
        ValueKind::Timestamp => "a timestamp string",
        ValueKind::Numeric => "a number",
        ValueKind::Boolean => "a boolean",
    };
    Err(invalid_field(operator, expected))
}

fn parse_nested_rule(value: Value) -> Result<ChoiceRule, ChoiceRuleError> {
    match value {
        Value::Object(object) => ChoiceRule::try_from(object),
        _ => Err(ChoiceRuleError::InvalidField {
            field: "rule".into(),
            expected: "an object",
        }),
    }
}
