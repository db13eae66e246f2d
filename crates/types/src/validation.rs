//! Structural validation of state machine definitions.
//!
//! These checks run once at setup so the execution driver can assume every transition target
//! exists. All violations are collected rather than stopping at the first one.

use std::{collections::HashSet, fmt};

use thiserror::Error;

use crate::choice::{ChoiceRule, Comparison};
use crate::definition::{StateDefinition, StateMachineDefinition, Transition};

/// Every problem found in a definition, in authoring order.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid state machine definition: {}", .violations.join("; "))]
pub struct ValidationErrors {
    pub violations: Vec<String>,
}

impl ValidationErrors {
    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Validates transitions and per-type requirements, recursing into Map processors.
///
/// State names must be unique across the whole machine, Map processors included.
pub fn validate_state_machine(definition: &StateMachineDefinition) -> Result<(), ValidationErrors> {
    let mut violations = Vec::new();
    let mut declared = HashSet::new();
    collect_violations(definition, "", &mut declared, &mut violations);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors { violations })
    }
}

fn collect_violations<'a>(
    definition: &'a StateMachineDefinition,
    scope: &str,
    declared: &mut HashSet<&'a str>,
    violations: &mut Vec<String>,
) {
    if definition.states.is_empty() {
        violations.push(format!("{scope}States must declare at least one state"));
    }
    if !definition.states.contains_key(&definition.start_at) {
        violations.push(format!("{scope}StartAt '{}' does not name a state", definition.start_at));
    }

    for (name, state) in &definition.states {
        let location = StateLocation { scope, name };
        if !declared.insert(name.as_str()) {
            violations.push(format!("{location} reuses a name already declared in this state machine"));
        }
        if let Some(transition) = state.transition() {
            check_transition(definition, &location, transition, violations);
        }

        match state {
            StateDefinition::Choice(choice) => {
                if choice.choices.is_empty() {
                    violations.push(format!("{location} must declare at least one choice rule"));
                }
                for (index, rule) in choice.choices.iter().enumerate() {
                    match rule.next.as_deref() {
                        Some(next) => check_target(definition, &location, next, violations),
                        None => violations.push(format!("{location} choice rule {index} is missing Next")),
                    }
                    check_rule_variables(rule, &location, index, violations);
                }
                if let Some(default) = choice.default.as_deref() {
                    check_target(definition, &location, default, violations);
                }
            }
            StateDefinition::Wait(wait) => {
                let configured = wait.delays().len();
                if configured != 1 {
                    violations.push(format!(
                        "{location} must declare exactly one of Seconds, SecondsPath, Timestamp, TimestampPath (found {configured})"
                    ));
                }
            }
            StateDefinition::Map(map) => match map.processor() {
                Some(processor) => collect_violations(processor, &format!("{scope}{name} > "), declared, violations),
                None => violations.push(format!("{location} must declare ItemProcessor or Iterator")),
            },
            StateDefinition::Task(task) if task.resource.trim().is_empty() => {
                violations.push(format!("{location} must declare a Resource"));
            }
            _ => {}
        }
    }
}

struct StateLocation<'a> {
    scope: &'a str,
    name: &'a str,
}

impl fmt::Display for StateLocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}state '{}'", self.scope, self.name)
    }
}

fn check_transition(definition: &StateMachineDefinition, location: &StateLocation<'_>, transition: &Transition, violations: &mut Vec<String>) {
    match (&transition.next, transition.end) {
        (Some(_), true) => violations.push(format!("{location} declares both Next and End")),
        (None, false) => violations.push(format!("{location} declares neither Next nor End")),
        (Some(next), false) => check_target(definition, location, next, violations),
        (None, true) => {}
    }
}

fn check_target(definition: &StateMachineDefinition, location: &StateLocation<'_>, target: &str, violations: &mut Vec<String>) {
    if !definition.states.contains_key(target) {
        violations.push(format!("{location} transitions to unknown state '{target}'"));
    }
}

fn check_rule_variables(rule: &ChoiceRule, location: &StateLocation<'_>, index: usize, violations: &mut Vec<String>) {
    match &rule.comparison {
        Comparison::And(rules) | Comparison::Or(rules) => {
            for nested in rules {
                check_rule_variables(nested, location, index, violations);
            }
        }
        Comparison::Not(nested) => check_rule_variables(nested, location, index, violations),
        comparison if rule.variable.is_none() => {
            violations.push(format!("{location} choice rule {index} uses {comparison} without a Variable"));
        }
        _ => {}
    }
}
