//! # Data-flow processing
//!
//! Each state shapes its payload through four independent stages:
//!
//! 1. **Input path** selects what the state sees.
//! 2. **Parameters** build the state's effective input from a template, substituting `"key.$"`
//!    entries with values resolved from the input (or from the context object for `$$` paths).
//! 3. **Result path** merges the state's result into the raw state input.
//! 4. **Output path** projects what is handed to the next state.
//!
//! Every stage is a pure function returning a new value. A stage whose governing field is absent
//! passes its input through unchanged.

use serde_json::{Map, Value};

use sfsim_types::JsonPathField;

use crate::error::EngineError;
use crate::path::{self, ReferencePath};

/// Key suffix marking a template entry whose value is a path expression.
pub const SUBSTITUTION_SUFFIX: &str = ".$";

/// Field that must be present in Lambda callback parameters.
pub const FUNCTION_NAME_FIELD: &str = "FunctionName";
/// Field of Lambda callback parameters carrying the function payload.
pub const PAYLOAD_FIELD: &str = "Payload";

/// Fields accepted by the Lambda invoke integration when waiting for a task token.
const LAMBDA_CALLBACK_FIELDS: [&str; 5] = [FUNCTION_NAME_FIELD, PAYLOAD_FIELD, "InvocationType", "Qualifier", "ClientContext"];

/// Applies `InputPath`: absent keeps the whole input, `null` yields `{}`.
pub fn process_input_path(input: &Value, input_path: &JsonPathField) -> Result<Value, EngineError> {
    project(input, input_path)
}

/// Applies `OutputPath` to the merged result; the same rules as [`process_input_path`].
pub fn process_output_path(document: &Value, output_path: &JsonPathField) -> Result<Value, EngineError> {
    project(document, output_path)
}

fn project(document: &Value, path_field: &JsonPathField) -> Result<Value, EngineError> {
    match path_field {
        JsonPathField::Absent => Ok(document.clone()),
        JsonPathField::Null => Ok(empty_object()),
        JsonPathField::Path(expression) => path::resolve_payload(document, expression),
    }
}

/// Builds the effective input from a `Parameters` template.
///
/// Without a template the input passes through unchanged. Literal entries are copied as they are;
/// `"key.$"` entries become `"key"` with the value their path resolves to. Nested objects (also
/// inside arrays) are processed recursively.
pub fn process_parameters(input: &Value, parameters: Option<&Value>, context: &Value) -> Result<Value, EngineError> {
    match parameters {
        None => Ok(input.clone()),
        Some(template) => substitute(template, input, context),
    }
}

/// Builds the function payload for a Lambda task that waits for a task token.
///
/// The parameters must name the function and may only use the fields the Lambda integration
/// understands. The result is the processed `Payload`, or `{}` when none is configured.
pub fn process_wait_for_token_parameters(input: &Value, parameters: Option<&Value>, context: &Value) -> Result<Value, EngineError> {
    let fields = match parameters {
        Some(Value::Object(fields)) => fields,
        _ => return Err(missing_function_name()),
    };

    if !fields.keys().any(|key| field_name(key) == FUNCTION_NAME_FIELD) {
        return Err(missing_function_name());
    }
    if let Some(unsupported) = fields.keys().find(|key| !LAMBDA_CALLBACK_FIELDS.contains(&field_name(key))) {
        return Err(EngineError::UnsupportedField {
            field: field_name(unsupported).to_string(),
        });
    }

    let mut payload = empty_object();
    for (key, value) in fields {
        if field_name(key) != PAYLOAD_FIELD {
            continue;
        }
        payload = if key.ends_with(SUBSTITUTION_SUFFIX) {
            resolve_substitution(key, value, input, context)?
        } else {
            substitute(value, input, context)?
        };
    }
    Ok(payload)
}

/// Merges `result` into the raw state input according to `ResultPath`.
///
/// Absent or `$` replaces the document with the result; `null` discards the result. A dotted path
/// sets the result at that location, creating intermediate objects and keeping sibling keys.
/// Intermediate values that are not objects are replaced by objects.
pub fn process_result_path(input: &Value, result: Value, result_path: &JsonPathField) -> Result<Value, EngineError> {
    let expression = match result_path {
        JsonPathField::Absent => return Ok(result),
        JsonPathField::Null => return Ok(input.clone()),
        JsonPathField::Path(expression) => expression,
    };

    let reference = ReferencePath::parse(expression)?;
    if reference.is_context() {
        return Err(path::unsupported(expression, "ResultPath cannot target the context object"));
    }
    if reference.is_root() {
        return Ok(result);
    }

    let mut document = input.clone();
    merge_at(&mut document, &reference.segments, result);
    Ok(document)
}

fn merge_at(target: &mut Value, segments: &[String], result: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *target = result;
        return;
    };
    if !target.is_object() {
        *target = empty_object();
    }
    if let Value::Object(map) = target {
        let slot = map.entry(head.clone()).or_insert(Value::Null);
        merge_at(slot, rest, result);
    }
}

fn substitute(template: &Value, input: &Value, context: &Value) -> Result<Value, EngineError> {
    match template {
        Value::Object(entries) => {
            let mut output = Map::with_capacity(entries.len());
            for (key, value) in entries {
                if let Some(stripped) = key.strip_suffix(SUBSTITUTION_SUFFIX) {
                    output.insert(stripped.to_string(), resolve_substitution(key, value, input, context)?);
                } else {
                    output.insert(key.clone(), substitute(value, input, context)?);
                }
            }
            Ok(Value::Object(output))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| substitute(item, input, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        literal => Ok(literal.clone()),
    }
}

fn resolve_substitution(key: &str, value: &Value, input: &Value, context: &Value) -> Result<Value, EngineError> {
    match value {
        Value::String(expression) => path::resolve(input, context, expression),
        other => Err(path::unsupported(
            &other.to_string(),
            &format!("the value of '{key}' must be a path string"),
        )),
    }
}

fn field_name(key: &str) -> &str {
    key.strip_suffix(SUBSTITUTION_SUFFIX).unwrap_or(key)
}

fn missing_function_name() -> EngineError {
    EngineError::MissingRequiredField {
        field: FUNCTION_NAME_FIELD.to_string(),
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}
