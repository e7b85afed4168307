//! Assertion evaluation.
//!
//! [`AssertionEngine`] turns a response plus a list of [`Assertion`]s into
//! one [`AssertionResult`] per assertion. Misconfigured assertions
//! (unknown type or operator, bad regex, bad schema) produce failed
//! results; they never abort the remaining checks.

use crate::context::VariableContext;
use crate::error::{EngineError, ExtractionError};
use crate::extract;
use crate::model::Assertion;
use crate::template::{has_placeholder, render_value, sole_placeholder};
use crate::transport::Response;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Operator names accepted in assertions and in `{op: value}` checks.
pub const OPERATORS: &[&str] = &[
    "eq", "equals", "==", "ne", "not_equals", "!=", "gt", ">", "gte", ">=", "lt", "<", "lte",
    "<=", "contains", "not_contains", "matches", "regex", "starts_with", "ends_with", "length",
    "json_schema",
];

/// Outcome of one assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionResult {
    pub passed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion: Option<Assertion>,
}

impl AssertionResult {
    /// Failed result not tied to a single assertion definition.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            expected: None,
            actual: None,
            duration: Duration::ZERO,
            assertion: None,
        }
    }
}

/// Evaluates assertions against a response, resolving expected values
/// through a variable context.
pub struct AssertionEngine<'a> {
    ctx: &'a VariableContext,
}

impl<'a> AssertionEngine<'a> {
    pub fn new(ctx: &'a VariableContext) -> Self {
        Self { ctx }
    }

    /// Evaluate every assertion in order.
    ///
    /// The error arm is reserved for engine-internal faults; every
    /// assertion-level problem is reported as a failed result instead.
    pub fn run_assertions(
        &self,
        assertions: &[Assertion],
        response: &Response,
    ) -> Result<Vec<AssertionResult>, EngineError> {
        Ok(assertions
            .iter()
            .map(|assertion| self.run_assertion(assertion, response))
            .collect())
    }

    pub fn run_assertion(&self, assertion: &Assertion, response: &Response) -> AssertionResult {
        let start = Instant::now();
        let expected = self.resolve_expected(assertion);

        let mut result = AssertionResult {
            passed: false,
            message: String::new(),
            expected: Some(expected.clone()),
            actual: None,
            duration: Duration::ZERO,
            assertion: Some(assertion.clone()),
        };

        match extract_actual(assertion, response) {
            Ok(actual) => {
                let operator = effective_operator(assertion);
                let (passed, message) = compare(&actual, &expected, operator);
                result.passed = passed;
                result.message = match &assertion.description {
                    Some(description) if !description.is_empty() => {
                        format!("{description}: {message}")
                    }
                    _ => message,
                };
                result.actual = Some(actual);
            }
            Err(e) if assertion.optional => {
                result.passed = true;
                result.message = format!("optional assertion skipped: {e}");
            }
            Err(e) => {
                result.message = format!("failed to extract value: {e}");
            }
        }

        result.duration = start.elapsed();
        debug!(
            kind = %assertion.kind,
            passed = result.passed,
            message = %result.message,
            "assertion evaluated"
        );
        result
    }

    /// Interpolate string expectations. A schema check whose expectation
    /// is a single placeholder takes the referenced value itself, so a
    /// stored schema object is not flattened into text.
    fn resolve_expected(&self, assertion: &Assertion) -> Value {
        let Value::String(text) = &assertion.value else {
            return assertion.value.clone();
        };
        if !has_placeholder(text) {
            return assertion.value.clone();
        }

        if assertion.kind == "json_schema" {
            if let Some(value) = sole_placeholder(text).and_then(|name| self.ctx.get_nested(name)) {
                return value;
            }
        }
        Value::String(self.ctx.interpolate_str(text))
    }
}

fn effective_operator(assertion: &Assertion) -> &str {
    match assertion.operator.as_deref() {
        None | Some("") | Some("eq") if assertion.kind == "json_schema" => "json_schema",
        None | Some("") => "eq",
        Some(op) => op,
    }
}

fn extract_actual(assertion: &Assertion, response: &Response) -> Result<Value, ExtractionError> {
    let field = assertion.field.as_deref().unwrap_or_default();
    match assertion.kind.as_str() {
        "status" | "status_code" => Ok(Value::from(response.status)),
        "header" => extract::header(response, field),
        "body" | "json_schema" => Ok(Value::String(response.body_text.clone())),
        "json" | "json_path" => extract::json_path(response, field),
        "regex" => match extract::regex(response, field)? {
            Value::Array(mut groups) if !groups.is_empty() => Ok(groups.swap_remove(0)),
            other => Ok(other),
        },
        "response_time" => Ok(Value::from(
            u64::try_from(response.elapsed.as_millis()).unwrap_or(u64::MAX),
        )),
        "size" => Ok(Value::from(response.size)),
        other => Err(ExtractionError::UnsupportedType(other.to_string())),
    }
}

/// Apply `operator` to `actual` and `expected`, returning the verdict and
/// a report-ready message.
pub fn compare(actual: &Value, expected: &Value, operator: &str) -> (bool, String) {
    let a = render_value(actual);
    let e = render_value(expected);

    match operator {
        "eq" | "equals" | "==" => {
            if values_equal(actual, expected) {
                (true, format!("value equals {e}"))
            } else {
                (false, format!("expected {e} but got {a}"))
            }
        }
        "ne" | "not_equals" | "!=" => {
            if values_equal(actual, expected) {
                (false, format!("expected value not equal to {e} but got {a}"))
            } else {
                (true, format!("value does not equal {e}"))
            }
        }
        "gt" | ">" => ordered(actual, expected, |x, y| x > y, "greater than"),
        "gte" | ">=" => ordered(actual, expected, |x, y| x >= y, "greater than or equal to"),
        "lt" | "<" => ordered(actual, expected, |x, y| x < y, "less than"),
        "lte" | "<=" => ordered(actual, expected, |x, y| x <= y, "less than or equal to"),
        "contains" => {
            if contains(actual, expected) {
                (true, format!("value contains {e}"))
            } else {
                (false, format!("expected value to contain {e} but got {a}"))
            }
        }
        "not_contains" => {
            if contains(actual, expected) {
                (false, format!("expected value not to contain {e} but got {a}"))
            } else {
                (true, format!("value does not contain {e}"))
            }
        }
        "matches" | "regex" => match Regex::new(&e) {
            Ok(re) if re.is_match(&a) => (true, format!("value matches pattern {e}")),
            Ok(_) => (
                false,
                format!("expected value to match pattern {e} but got {a}"),
            ),
            Err(err) => (false, format!("invalid regex pattern: {err}")),
        },
        "starts_with" => {
            if a.starts_with(&e) {
                (true, format!("value starts with {e}"))
            } else {
                (false, format!("expected value to start with {e} but got {a}"))
            }
        }
        "ends_with" => {
            if a.ends_with(&e) {
                (true, format!("value ends with {e}"))
            } else {
                (false, format!("expected value to end with {e} but got {a}"))
            }
        }
        "length" => compare_length(actual, expected),
        "json_schema" => validate_schema(actual, expected),
        other => (false, format!("unsupported operator: {other}")),
    }
}

/// Deep equality, then numeric equality across int/float, then equality
/// of the rendered text.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    if let (Some(x), Some(y)) = (numeric(actual), numeric(expected)) {
        if x == y {
            return true;
        }
    }
    render_value(actual) == render_value(expected)
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn ordered(
    actual: &Value,
    expected: &Value,
    cmp: fn(f64, f64) -> bool,
    relation: &str,
) -> (bool, String) {
    let (Some(x), Some(y)) = (numeric(actual), numeric(expected)) else {
        return (false, "comparison requires numeric values".to_string());
    };
    let a = render_value(actual);
    let e = render_value(expected);
    if cmp(x, y) {
        (true, format!("value {a} is {relation} {e}"))
    } else {
        (false, format!("expected value {relation} {e} but got {a}"))
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        _ => render_value(actual).contains(&render_value(expected)),
    }
}

fn compare_length(actual: &Value, expected: &Value) -> (bool, String) {
    let length = match actual {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => {
            return (
                false,
                format!("cannot take length of {}", render_value(other)),
            )
        }
    };

    let want = match expected {
        Value::Number(n) => match n.as_u64() {
            Some(u) => u as i128,
            None => n.as_i64().map_or_else(|| n.as_f64().unwrap_or(0.0).trunc() as i128, i128::from),
        },
        _ => return (false, "expected length must be a number".to_string()),
    };

    if length as i128 == want {
        (true, format!("length equals {want}"))
    } else {
        (false, format!("expected length {want} but got {length}"))
    }
}

fn as_document(value: &Value) -> Result<Value, serde_json::Error> {
    match value {
        Value::String(text) => serde_json::from_str(text),
        other => Ok(other.clone()),
    }
}

/// Validate `actual` against the schema in `expected`, reporting every
/// violation.
fn validate_schema(actual: &Value, expected: &Value) -> (bool, String) {
    let schema = match as_document(expected) {
        Ok(schema) => schema,
        Err(e) => return (false, format!("schema is not valid JSON: {e}")),
    };
    let instance = match as_document(actual) {
        Ok(instance) => instance,
        Err(e) => return (false, format!("response body is not valid JSON: {e}")),
    };
    let validator = match jsonschema::validator_for(&schema) {
        Ok(validator) => validator,
        Err(e) => return (false, format!("schema validation error: {e}")),
    };

    let errors: Vec<String> = validator
        .iter_errors(&instance)
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        (
            true,
            "JSON response validates against provided schema".to_string(),
        )
    } else {
        (
            false,
            format!("JSON schema validation failed: {}", errors.join("; ")),
        )
    }
}

/// Expand a `check` map into assertions.
///
/// Keys name the check type (`status` is an alias for `status_code`);
/// `json:<path>`, `header:<name>` and `regex:<pattern>` carry their field
/// in the key. A one-entry map whose key is an operator, such as
/// `{lt: 500}`, sets the operator. A `json_schema` value is always the
/// schema itself, even when its only keyword shares an operator's name.
pub fn checks_to_assertions(checks: &BTreeMap<String, Value>) -> Vec<Assertion> {
    checks
        .iter()
        .map(|(key, value)| {
            let (kind, field) = if key == "status" {
                ("status_code".to_string(), None)
            } else if let Some(path) = key.strip_prefix("json:") {
                ("json_path".to_string(), Some(path.to_string()))
            } else if let Some(name) = key.strip_prefix("header:") {
                ("header".to_string(), Some(name.to_string()))
            } else if let Some(pattern) = key.strip_prefix("regex:") {
                ("regex".to_string(), Some(pattern.to_string()))
            } else {
                (key.clone(), None)
            };

            let (operator, value) = match value {
                Value::Object(map) if map.len() == 1 && kind != "json_schema" => match map.iter().next() {
                    Some((op, inner)) if OPERATORS.contains(&op.as_str()) => {
                        (Some(op.clone()), inner.clone())
                    }
                    _ => (None, value.clone()),
                },
                _ => (None, value.clone()),
            };

            Assertion {
                kind,
                field,
                operator,
                value,
                ..Default::default()
            }
        })
        .collect()
}
