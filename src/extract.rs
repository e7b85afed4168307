//! Pulling values out of responses.
//!
//! Used by captures, the legacy `json:`/`header:` variable shorthand, and
//! the assertion engine.

use crate::context::{Scope, VariableContext};
use crate::error::ExtractionError;
use crate::model::Capture;
use crate::transport::Response;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Walk a dot-separated path through a JSON document. Objects are
/// addressed by key, arrays by bounds-checked numeric index.
pub fn navigate(data: &Value, path: &str) -> Result<Value, ExtractionError> {
    let mut current = data;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map
                .get(part)
                .ok_or_else(|| ExtractionError::KeyNotFound(part.to_string()))?,
            Value::Array(items) => {
                let index: usize = part
                    .parse()
                    .map_err(|_| ExtractionError::InvalidIndex(part.to_string()))?;
                items
                    .get(index)
                    .ok_or(ExtractionError::IndexOutOfBounds(index))?
            }
            other => {
                return Err(ExtractionError::NotNavigable {
                    property: part.to_string(),
                    kind: kind_name(other),
                })
            }
        };
    }
    Ok(current.clone())
}

/// Value at `path` in the JSON body.
pub fn json_path(response: &Response, path: &str) -> Result<Value, ExtractionError> {
    navigate(&response.json()?, path)
}

/// First value of the named header.
pub fn header(response: &Response, name: &str) -> Result<Value, ExtractionError> {
    response
        .header(name)
        .map(|value| Value::String(value.to_string()))
        .ok_or_else(|| ExtractionError::HeaderNotFound(name.to_string()))
}

/// First regex match in the body. Without capture groups the whole match
/// is returned; otherwise the list of group values (unmatched optional
/// groups become empty strings).
pub fn regex(response: &Response, pattern: &str) -> Result<Value, ExtractionError> {
    let re = Regex::new(pattern).map_err(|e| ExtractionError::InvalidRegex(e.to_string()))?;
    let caps = re
        .captures(&response.body_text)
        .ok_or_else(|| ExtractionError::NoMatch(pattern.to_string()))?;

    if caps.len() == 1 {
        return Ok(Value::String(caps[0].to_string()));
    }
    Ok(Value::Array(
        caps.iter()
            .skip(1)
            .map(|group| Value::String(group.map_or("", |m| m.as_str()).to_string()))
            .collect(),
    ))
}

/// Resolve an extractor expression: `json:<path>`, `header:<name>`,
/// `status` or `body`.
pub fn extract(response: &Response, extractor: &str) -> Result<Value, ExtractionError> {
    if let Some(path) = extractor.strip_prefix("json:") {
        json_path(response, path)
    } else if let Some(name) = extractor.strip_prefix("header:") {
        header(response, name)
    } else if extractor.starts_with("status") {
        Ok(Value::from(response.status))
    } else if extractor.starts_with("body") {
        Ok(Value::String(response.body_text.clone()))
    } else {
        Err(ExtractionError::UnsupportedExtractor(extractor.to_string()))
    }
}

fn capture_one(response: &Response, capture: &Capture) -> Result<Value, ExtractionError> {
    if let Some(path) = &capture.jsonpath {
        json_path(response, path)
    } else if let Some(name) = &capture.header {
        header(response, name)
    } else if let Some(pattern) = &capture.regex {
        regex(response, pattern)
    } else {
        Err(ExtractionError::UnsupportedExtractor("empty capture".into()))
    }
}

/// Run every capture and bind the successes into step scope. Failures are
/// logged and dropped. Returns the names that were bound.
pub fn apply_captures(
    captures: &BTreeMap<String, Capture>,
    response: &Response,
    ctx: &mut VariableContext,
) -> Vec<String> {
    let mut bound = Vec::new();
    for (name, capture) in captures {
        match capture_one(response, capture) {
            Ok(value) => {
                debug!(capture = %name, ?value, "captured value");
                ctx.set(Scope::Step, name.clone(), value);
                bound.push(name.clone());
            }
            Err(e) => warn!(capture = %name, error = %e, "capture dropped"),
        }
    }
    bound
}

/// Whether a legacy variable value names a response extraction rather
/// than a literal.
pub fn is_extractor(spec: &str) -> bool {
    spec.starts_with("json:") || spec.starts_with("header:")
}

/// Legacy variable shorthand: string values of the form `json:<path>` or
/// `header:<name>` are extracted from the response into step scope.
/// `last_status` and `last_response` are always bound. Returns the names
/// that were bound.
pub fn extract_variables(
    variables: &HashMap<String, Value>,
    response: &Response,
    ctx: &mut VariableContext,
) -> Vec<String> {
    ctx.set(Scope::Step, "last_status", Value::from(response.status));
    ctx.set(
        Scope::Step,
        "last_response",
        Value::String(response.body_text.clone()),
    );

    let mut bound = vec!["last_status".to_string(), "last_response".to_string()];
    for (name, spec) in variables {
        let Some(extractor) = spec.as_str().filter(|s| is_extractor(s)) else {
            continue;
        };
        match extract(response, extractor) {
            Ok(value) => {
                ctx.set(Scope::Step, name.clone(), value);
                bound.push(name.clone());
            }
            Err(e) => warn!(variable = %name, error = %e, "extraction dropped"),
        }
    }
    bound
}
