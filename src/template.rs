//! `{{ name }}` / `${{ name }}` placeholder expansion.

use crate::context::VariableContext;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{([^}]+)\}\}|\{\{([^}]+)\}\}")
        .expect("failed to compile placeholder regex")
});

/// Normalize the inside of a placeholder: trim, then drop a leading
/// `env.` prefix.
fn placeholder_name(raw: &str) -> &str {
    let name = raw.trim();
    name.strip_prefix("env.").unwrap_or(name)
}

/// If `text` is exactly one placeholder, return its normalized name.
pub(crate) fn sole_placeholder(text: &str) -> Option<&str> {
    let text = text.trim();
    let caps = PLACEHOLDER_RE.captures(text)?;
    let whole = caps.get(0)?;
    if whole.start() != 0 || whole.end() != text.len() {
        return None;
    }
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| placeholder_name(m.as_str()))
}

/// Whether `text` still carries a placeholder.
pub(crate) fn has_placeholder(text: &str) -> bool {
    PLACEHOLDER_RE.is_match(text)
}

/// Text form of a value when spliced into a string.
///
/// Strings go in verbatim. Floats with no fractional part print as
/// integers (`123.0` becomes `123`). Other scalars and structures use
/// their compact JSON text.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

impl VariableContext {
    /// Replace every resolvable placeholder in `text`. Unresolvable ones
    /// stay as written.
    pub fn interpolate_str(&self, text: &str) -> String {
        if !text.contains("{{") {
            return text.to_string();
        }

        PLACEHOLDER_RE
            .replace_all(text, |caps: &regex::Captures| {
                let raw = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map_or("", |m| m.as_str());
                match self.get_nested(placeholder_name(raw)) {
                    Some(value) => render_value(&value),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Interpolate both keys and values of a string map.
    pub fn interpolate_map(&self, map: &HashMap<String, String>) -> HashMap<String, String> {
        map.iter()
            .map(|(k, v)| (self.interpolate_str(k), self.interpolate_str(v)))
            .collect()
    }

    /// Interpolate every string inside a structured value. Object keys are
    /// interpolated too; numbers, booleans and null pass through.
    pub fn interpolate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.interpolate_str(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.interpolate_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (self.interpolate_str(k), self.interpolate_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}
