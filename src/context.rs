//! Layered variable namespace.
//!
//! Three scopes are consulted in order step > local > global. Values
//! are shared behind [`Arc`], so cloning a context copies references
//! rather than whole documents.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Scope a binding is written into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Process or configuration wide.
    Global,
    /// Scenario wide.
    Local,
    /// Current step only.
    Step,
}

/// Layered variable namespace used for lookups and interpolation.
#[derive(Debug, Default)]
pub struct VariableContext {
    global: HashMap<String, Arc<Value>>,
    local: HashMap<String, Arc<Value>>,
    step: HashMap<String, Arc<Value>>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` in `scope`, replacing any previous value there.
    pub fn set(&mut self, scope: Scope, key: impl Into<String>, value: Value) {
        let key = key.into();
        debug!(?scope, key = %key, "set variable");
        self.scope_mut(scope).insert(key, Arc::new(value));
    }

    /// Flat lookup, most specific scope first.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.step
            .get(key)
            .or_else(|| self.local.get(key))
            .or_else(|| self.global.get(key))
            .map(Arc::as_ref)
    }

    /// Dotted-path lookup.
    ///
    /// The first segment resolves through [`get`](Self::get); the rest
    /// walk through objects. A string holding JSON object text is parsed
    /// and navigated as well, so raw captured bodies stay addressable.
    /// Any missing key or non-object intermediate yields `None`.
    pub fn get_nested(&self, path: &str) -> Option<Value> {
        let Some((root, rest)) = path.split_once('.') else {
            return self.get(path).cloned();
        };

        let mut current = self.get(root)?.clone();
        for part in rest.split('.') {
            current = match current {
                Value::Object(mut map) => map.remove(part)?,
                Value::String(text) => match serde_json::from_str(&text) {
                    Ok(Value::Object(mut map)) => map.remove(part)?,
                    _ => return None,
                },
                _ => return None,
            };
        }
        Some(current)
    }

    /// Reset the step scope.
    pub fn clear_step(&mut self) {
        self.step.clear();
    }

    /// Merged view: global, then local, then step, later scopes winning.
    /// Meant for snapshots and reports, not for resolution.
    pub fn get_all(&self) -> HashMap<String, Value> {
        self.global
            .iter()
            .chain(self.local.iter())
            .chain(self.step.iter())
            .map(|(key, value)| (key.clone(), Value::clone(value)))
            .collect()
    }

    /// Copy every step binding into the local scope so later steps of the
    /// same lineage still see it after [`clear_step`](Self::clear_step).
    pub fn promote_step(&mut self, keys: &[String]) {
        for key in keys {
            if let Some(value) = self.step.get(key) {
                self.local.insert(key.clone(), Arc::clone(value));
            }
        }
    }

    /// Bind the clock-derived globals: `timestamp`, `timestamp_ms`,
    /// `iso_timestamp`, `date` and `time`.
    pub fn add_builtins(&mut self) {
        let now = Utc::now();
        self.set(Scope::Global, "timestamp", Value::from(now.timestamp()));
        self.set(
            Scope::Global,
            "timestamp_ms",
            Value::from(now.timestamp_millis()),
        );
        self.set(Scope::Global, "iso_timestamp", Value::from(now.to_rfc3339()));
        self.set(
            Scope::Global,
            "date",
            Value::from(now.format("%Y-%m-%d").to_string()),
        );
        self.set(
            Scope::Global,
            "time",
            Value::from(now.format("%H:%M:%S").to_string()),
        );
    }

    fn scope_mut(&mut self, scope: Scope) -> &mut HashMap<String, Arc<Value>> {
        match scope {
            Scope::Global => &mut self.global,
            Scope::Local => &mut self.local,
            Scope::Step => &mut self.step,
        }
    }
}

/// Cloning carries the global and local scopes; the clone starts with an
/// empty step scope. This is how scenarios, parallel groups and
/// data-driven iterations get isolated namespaces.
impl Clone for VariableContext {
    fn clone(&self) -> Self {
        Self {
            global: self.global.clone(),
            local: self.local.clone(),
            step: HashMap::new(),
        }
    }
}
