//! Execution state and variable interpolation
//!
//! Holds step outputs (artifacts) and substitutes them into later step
//! inputs and the final-answer template. The rendering discipline:
//!
//! - successful `ToolResult`: a well-known scalar field when present,
//!   otherwise compact JSON of the data object
//! - failed `ToolResult`: `[tool failed: <message>]`, so downstream steps
//!   and the Judge see the failure textually
//! - objects and arrays: compact JSON
//! - scalars: stringified
//!
//! Unresolved placeholders stay literal; the Judge catches their semantic
//! effect.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::types::AskUserPending;

/// Scalar fields rendered directly when a tool result carries one
const WELL_KNOWN_FIELDS: &[&str] = &[
    "current_time",
    "local_time",
    "temperature",
    "normalized_date",
    "result",
    "answer",
    "content",
];

/// A recorded step failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepError {
    /// The failing step
    pub step_id: String,
    /// What went wrong
    pub message: String,
}

/// Per-task execution state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Step outputs by output_key
    pub artifacts: HashMap<String, Value>,
    /// IDs of steps whose output is present
    pub completed_steps: std::collections::HashSet<String>,
    /// Ordered failure log
    pub errors: Vec<StepError>,
    /// User-input slots populated from replies
    pub inputs: HashMap<String, String>,
    /// Questions already put to the user, to discourage repeats
    pub asked_questions: Vec<String>,
    /// Present while execution is suspended on a user question
    pub ask_user_pending: Option<AskUserPending>,
}

impl ExecutionState {
    /// Store a step output
    pub fn set_artifact(&mut self, key: impl Into<String>, value: Value) {
        self.artifacts.insert(key.into(), value);
    }

    /// Look up a step output
    pub fn artifact(&self, key: &str) -> Option<&Value> {
        self.artifacts.get(key)
    }

    /// Record a step failure
    pub fn record_error(&mut self, step_id: impl Into<String>, message: impl Into<String>) {
        self.errors.push(StepError {
            step_id: step_id.into(),
            message: message.into(),
        });
    }

    /// Substitute every `{{key}}` in a string; unresolved keys stay literal
    pub fn interpolate(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                out.push_str(&rest[start..]);
                return out;
            };
            let key = after[..end].trim();

            if let Some(value) = self.artifacts.get(key) {
                out.push_str(&render_value(value));
            } else if let Some(value) = self.inputs.get(key) {
                out.push_str(value);
            } else {
                // Unresolved: keep the placeholder verbatim
                out.push_str(&rest[start..start + 2 + end + 2]);
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        out
    }

    /// Interpolate every string inside a JSON value, recursively
    pub fn interpolate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.interpolate(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.interpolate_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.interpolate_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Bounded per-artifact excerpts for prompts and telemetry
    pub fn artifact_excerpts(&self, cap: usize) -> Value {
        let mut out = serde_json::Map::new();
        let mut keys: Vec<&String> = self.artifacts.keys().collect();
        keys.sort();
        for key in keys {
            let rendered = render_value(&self.artifacts[key]);
            let excerpt: String = rendered.chars().take(cap).collect();
            out.insert(key.clone(), Value::String(excerpt));
        }
        Value::Object(out)
    }
}

/// Render an artifact for textual substitution
pub fn render_value(value: &Value) -> String {
    // Tool results get the envelope-aware rendering
    if let Some(obj) = value.as_object() {
        if obj.get("ok").and_then(|v| v.as_bool()).is_some() && obj.contains_key("meta") {
            return render_tool_result(obj);
        }
    }

    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn render_tool_result(envelope: &serde_json::Map<String, Value>) -> String {
    let ok = envelope.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);

    if !ok {
        let message = envelope
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        return format!("[tool failed: {}]", message);
    }

    let data = envelope.get("data").cloned().unwrap_or(json!({}));
    if let Some(obj) = data.as_object() {
        for field in WELL_KNOWN_FIELDS {
            if let Some(v) = obj.get(*field) {
                if !v.is_object() && !v.is_array() {
                    return render_value(v);
                }
            }
        }
    }
    data.to_string()
}
