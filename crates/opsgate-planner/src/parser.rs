//! Plan step extraction from planner output.
//!
//! Planner output is free text that may wrap JSON in markdown fences or
//! prose. Parsing is permissive about shape and strict about what may run:
//! malformed steps, blank steps and steps naming an unregistered tool are
//! dropped one by one, never failing the whole plan.

use opsgate_core::{PlanStep, Stage, ToolKind};
use serde::Deserialize;
use serde_json::Value;

const FENCE: &str = "```";

/// Loosely typed step as a planner writes it.
#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    input: Option<Value>,
    #[serde(default)]
    preconditions: Option<Value>,
    #[serde(default)]
    rollback: Option<Value>,
}

/// Extract valid, registered-tool steps from planner output.
///
/// Accepts a bare JSON array or an object with a `steps` array, optionally
/// inside a fenced block. Any other shape yields no steps.
pub fn parse_plan_steps(text: &str) -> Vec<PlanStep> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let body = fenced_body(text);
    let elements = match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => items,
        Ok(Value::Object(mut obj)) => match obj.remove("steps") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    let total = elements.len();
    let steps: Vec<PlanStep> = elements.into_iter().filter_map(sanitize_step).collect();
    if steps.len() < total {
        tracing::debug!(
            kept = steps.len(),
            dropped = total - steps.len(),
            "dropped invalid plan steps"
        );
    }
    steps
}

/// Content between the first fence and the next one (or the end of text).
/// A language tag on the opening fence line is skipped.
fn fenced_body(text: &str) -> &str {
    let Some(open) = text.find(FENCE) else {
        return text;
    };
    let after = &text[open + FENCE.len()..];
    let mut inner = match after.find(FENCE) {
        Some(close) => &after[..close],
        None => after,
    };

    if let Some(newline) = inner.find('\n') {
        let tag = inner[..newline].trim();
        if !tag.is_empty()
            && tag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            inner = &inner[newline + 1..];
        }
    }
    inner.trim()
}

fn sanitize_step(value: Value) -> Option<PlanStep> {
    let raw: RawStep = match serde_json::from_value(value) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(error = %e, "dropping malformed plan step");
            return None;
        }
    };

    let action = raw.action.as_deref().map(str::trim).unwrap_or("");
    let tool_name = raw.tool.as_deref().map(str::trim).unwrap_or("");
    if action.is_empty() || tool_name.is_empty() {
        tracing::debug!("dropping plan step with blank action or tool");
        return None;
    }

    let Some(tool) = ToolKind::from_name(tool_name) else {
        tracing::warn!(tool = %tool_name, action = %action, "dropping plan step with unregistered tool");
        return None;
    };

    let preconditions = match raw.preconditions {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => Some(items),
        Some(other) => Some(vec![other]),
    };

    Some(PlanStep {
        stage: raw
            .stage
            .as_deref()
            .map(Stage::parse_lenient)
            .unwrap_or_default(),
        action: action.to_string(),
        tool: tool.name().to_string(),
        input: match raw.input {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(input) => input,
        },
        preconditions,
        rollback: raw.rollback.filter(|r| !r.is_null()),
    })
}
