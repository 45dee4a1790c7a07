use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use shared_types::{
    Envelope, Progress, ToolEvent, ToolEventKind, ENVELOPE_CONTROL_STATUS, ENVELOPE_STEP_LIST,
    ENVELOPE_TOOL_EVENT,
};

use crate::error::EnvelopeError;

// ── Helper utilities ─────────────────────────────────────────────────────────

/// Decode a value that may carry JSON encoded as a string.
///
/// Strings that are not JSON are returned unchanged; `null` counts as absent.
pub fn decode_json_payload(value: Option<&Value>) -> Option<Value> {
    match value? {
        Value::Null => None,
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .ok()
            .or_else(|| Some(Value::String(raw.clone()))),
        other => Some(other.clone()),
    }
}

/// Integer index from a number or an integer string. Fractions are rejected.
pub fn value_as_index(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|raw| raw.trim().parse::<f64>().ok()))
        .filter(|f| f.is_finite())
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Epoch numbers above 1e12 are milliseconds, anything smaller is seconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(raw) = value.as_str() {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw.trim()) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    let number = value_as_f64(value)?;
    let millis = if number.abs() > 1e12 {
        number
    } else {
        number * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
}

// ── Envelope classification ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeKind {
    StepList(StepListPayload),
    /// The raw `plan` object of a tool event.
    ToolEvent(Value),
    ControlStatus(Value),
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedEnvelope {
    pub topic: Option<String>,
    pub kind: EnvelopeKind,
}

pub fn parse_envelope_line(line: &str) -> Result<Envelope, EnvelopeError> {
    serde_json::from_str::<Envelope>(line).map_err(|e| EnvelopeError::NotJson(e.to_string()))
}

pub fn classify_envelope(envelope: &Envelope) -> Result<ClassifiedEnvelope, EnvelopeError> {
    let data = decode_json_payload(Some(&envelope.data)).ok_or(EnvelopeError::MissingData)?;
    let kind = data
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(EnvelopeError::MissingType)?;
    let init_data = decode_json_payload(data.get("initData")).unwrap_or(Value::Null);

    let kind = match kind {
        ENVELOPE_STEP_LIST => EnvelopeKind::StepList(parse_step_list(&init_data)),
        ENVELOPE_TOOL_EVENT => {
            EnvelopeKind::ToolEvent(decode_json_payload(init_data.get("plan")).unwrap_or(Value::Null))
        }
        ENVELOPE_CONTROL_STATUS => EnvelopeKind::ControlStatus(init_data),
        other => EnvelopeKind::Other(other.to_string()),
    };

    Ok(ClassifiedEnvelope {
        topic: envelope.topic.clone(),
        kind,
    })
}

pub fn control_status_label(init_data: &Value) -> String {
    init_data
        .as_str()
        .map(ToString::to_string)
        .or_else(|| non_empty_str(init_data.get("status")))
        .or_else(|| non_empty_str(init_data.get("type")))
        .unwrap_or_else(|| "unknown".to_string())
}

// ── Step list ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepListPayload {
    pub steps: Vec<String>,
    /// Raw dependency map, base not yet normalized.
    pub dependencies: Map<String, Value>,
    pub step_statuses: HashMap<String, String>,
    pub title: Option<String>,
    pub progress: Option<Progress>,
}

pub fn parse_step_list(init_data: &Value) -> StepListPayload {
    let steps = init_data
        .get("steps")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().map(value_as_text).collect())
        .unwrap_or_default();

    let dependencies = decode_json_payload(init_data.get("dependencies"))
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();

    let step_statuses = init_data
        .get("step_statuses")
        .and_then(|v| v.as_object())
        .map(|statuses| {
            statuses
                .iter()
                .filter_map(|(step, status)| {
                    status.as_str().map(|s| (step.clone(), s.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    StepListPayload {
        steps,
        dependencies,
        step_statuses,
        title: non_empty_str(init_data.get("title")),
        progress: init_data.get("progress").and_then(parse_progress),
    }
}

fn parse_progress(value: &Value) -> Option<Progress> {
    let object = value.as_object()?;
    let count = |key: &str| {
        object
            .get(key)
            .and_then(value_as_index)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0)
    };
    Some(Progress {
        total: count("total"),
        completed: count("completed"),
        in_progress: count("in_progress"),
        blocked: count("blocked"),
        not_started: count("not_started"),
    })
}

// ── Tool events ──────────────────────────────────────────────────────────────

fn normalize_tool_args(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "{}".to_string(),
        Some(Value::String(raw)) => raw.clone(),
        Some(other) => other.to_string(),
    }
}

/// Normalize a tool-event `plan`. Returns `None` when the step index, event
/// type or tool name is missing or invalid.
pub fn parse_tool_event(plan: &Value, received_at: DateTime<Utc>) -> Option<ToolEvent> {
    let step_index = plan
        .get("step_index")
        .and_then(value_as_index)
        .and_then(|i| u32::try_from(i).ok())
        .filter(|i| i.checked_add(1).is_some())?;
    let kind = plan
        .get("event_type")
        .and_then(|v| v.as_str())
        .and_then(ToolEventKind::from_wire)?;
    let tool_name = non_empty_str(plan.get("tool_name"))?;

    let result = ["processed_result", "raw_result"]
        .iter()
        .find_map(|key| plan.get(*key).filter(|v| !v.is_null()).cloned());

    let duration_secs = plan
        .get("duration")
        .and_then(value_as_f64)
        .filter(|d| *d >= 0.0)
        .unwrap_or(0.0);

    Some(ToolEvent {
        seq: 0,
        step_index,
        kind,
        tool_name,
        tool_args: normalize_tool_args(plan.get("tool_args")),
        result,
        duration_secs,
        timestamp: plan
            .get("timestamp")
            .and_then(parse_timestamp)
            .unwrap_or(received_at),
        status_text: non_empty_str(plan.get("status_text")),
    })
}
