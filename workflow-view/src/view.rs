//! Row models for step panels, derived from reconciled tool-call records.

use serde_json::Value;
use shared_types::{ToolCallRecord, ToolCallStatus, ToolCallView};

use crate::parsers::decode_json_payload;

/// Internal bookkeeping tool, reconciled and persisted but never shown.
pub const HIDDEN_TOOL: &str = "mark_step";

const URL_TOOLS: [&str; 4] = ["search_baidu", "search_google", "tavily_search", "image_search"];

pub fn is_hidden_tool(tool_name: &str) -> bool {
    tool_name == HIDDEN_TOOL
}

fn string_field(value: Option<&Value>, key: &str) -> Option<String> {
    value?
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn file_name(path: &str) -> Option<&str> {
    path.rsplit(['/', '\\']).next().filter(|name| !name.is_empty())
}

fn result_text(record: &ToolCallRecord) -> String {
    if record.status == ToolCallStatus::Running {
        return record.status_text.clone().unwrap_or_default();
    }
    match &record.result {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other
            .get("summary")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

pub fn tool_call_view(record: &ToolCallRecord) -> ToolCallView {
    let args = serde_json::from_str::<Value>(&record.args).ok();
    let result = decode_json_payload(record.result.as_ref());

    let url = if URL_TOOLS.contains(&record.tool_name.as_str()) {
        string_field(result.as_ref(), "first_url")
    } else {
        None
    };

    let path = match record.tool_name.as_str() {
        "file_saver" => string_field(args.as_ref(), "file_path"),
        "file_read" => string_field(result.as_ref(), "file_path")
            .or_else(|| string_field(args.as_ref(), "file"))
            .or_else(|| string_field(args.as_ref(), "path")),
        _ => None,
    };

    let mut text = result_text(record);
    if record.tool_name == "file_saver" {
        if let Some(name) = path.as_deref().and_then(file_name) {
            text = format!("Saved to: {name}");
        }
    }

    let error = (record.status == ToolCallStatus::Failed).then(|| {
        record
            .failure_reason
            .clone()
            .unwrap_or_else(|| "tool execution failed".to_string())
    });

    ToolCallView {
        id: record.ui_id.clone(),
        node_id: record.step_index.saturating_add(1),
        tool: record.tool_name.clone(),
        status: record.status,
        duration_ms: record.duration_ms,
        started_at: record.started_at,
        result: text,
        error,
        url,
        path,
    }
}
