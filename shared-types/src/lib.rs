//! Shared types between the workflow view engine and its transport
//!
//! These types describe:
//! - the envelopes the backend pushes on a topic (step lists, tool events,
//!   control status)
//! - the graph and tool-call state the engine derives from them
//! - the outbound request the client sends when the user submits a task
//!
//! Serializable with serde for JSON over WebSocket and durable storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Envelope
// ============================================================================

/// Envelope type carrying a full step list, its dependency map and statuses.
pub const ENVELOPE_STEP_LIST: &str = "lui-message-manus-step";
/// Envelope type carrying one tool start/complete/error event.
pub const ENVELOPE_TOOL_EVENT: &str = "lui-message-tool-event";
/// Envelope type signalling the backend stopped or finished a request.
pub const ENVELOPE_CONTROL_STATUS: &str = "control-status-message";

/// Raw transport envelope: `{ topic, data: { type, initData } }`.
///
/// `data` is kept untyped; the engine classifies it tolerantly so a malformed
/// payload degrades to "ignored" instead of failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "workflow.ts")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    #[ts(type = "unknown")]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, kind: &str, init_data: serde_json::Value) -> Self {
        Self {
            topic: Some(topic.into()),
            data: serde_json::json!({
                "type": kind,
                "initData": init_data,
            }),
        }
    }
}

// ============================================================================
// Graph
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "workflow.ts")]
pub enum StepStatus {
    #[default]
    NotStarted,
    InProgress,
    Blocked,
    Completed,
}

impl StepStatus {
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
        }
    }
}

/// One node of the dependency graph. `id` is 1-based and positional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "workflow.ts")]
pub struct Step {
    pub id: u32,
    /// Short display name, `step{id}`.
    pub name: String,
    /// Full opaque step description as delivered by the backend.
    pub source_name: String,
    pub status: StepStatus,
    pub dependencies: Vec<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, TS)]
#[ts(export, export_to = "workflow.ts")]
pub struct Edge {
    pub source: u32,
    pub target: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[ts(export, export_to = "workflow.ts")]
pub struct Progress {
    pub total: u32,
    pub completed: u32,
    pub in_progress: u32,
    pub blocked: u32,
    pub not_started: u32,
}

impl Progress {
    pub fn from_steps(steps: &[Step]) -> Self {
        let mut progress = Self {
            total: steps.len() as u32,
            ..Default::default()
        };
        for step in steps {
            match step.status {
                StepStatus::Completed => progress.completed += 1,
                StepStatus::InProgress => progress.in_progress += 1,
                StepStatus::Blocked => progress.blocked += 1,
                StepStatus::NotStarted => progress.not_started += 1,
            }
        }
        progress
    }

    /// Completed share in percent, 0 when there is nothing to do.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.completed) * 100.0 / f64::from(self.total)
    }
}

/// Immutable graph snapshot. Edges are always derived from step dependencies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, TS)]
#[ts(export, export_to = "workflow.ts")]
pub struct Graph {
    pub title: Option<String>,
    pub nodes: Vec<Step>,
    pub edges: Vec<Edge>,
    pub progress: Progress,
}

impl Graph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: u32) -> Option<&Step> {
        self.nodes.iter().find(|node| node.id == id)
    }
}

// ============================================================================
// Tool events
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "workflow.ts")]
pub enum ToolEventKind {
    ToolStart,
    ToolComplete,
    ToolError,
}

impl ToolEventKind {
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "tool_start" => Some(Self::ToolStart),
            "tool_complete" => Some(Self::ToolComplete),
            "tool_error" => Some(Self::ToolError),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ToolStart)
    }

    /// Status a terminal event settles a record into.
    pub fn terminal_status(&self) -> Option<ToolCallStatus> {
        match self {
            Self::ToolStart => None,
            Self::ToolComplete => Some(ToolCallStatus::Completed),
            Self::ToolError => Some(ToolCallStatus::Failed),
        }
    }
}

/// One accepted tool event, normalized from the `plan` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "workflow.ts")]
pub struct ToolEvent {
    /// Acceptance order, assigned by the reconciler.
    pub seq: u64,
    /// 0-based step index; the graph node id is `step_index + 1`.
    pub step_index: u32,
    pub kind: ToolEventKind,
    pub tool_name: String,
    /// Tool arguments as a JSON string.
    pub tool_args: String,
    #[ts(type = "unknown")]
    pub result: Option<serde_json::Value>,
    /// Duration reported by the backend, in seconds.
    pub duration_secs: f64,
    pub timestamp: DateTime<Utc>,
    pub status_text: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "workflow.ts")]
pub enum ToolCallStatus {
    Running,
    Completed,
    Failed,
}

impl ToolCallStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One physical tool call attributed to a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "workflow.ts")]
pub struct ToolCallRecord {
    /// Stable per physical call, `tool_{name}_{step_index}_{ordinal}`.
    pub ui_id: String,
    pub tool_name: String,
    pub args: String,
    #[ts(type = "unknown")]
    pub result: Option<serde_json::Value>,
    pub status: ToolCallStatus,
    pub step_index: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub status_text: Option<String>,
    /// Set when the call was aborted locally (session reset).
    pub failure_reason: Option<String>,
    /// Terminal record created before its start event was seen.
    #[serde(default)]
    pub awaiting_start: bool,
    pub start_event: Option<ToolEvent>,
    pub terminal_event: Option<ToolEvent>,
}

/// Immutable row model for one tool call in a step panel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "workflow.ts")]
pub struct ToolCallView {
    pub id: String,
    pub node_id: u32,
    pub tool: String,
    pub status: ToolCallStatus,
    pub duration_ms: f64,
    pub started_at: DateTime<Utc>,
    pub result: String,
    pub error: Option<String>,
    pub url: Option<String>,
    pub path: Option<String>,
}

// ============================================================================
// Outbound requests
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "workflow.ts")]
pub struct SessionInfo {
    /// Stable for one logical request, reused across resends.
    pub message_serial_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "workflow.ts")]
pub struct MessageContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "workflow.ts")]
pub struct RoleInfo {
    pub name: String,
}

/// Request envelope sent on a fresh topic when the user submits a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "workflow.ts")]
pub struct OutboundMessage {
    pub uuid: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub from: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub init_data: Vec<MessageContent>,
    pub role_info: RoleInfo,
    pub mentions: Vec<String>,
    #[ts(type = "unknown")]
    pub extra: serde_json::Value,
    pub session_info: SessionInfo,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>, message_serial_number: impl Into<String>) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            kind: "multi-modal".to_string(),
            from: "human".to_string(),
            timestamp: Utc::now().timestamp_millis(),
            init_data: vec![MessageContent {
                kind: "text".to_string(),
                value: content.into(),
            }],
            role_info: RoleInfo {
                name: "admin".to_string(),
            },
            mentions: Vec::new(),
            extra: serde_json::json!({
                "fromBackEnd": {
                    "actualPrompt": serde_json::json!({"deepResearchEnabled": true}).to_string()
                }
            }),
            session_info: SessionInfo {
                message_serial_number: message_serial_number.into(),
            },
        }
    }
}

/// A submitted request whose terminal acknowledgment has not been observed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "workflow.ts")]
pub struct PendingRequest {
    pub message: OutboundMessage,
    pub saved_at: i64,
    /// True until any message arrives on the request's topic.
    pub still_pending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "workflow.ts")]
pub struct PlanRecord {
    pub plan_id: String,
    pub still_pending: bool,
    pub completed: bool,
}

// ============================================================================
// Tests
// ============================================================================
