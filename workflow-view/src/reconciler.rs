//! EventReconciler - folds tool start/complete/error events into per-step
//! tool-call records.
//!
//! Matching is FIFO by tool name within a step. Terminal records never
//! transition again; a terminal event with nothing to promote either is a
//! duplicate delivery (ignored) or arrived before its start (synthesized).

use std::collections::BTreeMap;

use shared_types::{Step, StepStatus, ToolCallRecord, ToolCallStatus, ToolEvent, ToolEventKind};

/// How an accepted event changed the step's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// New running record.
    Started,
    /// Late start joined a record that was already terminal.
    AttachedStart,
    /// Oldest running record promoted to terminal.
    Promoted,
    /// Terminal record created without a preceding start.
    Synthesized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedEvent {
    pub transition: Transition,
    pub record: ToolCallRecord,
    /// The step had no records before this event.
    pub first_for_step: bool,
}

#[derive(Debug, Default)]
pub struct EventReconciler {
    steps: BTreeMap<u32, Vec<ToolCallRecord>>,
    next_seq: u64,
}

fn ui_id(tool_name: &str, step_index: u32, ordinal: usize) -> String {
    format!("tool_{tool_name}_{step_index}_{ordinal}")
}

fn duration_ms(event: &ToolEvent) -> f64 {
    event.duration_secs * 1000.0
}

impl EventReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event. Returns `None` for a duplicate terminal delivery.
    pub fn apply(&mut self, mut event: ToolEvent) -> Option<AppliedEvent> {
        let records = self.steps.entry(event.step_index).or_default();
        let first_for_step = records.is_empty();

        let (transition, index) = match event.kind.terminal_status() {
            None => {
                let awaiting = records
                    .iter()
                    .position(|r| r.tool_name == event.tool_name && r.awaiting_start);
                match awaiting {
                    Some(index) => (Transition::AttachedStart, index),
                    None => (Transition::Started, records.len()),
                }
            }
            Some(status) => {
                let running = records
                    .iter()
                    .position(|r| r.tool_name == event.tool_name && r.status == ToolCallStatus::Running);
                match running {
                    Some(index) => (Transition::Promoted, index),
                    None => {
                        let duplicate = records.iter().any(|r| {
                            r.tool_name == event.tool_name
                                && r.status == status
                                && r.result == event.result
                                && r.duration_ms == duration_ms(&event)
                        });
                        if duplicate {
                            tracing::debug!(
                                step_index = event.step_index,
                                tool_name = %event.tool_name,
                                "Ignoring duplicate terminal tool event"
                            );
                            return None;
                        }
                        (Transition::Synthesized, records.len())
                    }
                }
            }
        };

        self.next_seq += 1;
        event.seq = self.next_seq;

        match transition {
            Transition::Started => {
                records.push(ToolCallRecord {
                    ui_id: ui_id(&event.tool_name, event.step_index, index),
                    tool_name: event.tool_name.clone(),
                    args: event.tool_args.clone(),
                    result: None,
                    status: ToolCallStatus::Running,
                    step_index: event.step_index,
                    started_at: event.timestamp,
                    duration_ms: 0.0,
                    status_text: event.status_text.clone(),
                    failure_reason: None,
                    awaiting_start: false,
                    start_event: Some(event),
                    terminal_event: None,
                });
            }
            Transition::Synthesized => {
                tracing::warn!(
                    step_index = event.step_index,
                    tool_name = %event.tool_name,
                    kind = ?event.kind,
                    "Terminal tool event without a running call; synthesizing record"
                );
                records.push(ToolCallRecord {
                    ui_id: ui_id(&event.tool_name, event.step_index, index),
                    tool_name: event.tool_name.clone(),
                    args: event.tool_args.clone(),
                    result: event.result.clone(),
                    status: event.kind.terminal_status().unwrap_or(ToolCallStatus::Completed),
                    step_index: event.step_index,
                    started_at: event.timestamp,
                    duration_ms: duration_ms(&event),
                    status_text: event.status_text.clone(),
                    failure_reason: None,
                    awaiting_start: true,
                    start_event: None,
                    terminal_event: Some(event),
                });
            }
            Transition::Promoted => {
                let record = &mut records[index];
                record.status = event.kind.terminal_status().unwrap_or(ToolCallStatus::Completed);
                record.result = event.result.clone();
                record.duration_ms = duration_ms(&event);
                record.terminal_event = Some(event);
            }
            Transition::AttachedStart => {
                let record = &mut records[index];
                if record.args.is_empty() || record.args == "{}" {
                    record.args = event.tool_args.clone();
                }
                record.started_at = event.timestamp;
                if record.status_text.is_none() {
                    record.status_text = event.status_text.clone();
                }
                record.awaiting_start = false;
                record.start_event = Some(event);
            }
        }

        Some(AppliedEvent {
            transition,
            record: records[index].clone(),
            first_for_step,
        })
    }

    pub fn records(&self, step_index: u32) -> &[ToolCallRecord] {
        self.steps
            .get(&step_index)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn all_records(&self) -> &BTreeMap<u32, Vec<ToolCallRecord>> {
        &self.steps
    }

    pub fn has_running(&self, step_index: u32) -> bool {
        self.records(step_index)
            .iter()
            .any(|r| r.status == ToolCallStatus::Running)
    }

    /// Node ids of completed steps that have no call still in flight.
    pub fn auto_close_completed_steps(&self, nodes: &[Step]) -> Vec<u32> {
        nodes
            .iter()
            .filter(|node| node.status == StepStatus::Completed)
            .filter(|node| !self.has_running(node.id.saturating_sub(1)))
            .map(|node| node.id)
            .collect()
    }

    /// Every accepted event, in acceptance order.
    pub fn events_in_order(&self) -> Vec<ToolEvent> {
        recorded_events(self.steps.values().flatten())
    }

    /// Abort every running call with `reason`, returning the aborted records.
    pub fn fail_running(&mut self, reason: &str) -> Vec<ToolCallRecord> {
        let mut failed = Vec::new();
        for record in self.steps.values_mut().flatten() {
            if record.status == ToolCallStatus::Running {
                record.status = ToolCallStatus::Failed;
                record.failure_reason = Some(reason.to_string());
                failed.push(record.clone());
            }
        }
        failed
    }

    pub fn clear(&mut self) {
        self.steps.clear();
        self.next_seq = 0;
    }
}

/// Start and terminal events kept on `records`, ordered by sequence number.
pub fn recorded_events<'a>(records: impl IntoIterator<Item = &'a ToolCallRecord>) -> Vec<ToolEvent> {
    let mut events: Vec<ToolEvent> = records
        .into_iter()
        .flat_map(|r| r.start_event.iter().chain(r.terminal_event.iter()))
        .cloned()
        .collect();
    events.sort_by_key(|e| e.seq);
    events
}

/// Kind of event that produced `record`'s current status, for logging.
pub fn last_kind(record: &ToolCallRecord) -> Option<ToolEventKind> {
    record
        .terminal_event
        .as_ref()
        .or(record.start_event.as_ref())
        .map(|e| e.kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn event(step_index: u32, kind: ToolEventKind, tool: &str) -> ToolEvent {
        let terminal = kind.is_terminal();
        ToolEvent {
            seq: 0,
            step_index,
            kind,
            tool_name: tool.to_string(),
            tool_args: r#"{"q":"rust"}"#.to_string(),
            result: terminal.then(|| json!({"summary": "done"})),
            duration_secs: if terminal { 2.0 } else { 0.0 },
            timestamp: at(1_000),
            status_text: None,
        }
    }

    #[test]
    fn test_start_then_complete_promotes_in_place() {
        let mut reconciler = EventReconciler::new();
        let started = reconciler
            .apply(event(0, ToolEventKind::ToolStart, "search"))
            .unwrap();
        assert_eq!(started.transition, Transition::Started);
        assert!(started.first_for_step);
        assert_eq!(started.record.ui_id, "tool_search_0_0");

        let done = reconciler
            .apply(event(0, ToolEventKind::ToolComplete, "search"))
            .unwrap();
        assert_eq!(done.transition, Transition::Promoted);
        assert!(!done.first_for_step);
        assert_eq!(done.record.ui_id, "tool_search_0_0");
        assert_eq!(done.record.status, ToolCallStatus::Completed);
        assert_eq!(done.record.duration_ms, 2000.0);
        assert_eq!(reconciler.records(0).len(), 1);
    }

    #[test]
    fn test_duplicate_terminal_is_ignored() {
        let mut reconciler = EventReconciler::new();
        reconciler.apply(event(0, ToolEventKind::ToolStart, "search"));
        reconciler.apply(event(0, ToolEventKind::ToolComplete, "search"));
        assert!(reconciler
            .apply(event(0, ToolEventKind::ToolComplete, "search"))
            .is_none());
        assert_eq!(reconciler.records(0).len(), 1);
        assert_eq!(reconciler.events_in_order().len(), 2);
    }

    #[test]
    fn test_fifo_matching_by_tool_name() {
        let mut reconciler = EventReconciler::new();
        reconciler.apply(event(1, ToolEventKind::ToolStart, "search"));
        reconciler.apply(event(1, ToolEventKind::ToolStart, "file_read"));
        reconciler.apply(event(1, ToolEventKind::ToolStart, "search"));

        let mut error = event(1, ToolEventKind::ToolError, "search");
        error.result = Some(json!("timeout"));
        let failed = reconciler.apply(error).unwrap();
        assert_eq!(failed.record.ui_id, "tool_search_1_0");
        assert_eq!(failed.record.status, ToolCallStatus::Failed);

        let done = reconciler
            .apply(event(1, ToolEventKind::ToolComplete, "search"))
            .unwrap();
        assert_eq!(done.record.ui_id, "tool_search_1_2");
        assert!(reconciler.has_running(1));
        assert_eq!(reconciler.records(1)[1].status, ToolCallStatus::Running);
    }

    #[test]
    fn test_complete_before_start_yields_one_terminal_record() {
        let mut reconciler = EventReconciler::new();
        let synthesized = reconciler
            .apply(event(2, ToolEventKind::ToolComplete, "search"))
            .unwrap();
        assert_eq!(synthesized.transition, Transition::Synthesized);
        assert!(synthesized.record.awaiting_start);

        let mut late_start = event(2, ToolEventKind::ToolStart, "search");
        late_start.timestamp = at(500);
        let attached = reconciler.apply(late_start).unwrap();
        assert_eq!(attached.transition, Transition::AttachedStart);
        assert_eq!(attached.record.status, ToolCallStatus::Completed);
        assert_eq!(attached.record.started_at, at(500));
        assert!(!attached.record.awaiting_start);

        assert_eq!(reconciler.records(2).len(), 1);
        assert!(!reconciler.has_running(2));
    }

    #[test]
    fn test_steps_are_independent() {
        let mut reconciler = EventReconciler::new();
        reconciler.apply(event(0, ToolEventKind::ToolStart, "search"));
        let other = reconciler
            .apply(event(3, ToolEventKind::ToolComplete, "search"))
            .unwrap();
        assert_eq!(other.transition, Transition::Synthesized);
        assert!(reconciler.has_running(0));
    }

    #[test]
    fn test_auto_close_skips_steps_with_running_calls() {
        let mut reconciler = EventReconciler::new();
        reconciler.apply(event(0, ToolEventKind::ToolStart, "search"));
        reconciler.apply(event(1, ToolEventKind::ToolStart, "search"));
        reconciler.apply(event(1, ToolEventKind::ToolComplete, "search"));

        let node = |id: u32, status: StepStatus| Step {
            id,
            name: format!("step{id}"),
            source_name: format!("task {id}"),
            status,
            dependencies: vec![],
        };
        let nodes = vec![
            node(1, StepStatus::Completed),
            node(2, StepStatus::Completed),
            node(3, StepStatus::InProgress),
            node(4, StepStatus::Completed),
        ];
        assert_eq!(reconciler.auto_close_completed_steps(&nodes), vec![2, 4]);
    }

    #[test]
    fn test_fail_running_and_clear() {
        let mut reconciler = EventReconciler::new();
        reconciler.apply(event(0, ToolEventKind::ToolStart, "search"));
        reconciler.apply(event(0, ToolEventKind::ToolStart, "file_saver"));
        reconciler.apply(event(0, ToolEventKind::ToolComplete, "file_saver"));

        let failed = reconciler.fail_running("session reset");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].failure_reason.as_deref(), Some("session reset"));
        assert!(!reconciler.has_running(0));

        reconciler.clear();
        assert!(reconciler.all_records().is_empty());
        let restarted = reconciler
            .apply(event(0, ToolEventKind::ToolStart, "search"))
            .unwrap();
        assert_eq!(restarted.record.start_event.map(|e| e.seq), Some(1));
    }

    #[test]
    fn test_sequence_numbers_cover_every_accepted_event() {
        let mut reconciler = EventReconciler::new();
        reconciler.apply(event(0, ToolEventKind::ToolStart, "a"));
        reconciler.apply(event(1, ToolEventKind::ToolComplete, "b"));
        reconciler.apply(event(0, ToolEventKind::ToolComplete, "a"));
        reconciler.apply(event(1, ToolEventKind::ToolStart, "b"));

        let seqs: Vec<u64> = reconciler.events_in_order().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        let kinds: Vec<ToolEventKind> = reconciler
            .events_in_order()
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ToolEventKind::ToolStart,
                ToolEventKind::ToolComplete,
                ToolEventKind::ToolComplete,
                ToolEventKind::ToolStart
            ]
        );
        assert_eq!(
            last_kind(&reconciler.records(1)[0]),
            Some(ToolEventKind::ToolComplete)
        );
    }
}
