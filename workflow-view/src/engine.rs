//! WorkflowEngine - single owner of graph, layout, tool-call records, panels,
//! request ledger and session persistence.
//!
//! Every entry point returns the [`ViewEvent`]s it produced so the caller
//! (usually the actor) can forward them. Live envelopes and reload replay go
//! through the same `on_envelope` / `apply_tool_event` paths.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use shared_types::{
    Envelope, Graph, OutboundMessage, PendingRequest, ToolCallRecord, ToolCallView, ToolEvent,
};

use crate::graph::graph_from_payload;
use crate::layout::{layout, CanvasSize, GraphLayout, NodePosition};
use crate::panels::{Panel, PanelController};
use crate::parsers::{
    classify_envelope, control_status_label, parse_tool_event, EnvelopeKind, StepListPayload,
};
use crate::reconciler::{last_kind, recorded_events, EventReconciler};
use crate::requests::{RequestLedger, Transport};
use crate::session::SessionStore;
use crate::view::{is_hidden_tool, tool_call_view};

/// Failure reason stamped on calls still running when the session resets.
pub const RESET_REASON: &str = "session reset";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewEvent {
    GraphRebuilt { graph: Graph },
    GraphCleared,
    LayoutChanged { layout: GraphLayout },
    PanelOpened { node_id: u32, title: String },
    PanelUpdated { node_id: u32, row: ToolCallView },
    PanelClosed { node_id: u32 },
    PanelMoved { node_id: u32, anchor: Option<NodePosition> },
    SessionReset { epoch: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeOutcome {
    GraphRebuilt,
    GraphCleared,
    ToolEventApplied,
    DuplicateToolEvent,
    ControlStatus,
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeResult {
    pub outcome: EnvelopeOutcome,
    pub events: Vec<ViewEvent>,
}

impl EnvelopeResult {
    fn new(outcome: EnvelopeOutcome, events: Vec<ViewEvent>) -> Self {
        Self { outcome, events }
    }

    fn ignored() -> Self {
        Self::new(EnvelopeOutcome::Ignored, Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewSettings {
    pub canvas: CanvasSize,
    pub half_screen: bool,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            canvas: CanvasSize::default(),
            half_screen: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmittedRequest {
    pub topic: String,
    pub message: OutboundMessage,
    pub events: Vec<ViewEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResumeReport {
    pub subscribed: Vec<String>,
    pub resent: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub epoch: u64,
    pub graph: Graph,
    pub layout: GraphLayout,
    pub panels: Vec<Panel>,
    pub tool_calls: BTreeMap<u32, Vec<ToolCallRecord>>,
    pub pending_requests: BTreeMap<String, PendingRequest>,
}

#[derive(Debug)]
pub struct WorkflowEngine {
    graph: Graph,
    layout: GraphLayout,
    reconciler: EventReconciler,
    panels: PanelController,
    ledger: RequestLedger,
    session: SessionStore,
    settings: ViewSettings,
    /// Bumped by every reset; timers scheduled under an older epoch are stale.
    epoch: u64,
}

impl WorkflowEngine {
    pub fn new(session: SessionStore, settings: ViewSettings) -> Self {
        Self {
            graph: Graph::default(),
            layout: GraphLayout::default(),
            reconciler: EventReconciler::new(),
            panels: PanelController::new(),
            ledger: RequestLedger::new(),
            session,
            settings,
            epoch: 0,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn layout(&self) -> &GraphLayout {
        &self.layout
    }

    pub fn reconciler(&self) -> &EventReconciler {
        &self.reconciler
    }

    pub fn panels(&self) -> &PanelController {
        &self.panels
    }

    pub fn ledger(&self) -> &RequestLedger {
        &self.ledger
    }

    pub fn settings(&self) -> ViewSettings {
        self.settings
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            epoch: self.epoch,
            graph: self.graph.clone(),
            layout: self.layout.clone(),
            panels: self.panels.open_panels().cloned().collect(),
            tool_calls: self.reconciler.all_records().clone(),
            pending_requests: self.ledger.pending().clone(),
        }
    }

    // ── Envelopes ────────────────────────────────────────────────────────────

    pub fn on_envelope(&mut self, envelope: &Envelope) -> EnvelopeResult {
        let classified = match classify_envelope(envelope) {
            Ok(classified) => classified,
            Err(e) => {
                tracing::warn!(topic = ?envelope.topic, error = %e, "Ignoring malformed envelope");
                return EnvelopeResult::ignored();
            }
        };

        if let Some(topic) = classified.topic.as_deref() {
            if self.ledger.mark_activity(topic) {
                tracing::debug!(topic, "Backend picked up pending request");
                self.persist_ledger();
            }
        }

        match classified.kind {
            EnvelopeKind::StepList(payload) => self.apply_step_list(envelope, &payload),
            EnvelopeKind::ToolEvent(plan) => match parse_tool_event(&plan, Utc::now()) {
                Some(event) => self.apply_tool_event(event),
                None => {
                    tracing::warn!(plan = %plan, "Dropping tool event with missing or invalid fields");
                    EnvelopeResult::ignored()
                }
            },
            EnvelopeKind::ControlStatus(init_data) => {
                let status = control_status_label(&init_data);
                tracing::info!(topic = ?classified.topic, status = %status, "Control status received");
                if let Some(topic) = classified.topic.as_deref() {
                    if self.ledger.complete(topic) {
                        self.persist_ledger();
                    }
                }
                EnvelopeResult::new(EnvelopeOutcome::ControlStatus, Vec::new())
            }
            EnvelopeKind::Other(kind) => {
                tracing::debug!(kind = %kind, "Ignoring unrecognized envelope type");
                EnvelopeResult::ignored()
            }
        }
    }

    fn apply_step_list(&mut self, envelope: &Envelope, payload: &StepListPayload) -> EnvelopeResult {
        let graph = graph_from_payload(payload);
        self.session.persist_step_message(envelope);

        if graph.is_empty() {
            tracing::info!("Step list is empty; clearing graph");
            self.graph = Graph::default();
            self.layout = GraphLayout::default();
            return EnvelopeResult::new(EnvelopeOutcome::GraphCleared, vec![ViewEvent::GraphCleared]);
        }

        tracing::info!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            completed = graph.progress.completed,
            "Rebuilt workflow graph"
        );
        self.graph = graph;
        self.layout = self.compute_layout();

        let mut events = vec![
            ViewEvent::GraphRebuilt {
                graph: self.graph.clone(),
            },
            ViewEvent::LayoutChanged {
                layout: self.layout.clone(),
            },
        ];

        for node_id in self.panels.open_ids() {
            let title = self.panel_title(node_id);
            self.panels.set_title(node_id, title);
        }

        for node_id in self.reconciler.auto_close_completed_steps(&self.graph.nodes) {
            if self.panels.close_panel(node_id) {
                tracing::debug!(node_id, "Closing panel of completed step");
                events.push(ViewEvent::PanelClosed { node_id });
            }
        }

        EnvelopeResult::new(EnvelopeOutcome::GraphRebuilt, events)
    }

    /// Fold one normalized tool event and refresh its step panel.
    pub fn apply_tool_event(&mut self, event: ToolEvent) -> EnvelopeResult {
        if event.step_index.checked_add(1).is_none() {
            tracing::warn!(step_index = event.step_index, "Dropping tool event with unaddressable step index");
            return EnvelopeResult::ignored();
        }
        let Some(applied) = self.reconciler.apply(event) else {
            return EnvelopeResult::new(EnvelopeOutcome::DuplicateToolEvent, Vec::new());
        };
        self.session.persist_tool_events(self.reconciler.all_records());

        let record = &applied.record;
        tracing::debug!(
            step_index = record.step_index,
            tool_name = %record.tool_name,
            transition = ?applied.transition,
            kind = ?last_kind(record),
            first_for_step = applied.first_for_step,
            "Applied tool event"
        );

        let mut events = Vec::new();
        if is_hidden_tool(&record.tool_name) {
            return EnvelopeResult::new(EnvelopeOutcome::ToolEventApplied, events);
        }

        let node_id = record.step_index.saturating_add(1);
        let title = self.panel_title(node_id);
        if self.panels.auto_open(node_id, title.clone()) {
            events.push(ViewEvent::PanelOpened { node_id, title });
        }
        let row = tool_call_view(record);
        if self.panels.update_panel(node_id, row.clone()) {
            events.push(ViewEvent::PanelUpdated { node_id, row });
        }

        EnvelopeResult::new(EnvelopeOutcome::ToolEventApplied, events)
    }

    // ── Layout and panels ────────────────────────────────────────────────────

    fn compute_layout(&self) -> GraphLayout {
        layout(&self.graph, self.settings.canvas, self.settings.half_screen)
    }

    pub fn set_viewport(&mut self, canvas: CanvasSize, half_screen: bool) {
        self.settings = ViewSettings {
            canvas,
            half_screen,
        };
    }

    /// Recompute coordinates for the current viewport; emits only on change.
    pub fn relayout(&mut self) -> Vec<ViewEvent> {
        let next = self.compute_layout();
        if next == self.layout {
            return Vec::new();
        }
        self.layout = next;
        vec![ViewEvent::LayoutChanged {
            layout: self.layout.clone(),
        }]
    }

    /// Re-anchor open panels to the current layout.
    pub fn settle_panels(&mut self) -> Vec<ViewEvent> {
        self.panels
            .reposition(&self.layout)
            .into_iter()
            .map(|node_id| ViewEvent::PanelMoved {
                node_id,
                anchor: self.layout.position(node_id),
            })
            .collect()
    }

    fn panel_title(&self, node_id: u32) -> String {
        match self.graph.node(node_id) {
            Some(node) => format!("Step {node_id} - {}", node.source_name),
            None => format!("Step {node_id}"),
        }
    }

    fn visible_rows(&self, node_id: u32) -> Vec<ToolCallView> {
        self.reconciler
            .records(node_id.saturating_sub(1))
            .iter()
            .filter(|record| !is_hidden_tool(&record.tool_name))
            .map(tool_call_view)
            .collect()
    }

    /// User click on a node. Returns whether the panel ended up open.
    pub fn toggle_panel(&mut self, node_id: u32) -> (bool, Vec<ViewEvent>) {
        if node_id == 0 {
            return (false, Vec::new());
        }
        let title = self.panel_title(node_id);
        let rows = self.visible_rows(node_id);
        if !self.panels.toggle_panel(node_id, title.clone(), rows) {
            return (false, vec![ViewEvent::PanelClosed { node_id }]);
        }

        let mut events = vec![ViewEvent::PanelOpened { node_id, title }];
        if let Some(panel) = self.panels.panel(node_id) {
            events.extend(panel.rows.iter().rev().map(|row| ViewEvent::PanelUpdated {
                node_id,
                row: row.clone(),
            }));
        }
        (true, events)
    }

    pub fn close_panel(&mut self, node_id: u32) -> Vec<ViewEvent> {
        if self.panels.close_panel(node_id) {
            vec![ViewEvent::PanelClosed { node_id }]
        } else {
            Vec::new()
        }
    }

    // ── Session ──────────────────────────────────────────────────────────────

    fn persist_ledger(&mut self) {
        self.session.persist_pending(self.ledger.pending());
        self.session.persist_plan_ids(self.ledger.plans());
    }

    /// Rebuild state from the durable store through the live event paths:
    /// tool events first (in acceptance order), then the last step list so
    /// completed steps close their panels.
    pub fn restore_on_load(&mut self) -> Vec<ViewEvent> {
        let saved = self.session.load();
        self.ledger = RequestLedger::from_parts(saved.pending_requests, saved.plan_ids);

        let replay = recorded_events(saved.step_tool_events.values().flatten());
        let replayed = replay.len();
        let mut events = Vec::new();
        for event in replay {
            events.extend(self.apply_tool_event(event).events);
        }

        let restored_graph = saved.last_step_message.is_some();
        if let Some(message) = saved.last_step_message {
            events.extend(self.on_envelope(&message).events);
        }

        tracing::info!(
            tool_events = replayed,
            restored_graph,
            pending_requests = self.ledger.pending().len(),
            "Restored session state"
        );
        events
    }

    /// Hard cancellation boundary for the current run.
    pub fn reset_session(&mut self) -> Vec<ViewEvent> {
        self.epoch += 1;
        let mut events = Vec::new();

        for record in self.reconciler.fail_running(RESET_REASON) {
            if is_hidden_tool(&record.tool_name) {
                continue;
            }
            let node_id = record.step_index.saturating_add(1);
            let row = tool_call_view(&record);
            if self.panels.update_panel(node_id, row.clone()) {
                events.push(ViewEvent::PanelUpdated { node_id, row });
            }
        }
        events.extend(
            self.panels
                .reset()
                .into_iter()
                .map(|node_id| ViewEvent::PanelClosed { node_id }),
        );

        self.reconciler.clear();
        self.ledger.clear();
        self.graph = Graph::default();
        self.layout = GraphLayout::default();
        self.session.clear_all();

        tracing::info!(epoch = self.epoch, "Session reset");
        events.push(ViewEvent::GraphCleared);
        events.push(ViewEvent::SessionReset { epoch: self.epoch });
        events
    }

    /// Start a new top-level request on a fresh topic, superseding the
    /// current run.
    pub async fn submit_request(
        &mut self,
        content: &str,
        transport: &dyn Transport,
    ) -> SubmittedRequest {
        let events = self.reset_session();

        let topic = uuid::Uuid::new_v4().to_string();
        let plan_id = self.ledger.ensure_plan_id(&topic);
        let message = OutboundMessage::text(content, plan_id);
        self.ledger.record_pending(&topic, message.clone());
        self.persist_ledger();

        if let Err(e) = transport.subscribe(&topic).await {
            tracing::warn!(topic = %topic, error = %e, "Subscribe failed");
        }
        if let Err(e) = transport.send(&topic, &message).await {
            tracing::warn!(topic = %topic, error = %e, "Send failed; request stays pending");
        }

        tracing::info!(
            topic = %topic,
            plan_id = %message.session_info.message_serial_number,
            "Submitted request"
        );
        SubmittedRequest {
            topic,
            message,
            events,
        }
    }

    /// Re-subscribe every pending topic and resend requests the backend never
    /// picked up, unchanged.
    pub async fn resume_pending(&mut self, transport: &dyn Transport) -> ResumeReport {
        let mut report = ResumeReport::default();
        for topic in self.ledger.topics() {
            match transport.subscribe(&topic).await {
                Ok(()) => report.subscribed.push(topic),
                Err(e) => tracing::warn!(topic = %topic, error = %e, "Re-subscribe failed"),
            }
        }
        for (topic, message) in self.ledger.resendable() {
            match transport.send(&topic, &message).await {
                Ok(()) => report.resent.push(topic),
                Err(e) => tracing::warn!(topic = %topic, error = %e, "Resend failed"),
            }
        }
        if !report.resent.is_empty() {
            tracing::info!(resent = report.resent.len(), "Resent pending requests");
        }
        report
    }
}
