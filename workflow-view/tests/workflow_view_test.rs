//! End-to-end engine tests: envelopes in, graph / records / panels out, and
//! session state surviving a restart through a real store.
//!
//! Run:
//!   cargo test -p workflow-view --test workflow_view_test -- --nocapture

use serde_json::{json, Value};
use shared_types::{
    Envelope, ToolCallStatus, ENVELOPE_CONTROL_STATUS, ENVELOPE_STEP_LIST, ENVELOPE_TOOL_EVENT,
};
use workflow_view::engine::{EnvelopeOutcome, ViewEvent, ViewSettings, WorkflowEngine};
use workflow_view::error::StorageError;
use workflow_view::requests::{ChannelTransport, TransportCommand};
use workflow_view::session::SessionStore;
use workflow_view::storage::{FileStore, KeyValueStore, MemoryStore, SqliteStore};

// ─── Helpers ─────────────────────────────────────────────────────────────────

const TOPIC: &str = "topic-research";

fn engine_with(store: Box<dyn KeyValueStore>) -> WorkflowEngine {
    WorkflowEngine::new(SessionStore::new(store, "workflow"), ViewSettings::default())
}

fn step_list(steps: usize, dependencies: Value) -> Envelope {
    let names: Vec<String> = (1..=steps).map(|i| format!("Step number {i}")).collect();
    Envelope::new(
        TOPIC,
        ENVELOPE_STEP_LIST,
        json!({
            "title": "Research plan",
            "steps": names,
            "dependencies": dependencies,
            "step_statuses": {}
        }),
    )
}

fn tool_event(step_index: u32, event_type: &str, tool_name: &str, result: Value) -> Envelope {
    Envelope::new(
        TOPIC,
        ENVELOPE_TOOL_EVENT,
        json!({"plan": {
            "step_index": step_index,
            "event_type": event_type,
            "tool_name": tool_name,
            "tool_args": {"query": "actor frameworks"},
            "processed_result": result,
            "duration": 0.25
        }}),
    )
}

fn layers(engine: &WorkflowEngine) -> Vec<Vec<u32>> {
    engine.layout().layers.clone()
}

fn edges(engine: &WorkflowEngine) -> Vec<(u32, u32)> {
    engine
        .graph()
        .edges
        .iter()
        .map(|e| (e.source, e.target))
        .collect()
}

/// Store whose every operation fails, as a full disk or revoked permission
/// would.
struct FailingStore;

impl KeyValueStore for FailingStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable("quota exceeded".to_string()))
    }

    fn set(&mut self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("quota exceeded".to_string()))
    }

    fn remove(&mut self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("quota exceeded".to_string()))
    }
}

// ─── Graph and layering ──────────────────────────────────────────────────────

#[test]
fn test_diamond_pipeline_layers() {
    let mut engine = engine_with(Box::new(MemoryStore::new()));
    let outcome = engine.on_envelope(&step_list(
        6,
        json!({"2": [1], "3": [1], "4": [2, 3], "5": [2, 3], "6": [4, 5]}),
    ));
    assert_eq!(outcome.outcome, EnvelopeOutcome::GraphRebuilt);
    assert_eq!(layers(&engine), vec![vec![1], vec![2, 3], vec![4, 5], vec![6]]);
    assert_eq!(engine.graph().edges.len(), 8);
}

#[test]
fn test_zero_based_map_is_normalized_to_same_graph() {
    let mut zero_based = engine_with(Box::new(MemoryStore::new()));
    zero_based.on_envelope(&step_list(
        6,
        json!({"0": [], "1": [0], "2": [0], "3": [1, 2], "4": [1, 2], "5": [3, 4]}),
    ));
    let mut one_based = engine_with(Box::new(MemoryStore::new()));
    one_based.on_envelope(&step_list(
        6,
        json!({"2": [1], "3": [1], "4": [2, 3], "5": [2, 3], "6": [4, 5]}),
    ));

    assert_eq!(layers(&zero_based), layers(&one_based));
    let mut zero_edges = edges(&zero_based);
    let mut one_edges = edges(&one_based);
    zero_edges.sort();
    one_edges.sort();
    assert_eq!(zero_edges, one_edges);
}

#[test]
fn test_chain_plan_without_root_key() {
    // Each step depends on the previous one; step 0 has no entry of its own.
    let mut engine = engine_with(Box::new(MemoryStore::new()));
    engine.on_envelope(&step_list(4, json!({"1": [0], "2": [1], "3": [2]})));
    let mut edges = edges(&engine);
    edges.sort();
    assert_eq!(edges, vec![(1, 2), (2, 3), (3, 4)]);
    assert_eq!(layers(&engine), vec![vec![1], vec![2], vec![3], vec![4]]);
}

#[test]
fn test_one_based_scenario_map_layers() {
    // Keys start at 3 and values at 1, so both axes are read as 1-based and
    // step 6 has no dependencies at all.
    let mut engine = engine_with(Box::new(MemoryStore::new()));
    engine.on_envelope(&step_list(6, json!({"3": [1, 2], "4": [1, 2], "5": [3, 4]})));
    let mut edges = edges(&engine);
    edges.sort();
    assert_eq!(edges, vec![(1, 3), (1, 4), (2, 3), (2, 4), (3, 5), (4, 5)]);
    assert_eq!(layers(&engine), vec![vec![1, 2, 6], vec![3, 4], vec![5]]);
}

#[test]
fn test_zero_zero_map_never_makes_a_self_loop() {
    let mut zero_based = engine_with(Box::new(MemoryStore::new()));
    zero_based.on_envelope(&step_list(4, json!({"0": [0]})));
    let mut one_based = engine_with(Box::new(MemoryStore::new()));
    one_based.on_envelope(&step_list(4, json!({"1": [1]})));

    assert_eq!(edges(&zero_based), edges(&one_based));
    assert!(edges(&zero_based).iter().all(|(source, target)| source != target));
    assert_eq!(layers(&zero_based), vec![vec![1, 2, 3, 4]]);
}

#[test]
fn test_layout_is_deterministic() {
    let deps = json!({"2": [1], "3": [1], "4": [2, 3]});
    let mut first = engine_with(Box::new(MemoryStore::new()));
    first.on_envelope(&step_list(4, deps.clone()));
    let mut second = engine_with(Box::new(MemoryStore::new()));
    second.on_envelope(&step_list(4, deps));

    assert_eq!(first.layout(), second.layout());
    assert!(first.relayout().is_empty());
}

#[test]
fn test_independent_steps_share_first_layer() {
    let mut engine = engine_with(Box::new(MemoryStore::new()));
    engine.on_envelope(&step_list(6, json!({"3": [1, 2], "4": [3], "5": [4]})));
    assert_eq!(layers(&engine), vec![vec![1, 2, 6], vec![3], vec![4], vec![5]]);

    // Every node gets a position, and positions stay inside the canvas.
    let canvas = engine.settings().canvas;
    for node in &engine.graph().nodes {
        let position = engine.layout().position(node.id).unwrap();
        assert!(position.x >= 0.0 && position.x <= canvas.width);
        assert!(position.y >= 0.0 && position.y <= canvas.height);
    }
}

#[test]
fn test_invalid_dependencies_are_dropped() {
    let mut engine = engine_with(Box::new(MemoryStore::new()));
    engine.on_envelope(&step_list(3, json!({"2": [1, 1, 9], "3": [3, "x", 2]})));
    let mut edges = edges(&engine);
    edges.sort();
    assert_eq!(edges, vec![(1, 2), (2, 3)]);
}

#[test]
fn test_cycle_members_are_left_out_of_layout() {
    let mut engine = engine_with(Box::new(MemoryStore::new()));
    engine.on_envelope(&step_list(3, json!({"2": [1, 3], "3": [2]})));
    assert_eq!(engine.graph().nodes.len(), 3);
    assert_eq!(layers(&engine), vec![vec![1]]);
    assert!(engine.layout().position(2).is_none());
    assert!(engine.layout().position(1).is_some());
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

#[test]
fn test_duplicate_terminal_delivery_is_idempotent() {
    let mut engine = engine_with(Box::new(MemoryStore::new()));
    engine.on_envelope(&step_list(2, json!({"2": [1]})));
    engine.on_envelope(&tool_event(0, "tool_start", "search_google", Value::Null));

    let complete = tool_event(0, "tool_complete", "search_google", json!("3 results"));
    assert_eq!(engine.on_envelope(&complete).outcome, EnvelopeOutcome::ToolEventApplied);
    let before = engine.reconciler().all_records().clone();

    let again = engine.on_envelope(&complete);
    assert_eq!(again.outcome, EnvelopeOutcome::DuplicateToolEvent);
    assert!(again.events.is_empty());
    assert_eq!(engine.reconciler().all_records(), &before);
}

#[test]
fn test_terminal_before_start_merges_into_one_record() {
    let mut engine = engine_with(Box::new(MemoryStore::new()));
    engine.on_envelope(&tool_event(1, "tool_complete", "file_read", json!("contents")));
    assert!(engine.reconciler().records(1)[0].awaiting_start);

    engine.on_envelope(&tool_event(1, "tool_start", "file_read", Value::Null));
    let records = engine.reconciler().records(1);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ToolCallStatus::Completed);
    assert!(!records[0].awaiting_start);
    assert_eq!(records[0].args, r#"{"query":"actor frameworks"}"#);
}

#[test]
fn test_repeated_tool_calls_keep_separate_rows() {
    let mut engine = engine_with(Box::new(MemoryStore::new()));
    engine.on_envelope(&tool_event(0, "tool_start", "search_google", Value::Null));
    engine.on_envelope(&tool_event(0, "tool_complete", "search_google", json!("first")));
    engine.on_envelope(&tool_event(0, "tool_start", "search_google", Value::Null));
    engine.on_envelope(&tool_event(0, "tool_error", "search_google", json!("timeout")));

    let records = engine.reconciler().records(0);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, ToolCallStatus::Completed);
    assert_eq!(records[1].status, ToolCallStatus::Failed);
    assert_ne!(records[0].ui_id, records[1].ui_id);

    let panel = engine.panels().panel(1).unwrap();
    assert_eq!(panel.rows.len(), 2);
    assert_eq!(panel.rows[0].id, records[1].ui_id);
}

// ─── Persistence and restore ─────────────────────────────────────────────────

#[test]
fn test_restore_replays_to_identical_state() {
    let dir = tempfile::tempdir().unwrap();

    let mut live = engine_with(Box::new(FileStore::open(dir.path()).unwrap()));
    live.on_envelope(&step_list(3, json!({"2": [1], "3": [2]})));
    live.on_envelope(&tool_event(0, "tool_start", "search_google", Value::Null));
    live.on_envelope(&tool_event(0, "tool_complete", "search_google", json!("ok")));
    live.on_envelope(&tool_event(1, "tool_error", "file_saver", json!("disk full")));
    live.on_envelope(&tool_event(2, "tool_start", "mark_step", Value::Null));
    let expected = live.snapshot();
    drop(live);

    let mut restored = engine_with(Box::new(FileStore::open(dir.path()).unwrap()));
    let events = restored.restore_on_load();
    assert!(!events.is_empty());

    let actual = restored.snapshot();
    let failed = &actual.tool_calls[&1][0];
    assert_eq!(failed.status, ToolCallStatus::Failed);
    assert_eq!(failed.result, Some(json!("disk full")));
    assert_eq!(failed, &expected.tool_calls[&1][0]);
    assert_eq!(actual.graph, expected.graph);
    assert_eq!(actual.tool_calls, expected.tool_calls);
    assert_eq!(actual.layout, expected.layout);
    assert_eq!(
        serde_json::to_string(&actual.tool_calls).unwrap(),
        serde_json::to_string(&expected.tool_calls).unwrap()
    );
}

#[test]
fn test_restore_from_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.db");
    let path = path.to_string_lossy().to_string();

    let mut live = engine_with(Box::new(SqliteStore::open(&path).unwrap()));
    live.on_envelope(&step_list(2, json!({"2": [1]})));
    live.on_envelope(&tool_event(1, "tool_start", "browse_url", Value::Null));
    let expected = live.snapshot();
    drop(live);

    let mut restored = engine_with(Box::new(SqliteStore::open(&path).unwrap()));
    restored.restore_on_load();
    assert_eq!(restored.snapshot().tool_calls, expected.tool_calls);
    assert_eq!(restored.graph().nodes.len(), 2);
}

#[test]
fn test_restore_with_nothing_persisted_is_empty() {
    let mut engine = engine_with(Box::new(MemoryStore::new()));
    assert!(engine.restore_on_load().is_empty());
    assert!(engine.graph().is_empty());
}

#[test]
fn test_failing_store_degrades_to_in_memory() {
    let mut engine = engine_with(Box::new(FailingStore));
    assert!(engine.restore_on_load().is_empty());

    engine.on_envelope(&step_list(2, json!({"2": [1]})));
    engine.on_envelope(&tool_event(0, "tool_start", "search_google", Value::Null));
    assert_eq!(engine.graph().nodes.len(), 2);
    assert_eq!(engine.reconciler().records(0).len(), 1);
    assert!(engine.panels().is_open(1));

    let events = engine.reset_session();
    assert!(events.contains(&ViewEvent::SessionReset { epoch: 1 }));
}

#[test]
fn test_reset_clears_persisted_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with(Box::new(FileStore::open(dir.path()).unwrap()));
    engine.on_envelope(&step_list(2, json!({"2": [1]})));
    engine.on_envelope(&tool_event(0, "tool_start", "search_google", Value::Null));
    engine.reset_session();
    drop(engine);

    let mut restored = engine_with(Box::new(FileStore::open(dir.path()).unwrap()));
    assert!(restored.restore_on_load().is_empty());
    assert!(restored.reconciler().all_records().is_empty());
}

// ─── Pending requests ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unacknowledged_request_is_resent_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut commands) = ChannelTransport::channel();

    let mut live = engine_with(Box::new(FileStore::open(dir.path()).unwrap()));
    let submitted = live.submit_request("summarize actor frameworks", &transport).await;
    drop(live);
    while commands.try_recv().is_ok() {}

    let mut restored = engine_with(Box::new(FileStore::open(dir.path()).unwrap()));
    restored.restore_on_load();
    let report = restored.resume_pending(&transport).await;
    assert_eq!(report.subscribed, vec![submitted.topic.clone()]);
    assert_eq!(report.resent, vec![submitted.topic.clone()]);

    assert_eq!(
        commands.recv().await,
        Some(TransportCommand::Subscribe {
            topic: submitted.topic.clone()
        })
    );
    match commands.recv().await {
        Some(TransportCommand::Send { topic, message }) => {
            assert_eq!(topic, submitted.topic);
            assert_eq!(
                message.session_info.message_serial_number,
                submitted.message.session_info.message_serial_number
            );
            assert_eq!(message, submitted.message);
        }
        other => panic!("expected resend, got {other:?}"),
    }
}

#[tokio::test]
async fn test_acknowledged_request_is_only_resubscribed() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut commands) = ChannelTransport::channel();

    let mut live = engine_with(Box::new(FileStore::open(dir.path()).unwrap()));
    let submitted = live.submit_request("compare storage engines", &transport).await;
    let topic = submitted.topic.clone();
    let steps = Envelope::new(
        &topic,
        ENVELOPE_STEP_LIST,
        json!({"steps": ["Collect", "Compare"], "dependencies": {"2": [1]}}),
    );
    live.on_envelope(&steps);
    drop(live);
    while commands.try_recv().is_ok() {}

    let mut restored = engine_with(Box::new(FileStore::open(dir.path()).unwrap()));
    restored.restore_on_load();
    let report = restored.resume_pending(&transport).await;
    assert_eq!(report.subscribed, vec![topic.clone()]);
    assert!(report.resent.is_empty());

    // Terminal control status drops the ledger entry for good.
    let control = Envelope::new(&topic, ENVELOPE_CONTROL_STATUS, json!({"status": "completed"}));
    assert_eq!(restored.on_envelope(&control).outcome, EnvelopeOutcome::ControlStatus);
    assert!(restored.ledger().pending().is_empty());
}
