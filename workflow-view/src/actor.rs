//! WorkflowViewActor - single mutation authority for one workflow view.
//!
//! Envelopes, user actions and timer ticks are serialized through the actor
//! mailbox; every [`ViewEvent`] the engine produces is fanned out to
//! subscribers over a broadcast channel. Debounced re-layout and delayed
//! panel settling carry the engine epoch they were scheduled under and are
//! dropped once a reset moved it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::Envelope;
use tokio::sync::broadcast;

use crate::engine::{
    EngineSnapshot, EnvelopeOutcome, ResumeReport, SubmittedRequest, ViewEvent, WorkflowEngine,
};
use crate::error::WorkflowViewError;
use crate::layout::CanvasSize;
use crate::requests::Transport;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
pub enum WorkflowViewMsg {
    /// Incoming transport envelope. `reply` is optional so connections can
    /// cast without waiting.
    Envelope {
        envelope: Envelope,
        reply: Option<RpcReplyPort<EnvelopeOutcome>>,
    },
    Resize {
        canvas: CanvasSize,
        half_screen: bool,
    },
    TogglePanel {
        node_id: u32,
        reply: RpcReplyPort<bool>,
    },
    ClosePanel {
        node_id: u32,
    },
    SubmitRequest {
        content: String,
        reply: RpcReplyPort<SubmittedRequest>,
    },
    ResumePending {
        reply: RpcReplyPort<ResumeReport>,
    },
    /// Returns the new epoch.
    ResetSession {
        reply: RpcReplyPort<u64>,
    },
    Snapshot {
        reply: RpcReplyPort<EngineSnapshot>,
    },
    SubscribeEvents {
        reply: RpcReplyPort<broadcast::Receiver<ViewEvent>>,
    },
    Relayout {
        epoch: u64,
        generation: u64,
    },
    SettlePanels {
        epoch: u64,
    },
}

#[derive(Debug, Default)]
pub struct WorkflowViewActor;

pub struct WorkflowViewArguments {
    pub engine: WorkflowEngine,
    pub transport: Arc<dyn Transport>,
    pub relayout_debounce: Duration,
    pub panel_settle: Duration,
    /// Replay persisted state and resend pending requests before serving.
    pub restore_on_start: bool,
}

pub struct WorkflowViewState {
    engine: WorkflowEngine,
    transport: Arc<dyn Transport>,
    events_tx: broadcast::Sender<ViewEvent>,
    relayout_debounce: Duration,
    panel_settle: Duration,
    resize_generation: u64,
    /// Epoch of the settle tick in flight, if any.
    settle_epoch: Option<u64>,
}

#[async_trait]
impl Actor for WorkflowViewActor {
    type Msg = WorkflowViewMsg;
    type State = WorkflowViewState;
    type Arguments = WorkflowViewArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(actor_id = %myself.get_id(), "WorkflowViewActor starting");

        let (events_tx, _events_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut state = WorkflowViewState {
            engine: args.engine,
            transport: args.transport,
            events_tx,
            relayout_debounce: args.relayout_debounce,
            panel_settle: args.panel_settle,
            resize_generation: 0,
            settle_epoch: None,
        };

        if args.restore_on_start {
            let restored = state.engine.restore_on_load();
            let report = state
                .engine
                .resume_pending(state.transport.as_ref())
                .await;
            tracing::info!(
                actor_id = %myself.get_id(),
                events = restored.len(),
                resubscribed = report.subscribed.len(),
                resent = report.resent.len(),
                "WorkflowViewActor restored session"
            );
        }

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkflowViewMsg::Envelope { envelope, reply } => {
                let result = state.engine.on_envelope(&envelope);
                Self::dispatch(&myself, state, result.events);
                if let Some(reply) = reply {
                    let _ = reply.send(result.outcome);
                }
            }
            WorkflowViewMsg::Resize {
                canvas,
                half_screen,
            } => {
                state.engine.set_viewport(canvas, half_screen);
                state.resize_generation += 1;
                let epoch = state.engine.epoch();
                let generation = state.resize_generation;
                let delay = state.relayout_debounce;
                let actor = myself.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = actor.cast(WorkflowViewMsg::Relayout { epoch, generation });
                });
            }
            WorkflowViewMsg::TogglePanel { node_id, reply } => {
                let (open, events) = state.engine.toggle_panel(node_id);
                Self::dispatch(&myself, state, events);
                let _ = reply.send(open);
            }
            WorkflowViewMsg::ClosePanel { node_id } => {
                let events = state.engine.close_panel(node_id);
                Self::dispatch(&myself, state, events);
            }
            WorkflowViewMsg::SubmitRequest { content, reply } => {
                let transport = state.transport.clone();
                let submitted = state
                    .engine
                    .submit_request(&content, transport.as_ref())
                    .await;
                Self::dispatch(&myself, state, submitted.events.clone());
                let _ = reply.send(submitted);
            }
            WorkflowViewMsg::ResumePending { reply } => {
                let transport = state.transport.clone();
                let report = state.engine.resume_pending(transport.as_ref()).await;
                let _ = reply.send(report);
            }
            WorkflowViewMsg::ResetSession { reply } => {
                let events = state.engine.reset_session();
                Self::dispatch(&myself, state, events);
                let _ = reply.send(state.engine.epoch());
            }
            WorkflowViewMsg::Snapshot { reply } => {
                let _ = reply.send(state.engine.snapshot());
            }
            WorkflowViewMsg::SubscribeEvents { reply } => {
                let _ = reply.send(state.events_tx.subscribe());
            }
            WorkflowViewMsg::Relayout { epoch, generation } => {
                if epoch != state.engine.epoch() || generation != state.resize_generation {
                    tracing::debug!(epoch, generation, "Dropping stale relayout tick");
                    return Ok(());
                }
                let events = state.engine.relayout();
                Self::dispatch(&myself, state, events);
            }
            WorkflowViewMsg::SettlePanels { epoch } => {
                if state.settle_epoch == Some(epoch) {
                    state.settle_epoch = None;
                }
                if epoch != state.engine.epoch() {
                    tracing::debug!(epoch, "Dropping stale panel settle tick");
                    return Ok(());
                }
                let events = state.engine.settle_panels();
                Self::publish(state, events);
            }
        }
        Ok(())
    }
}

impl WorkflowViewActor {
    fn publish(state: &WorkflowViewState, events: Vec<ViewEvent>) {
        for event in events {
            // No subscribers is fine.
            let _ = state.events_tx.send(event);
        }
    }

    /// Publish `events` and schedule a panel settle if panels or the layout
    /// changed.
    fn dispatch(myself: &ActorRef<WorkflowViewMsg>, state: &mut WorkflowViewState, events: Vec<ViewEvent>) {
        let needs_settle = events.iter().any(|event| {
            matches!(
                event,
                ViewEvent::PanelOpened { .. }
                    | ViewEvent::PanelUpdated { .. }
                    | ViewEvent::LayoutChanged { .. }
            )
        });
        Self::publish(state, events);

        // A tick from an earlier epoch will be dropped, so it does not count.
        let epoch = state.engine.epoch();
        if needs_settle && state.settle_epoch != Some(epoch) {
            state.settle_epoch = Some(epoch);
            let delay = state.panel_settle;
            let actor = myself.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = actor.cast(WorkflowViewMsg::SettlePanels { epoch });
            });
        }
    }
}

// ── Client helpers ───────────────────────────────────────────────────────────

pub async fn spawn_workflow_view(
    args: WorkflowViewArguments,
) -> Result<(ActorRef<WorkflowViewMsg>, tokio::task::JoinHandle<()>), WorkflowViewError> {
    Actor::spawn(None, WorkflowViewActor, args)
        .await
        .map_err(|e| WorkflowViewError::Spawn(e.to_string()))
}

pub async fn deliver_envelope(
    actor: &ActorRef<WorkflowViewMsg>,
    envelope: Envelope,
) -> Result<EnvelopeOutcome, WorkflowViewError> {
    ractor::call!(actor, |reply| WorkflowViewMsg::Envelope {
        envelope,
        reply: Some(reply),
    })
    .map_err(|e| WorkflowViewError::ActorCall(e.to_string()))
}

pub async fn submit_request(
    actor: &ActorRef<WorkflowViewMsg>,
    content: impl Into<String>,
) -> Result<SubmittedRequest, WorkflowViewError> {
    let content = content.into();
    ractor::call!(actor, |reply| WorkflowViewMsg::SubmitRequest { content, reply })
        .map_err(|e| WorkflowViewError::ActorCall(e.to_string()))
}

pub async fn snapshot(actor: &ActorRef<WorkflowViewMsg>) -> Result<EngineSnapshot, WorkflowViewError> {
    ractor::call!(actor, |reply| WorkflowViewMsg::Snapshot { reply })
        .map_err(|e| WorkflowViewError::ActorCall(e.to_string()))
}

pub async fn subscribe_events(
    actor: &ActorRef<WorkflowViewMsg>,
) -> Result<broadcast::Receiver<ViewEvent>, WorkflowViewError> {
    ractor::call!(actor, |reply| WorkflowViewMsg::SubscribeEvents { reply })
        .map_err(|e| WorkflowViewError::ActorCall(e.to_string()))
}
