//! Outbound request ledger and the transport contract.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use shared_types::{OutboundMessage, PendingRequest, PlanRecord};
use tokio::sync::mpsc;

use crate::error::TransportError;

// ─── Transport ───────────────────────────────────────────────────────────────

/// Delivery side of the persistent connection. Incoming envelopes are fed to
/// the engine by whoever owns the connection; the engine only subscribes and
/// sends.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;
    async fn send(&self, topic: &str, message: &OutboundMessage) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    Subscribe { topic: String },
    Send { topic: String, message: OutboundMessage },
}

/// Transport that forwards every command to a channel, for a connection task
/// (or a test) to drain.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<TransportCommand>,
}

impl ChannelTransport {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.tx
            .send(TransportCommand::Subscribe {
                topic: topic.to_string(),
            })
            .map_err(|e| TransportError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn send(&self, topic: &str, message: &OutboundMessage) -> Result<(), TransportError> {
        self.tx
            .send(TransportCommand::Send {
                topic: topic.to_string(),
                message: message.clone(),
            })
            .map_err(|e| TransportError::Send {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

/// Pending requests and plan ids, keyed by topic.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RequestLedger {
    pending: BTreeMap<String, PendingRequest>,
    plans: BTreeMap<String, PlanRecord>,
}

impl RequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(
        pending: BTreeMap<String, PendingRequest>,
        plans: BTreeMap<String, PlanRecord>,
    ) -> Self {
        Self { pending, plans }
    }

    pub fn pending(&self) -> &BTreeMap<String, PendingRequest> {
        &self.pending
    }

    pub fn plans(&self) -> &BTreeMap<String, PlanRecord> {
        &self.plans
    }

    /// Plan id for `topic`: reused while the plan is not completed, fresh
    /// otherwise.
    pub fn ensure_plan_id(&mut self, topic: &str) -> String {
        if let Some(plan) = self
            .plans
            .get(topic)
            .filter(|plan| !plan.completed && !plan.plan_id.is_empty())
        {
            return plan.plan_id.clone();
        }
        let plan_id = uuid::Uuid::new_v4().to_string();
        self.plans.insert(
            topic.to_string(),
            PlanRecord {
                plan_id: plan_id.clone(),
                still_pending: true,
                completed: false,
            },
        );
        plan_id
    }

    pub fn record_pending(&mut self, topic: &str, message: OutboundMessage) {
        self.pending.insert(
            topic.to_string(),
            PendingRequest {
                message,
                saved_at: Utc::now().timestamp_millis(),
                still_pending: true,
            },
        );
    }

    /// Any message on `topic` means the backend picked the request up.
    /// Returns true if a flag was cleared.
    pub fn mark_activity(&mut self, topic: &str) -> bool {
        let mut changed = false;
        if let Some(request) = self.pending.get_mut(topic).filter(|r| r.still_pending) {
            request.still_pending = false;
            changed = true;
        }
        if let Some(plan) = self.plans.get_mut(topic).filter(|p| p.still_pending) {
            plan.still_pending = false;
            changed = true;
        }
        changed
    }

    /// Terminal control status: drop the pending entry and close the plan.
    /// Returns true if anything changed.
    pub fn complete(&mut self, topic: &str) -> bool {
        let removed = self.pending.remove(topic).is_some();
        let closed = match self.plans.get_mut(topic) {
            Some(plan) if !plan.completed => {
                plan.completed = true;
                plan.still_pending = false;
                true
            }
            _ => false,
        };
        removed || closed
    }

    pub fn topics(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }

    /// Requests the backend never acknowledged, in topic order.
    pub fn resendable(&self) -> Vec<(String, OutboundMessage)> {
        self.pending
            .iter()
            .filter(|(_, request)| request.still_pending)
            .map(|(topic, request)| (topic.clone(), request.message.clone()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.plans.clear();
    }
}
