//! SessionStore - reload-surviving session state on top of a [`KeyValueStore`].
//!
//! Every write is best-effort: failures are logged and the in-memory state
//! stays authoritative. Every read degrades to empty on a missing or
//! undecodable blob.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared_types::{Envelope, PendingRequest, PlanRecord, ToolCallRecord};

use crate::storage::KeyValueStore;

pub const KEY_LAST_STEP_MESSAGE: &str = "lastStepMessage";
pub const KEY_STEP_TOOL_EVENTS: &str = "stepToolEvents";
pub const KEY_PENDING_REQUESTS: &str = "pendingRequests";
pub const KEY_PLAN_ID_BY_TOPIC: &str = "planIdByTopic";

const ALL_KEYS: [&str; 4] = [
    KEY_LAST_STEP_MESSAGE,
    KEY_STEP_TOOL_EVENTS,
    KEY_PENDING_REQUESTS,
    KEY_PLAN_ID_BY_TOPIC,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedStepMessage {
    message: Envelope,
    saved_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedToolEvents {
    steps: BTreeMap<u32, Vec<ToolCallRecord>>,
    saved_at: i64,
}

/// Everything the engine needs to rebuild itself after a reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedSession {
    pub last_step_message: Option<Envelope>,
    pub step_tool_events: BTreeMap<u32, Vec<ToolCallRecord>>,
    pub pending_requests: BTreeMap<String, PendingRequest>,
    pub plan_ids: BTreeMap<String, PlanRecord>,
}

pub struct SessionStore {
    store: Box<dyn KeyValueStore>,
    prefix: String,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(store: Box<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn key(&self, name: &str) -> String {
        format!("{}:{name}", self.prefix)
    }

    fn write_json<T: Serialize>(&mut self, name: &str, value: &T) {
        let key = self.key(name);
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode session blob");
                return;
            }
        };
        if let Err(e) = self.store.set(&key, &encoded) {
            tracing::warn!(key = %key, error = %e, "Failed to persist session blob");
        }
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let key = self.key(name);
        let raw = match self.store.get(&key) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read session blob");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding undecodable session blob");
                None
            }
        }
    }

    pub fn persist_step_message(&mut self, message: &Envelope) {
        let saved = SavedStepMessage {
            message: message.clone(),
            saved_at: Utc::now().timestamp_millis(),
        };
        self.write_json(KEY_LAST_STEP_MESSAGE, &saved);
    }

    pub fn persist_tool_events(&mut self, steps: &BTreeMap<u32, Vec<ToolCallRecord>>) {
        let saved = SavedToolEvents {
            steps: steps.clone(),
            saved_at: Utc::now().timestamp_millis(),
        };
        self.write_json(KEY_STEP_TOOL_EVENTS, &saved);
    }

    pub fn persist_pending(&mut self, pending: &BTreeMap<String, PendingRequest>) {
        self.write_json(KEY_PENDING_REQUESTS, pending);
    }

    pub fn persist_plan_ids(&mut self, plans: &BTreeMap<String, PlanRecord>) {
        self.write_json(KEY_PLAN_ID_BY_TOPIC, plans);
    }

    /// Write every part of the session.
    #[cfg(test)]
    pub fn persist(&mut self, session: &PersistedSession) {
        match &session.last_step_message {
            Some(message) => self.persist_step_message(message),
            None => self.remove(KEY_LAST_STEP_MESSAGE),
        }
        self.persist_tool_events(&session.step_tool_events);
        self.persist_pending(&session.pending_requests);
        self.persist_plan_ids(&session.plan_ids);
    }

    pub fn load(&self) -> PersistedSession {
        PersistedSession {
            last_step_message: self
                .read_json::<SavedStepMessage>(KEY_LAST_STEP_MESSAGE)
                .map(|saved| saved.message),
            step_tool_events: self
                .read_json::<SavedToolEvents>(KEY_STEP_TOOL_EVENTS)
                .map(|saved| saved.steps)
                .unwrap_or_default(),
            pending_requests: self.read_json(KEY_PENDING_REQUESTS).unwrap_or_default(),
            plan_ids: self.read_json(KEY_PLAN_ID_BY_TOPIC).unwrap_or_default(),
        }
    }

    fn remove(&mut self, name: &str) {
        let key = self.key(name);
        if let Err(e) = self.store.remove(&key) {
            tracing::warn!(key = %key, error = %e, "Failed to remove session blob");
        }
    }

    pub fn clear_all(&mut self) {
        for name in ALL_KEYS {
            self.remove(name);
        }
    }
}
