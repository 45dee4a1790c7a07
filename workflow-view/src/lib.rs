//! Workflow View - DAG visualization state and tool-event reconciliation
//!
//! Turns a stream of workflow envelopes (step lists, tool events, control
//! status) into a layered graph, per-step tool-call records and panel state,
//! persists the session and restores it on reload.

pub mod actor;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod layout;
pub mod panels;
pub mod parsers;
pub mod reconciler;
pub mod requests;
pub mod session;
pub mod storage;
pub mod view;

pub use actor::{WorkflowViewActor, WorkflowViewArguments, WorkflowViewMsg};
pub use config::Config;
pub use engine::{EnvelopeOutcome, ViewEvent, ViewSettings, WorkflowEngine};
pub use error::{EnvelopeError, StorageError, TransportError, WorkflowViewError};
pub use session::SessionStore;
