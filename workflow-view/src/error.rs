//! Error types for the workflow view engine.
//!
//! Only storage, transport and actor failures are real errors. Malformed
//! envelopes are classified into [`EnvelopeError`] so they can be logged, but
//! the engine always converts them into an ignored outcome.

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to encode or decode blob: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Envelope is not valid JSON: {0}")]
    NotJson(String),

    #[error("Envelope has no data")]
    MissingData,

    #[error("Envelope data has no type")]
    MissingType,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Subscribe to topic {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Send on topic {topic} failed: {reason}")]
    Send { topic: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowViewError {
    #[error("Actor call failed: {0}")]
    ActorCall(String),

    #[error("Actor spawn failed: {0}")]
    Spawn(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
