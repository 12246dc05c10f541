//! Error types for wa-agent.

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Errors from voice-note transcription and speech synthesis.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("{capability} is not configured")]
    NotConfigured { capability: &'static str },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("{service} returned {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },
}

/// Errors from the outbound message dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No messaging credentials available (no connected account, no static token)")]
    NoCredentials,

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Messaging API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Media upload succeeded but returned no media id")]
    MissingMediaId,
}

/// Errors from reply generation.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Completion API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Model returned an empty reply")]
    EmptyReply,
}

/// Errors that abort a webhook turn. Caught at the pipeline boundary so the
/// transport can still acknowledge the event.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),
}
