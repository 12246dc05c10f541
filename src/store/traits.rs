//! Narrow persistence traits — history, control flags, and connected accounts.
//!
//! Split into three small traits so each consumer declares exactly what it
//! touches: the pipeline appends history, the arbiter reads control flags,
//! and the credential resolver reads connected accounts. `LibSqlBackend`
//! implements all three against one SQLite file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::error::StoreError;
use crate::session::{Customer, SessionId};

/// Who authored a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Inbound message from the customer.
    Human,
    /// Outbound reply from the agent.
    Agent,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Human => "human",
            Direction::Agent => "agent",
        }
    }
}

/// One persisted conversation turn.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: i64,
    pub session_id: String,
    pub direction: Direction,
    pub content: String,
    pub customer: Customer,
    /// Platform media id: the inbound voice note, or the uploaded reply audio.
    pub media_id: Option<String>,
    /// Free-form metadata, e.g. `{"delivery_status": "failed"}` on outbound rows.
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Row id + timestamp assigned by the store on append.
#[derive(Debug, Clone)]
pub struct AppendReceipt {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

/// Append-only conversation log.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one entry and return its assigned id + timestamp.
    #[allow(clippy::too_many_arguments)]
    async fn append_history(
        &self,
        session_id: &SessionId,
        direction: Direction,
        content: &str,
        customer: &Customer,
        media_id: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<AppendReceipt, StoreError>;

    /// The most recent `limit` entries for a session, oldest first.
    async fn recent_history(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError>;
}

/// Read side of the reply gates: allow-list and human-takeover flags.
#[async_trait]
pub trait ControlStore: Send + Sync {
    /// Whether automation may reply to this (digits-only) number.
    async fn is_allowed(&self, number: &str) -> Result<bool, StoreError>;

    /// Whether a human operator currently owns this session.
    async fn is_human_in_control(&self, session_id: &SessionId) -> Result<bool, StoreError>;
}

/// A linked messaging account carrying its own platform credentials.
#[derive(Debug, Clone)]
pub struct ConnectedAccount {
    /// Platform endpoint id (the business phone-number id).
    pub endpoint_id: String,
    pub access_token: SecretString,
    /// Human-readable label for the account, when one was stored.
    pub display_name: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// Linked messaging accounts.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// The most recently connected account, if any.
    async fn latest_connection(&self) -> Result<Option<ConnectedAccount>, StoreError>;
}
