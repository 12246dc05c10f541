//! libSQL backend — implements the persistence traits over one SQLite file.
//!
//! Supports local file and in-memory databases. Timestamps are stored as
//! RFC 3339 text; rows written by SQLite defaults (`datetime('now')`) use
//! the space-separated form, so parsing accepts both.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use secrecy::SecretString;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::session::{Customer, SessionId};
use crate::store::migrations;
use crate::store::traits::{
    AppendReceipt, ConnectedAccount, ConnectionStore, ControlStore, Direction, HistoryEntry,
    HistoryStore,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("Failed to create database directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Admin operations ────────────────────────────────────────────

    /// Add a number to the allow-list. The wildcard `"*"` allows everyone.
    pub async fn allow_number(&self, number: &str, note: Option<&str>) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO allowlist (number, note) VALUES (?1, ?2)
                 ON CONFLICT(number) DO UPDATE SET note = excluded.note",
                params![number, opt_text(note)],
            )
            .await
            .map_err(|e| StoreError::Query(format!("allow_number: {e}")))?;
        debug!(number, "Number allow-listed");
        Ok(())
    }

    /// Remove a number from the allow-list.
    pub async fn disallow_number(&self, number: &str) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM allowlist WHERE number = ?1", params![number])
            .await
            .map_err(|e| StoreError::Query(format!("disallow_number: {e}")))?;
        Ok(())
    }

    /// Flip the human-takeover flag for a session. Last write wins.
    pub async fn set_human_control(
        &self,
        session_id: &SessionId,
        active: bool,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO session_control (session_id, human_active, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET
                     human_active = excluded.human_active,
                     updated_at = excluded.updated_at",
                params![session_id.as_str(), active as i64, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("set_human_control: {e}")))?;
        debug!(session_id = %session_id, active, "Human-control flag updated");
        Ok(())
    }

    /// Link or refresh a messaging account. Unique per endpoint id.
    pub async fn upsert_connection(
        &self,
        endpoint_id: &str,
        access_token: &str,
        display_name: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO connections (endpoint_id, access_token, display_name, connected_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(endpoint_id) DO UPDATE SET
                     access_token = excluded.access_token,
                     display_name = excluded.display_name,
                     connected_at = excluded.connected_at",
                params![endpoint_id, access_token, opt_text(display_name), now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("upsert_connection: {e}")))?;
        info!(endpoint_id, "Messaging account connected");
        Ok(())
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

const HISTORY_COLUMNS: &str =
    "id, session_id, direction, content, customer_number, customer_name, media_id, metadata, created_at";

/// Map a libsql Row to a HistoryEntry.
fn row_to_entry(row: &libsql::Row) -> Result<HistoryEntry, libsql::Error> {
    let direction_str: String = row.get(2)?;
    let metadata_str: Option<String> = row.get(7).ok();
    let created_str: String = row.get(8)?;

    Ok(HistoryEntry {
        id: row.get(0)?,
        session_id: row.get(1)?,
        direction: parse_direction(&direction_str),
        content: row.get(3)?,
        customer: Customer {
            number: row.get(4)?,
            name: row.get(5).ok(),
        },
        media_id: row.get(6).ok(),
        metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_datetime(&created_str),
    })
}

fn parse_direction(s: &str) -> Direction {
    match s {
        "agent" => Direction::Agent,
        _ => Direction::Human,
    }
}

/// Parse a stored timestamp, accepting RFC 3339 and SQLite's default format.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .ok()
        })
        .unwrap_or_else(Utc::now)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl HistoryStore for LibSqlBackend {
    async fn append_history(
        &self,
        session_id: &SessionId,
        direction: Direction,
        content: &str,
        customer: &Customer,
        media_id: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<AppendReceipt, StoreError> {
        let conn = self.conn();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO history (session_id, direction, content, customer_number, customer_name, media_id, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id.as_str(),
                direction.as_str(),
                content,
                customer.number.as_str(),
                opt_text(customer.name.as_deref()),
                opt_text(media_id),
                opt_text_owned(metadata.map(|m| m.to_string())),
                now.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| StoreError::Query(format!("append_history: {e}")))?;

        let id = conn.last_insert_rowid();
        debug!(
            session_id = %session_id,
            direction = direction.as_str(),
            id,
            "History entry appended"
        );
        Ok(AppendReceipt {
            id,
            created_at: now,
        })
    }

    async fn recent_history(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {HISTORY_COLUMNS} FROM history
                     WHERE session_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2"
                ),
                params![session_id.as_str(), limit as i64],
            )
            .await
            .map_err(|e| StoreError::Query(format!("recent_history: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_entry(&row) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!("Skipping history row: {e}");
                }
            }
        }
        // Fetched newest-first for the LIMIT; callers want chronological order.
        entries.reverse();
        Ok(entries)
    }
}

#[async_trait]
impl ControlStore for LibSqlBackend {
    async fn is_allowed(&self, number: &str) -> Result<bool, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM allowlist WHERE number = ?1 OR number = '*'",
                params![number],
            )
            .await
            .map_err(|e| StoreError::Query(format!("is_allowed: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("is_allowed row parse: {e}")))?;
                Ok(count > 0)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(StoreError::Query(format!("is_allowed: {e}"))),
        }
    }

    async fn is_human_in_control(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT human_active FROM session_control WHERE session_id = ?1",
                params![session_id.as_str()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("is_human_in_control: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let active: i64 = row.get(0).map_err(|e| {
                    StoreError::Query(format!("is_human_in_control row parse: {e}"))
                })?;
                Ok(active != 0)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(StoreError::Query(format!("is_human_in_control: {e}"))),
        }
    }
}

#[async_trait]
impl ConnectionStore for LibSqlBackend {
    async fn latest_connection(&self) -> Result<Option<ConnectedAccount>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT endpoint_id, access_token, display_name, connected_at
                 FROM connections ORDER BY connected_at DESC, id DESC LIMIT 1",
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("latest_connection: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let endpoint_id: String = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("latest_connection row parse: {e}")))?;
                let access_token: String = row
                    .get(1)
                    .map_err(|e| StoreError::Query(format!("latest_connection row parse: {e}")))?;
                let connected_str: String = row
                    .get(3)
                    .map_err(|e| StoreError::Query(format!("latest_connection row parse: {e}")))?;

                Ok(Some(ConnectedAccount {
                    endpoint_id,
                    access_token: SecretString::from(access_token),
                    display_name: row.get(2).ok(),
                    connected_at: parse_datetime(&connected_str),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("latest_connection: {e}"))),
        }
    }
}
