//! Session addressing — maps platform sender ids onto stable session keys.
//!
//! The same human can arrive as `"+27 82 123 4567"`, `"27821234567"`, or
//! with other punctuation depending on the client. Everything funnels
//! through digit normalization so one number maps to exactly one session.

use std::fmt;

/// Default prefix for session keys. Override with `WA_AGENT_SESSION_PREFIX`.
pub const DEFAULT_SESSION_PREFIX: &str = "wa-";

/// Stable per-conversation key: configured prefix + digits of the sender id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The human on the other end of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    /// Digits-only phone number.
    pub number: String,
    /// Display name from the platform contact record, when provided.
    pub name: Option<String>,
}

/// Strip everything but ASCII digits from a raw sender id.
pub fn normalize_number(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Derive the session key for a raw sender id.
pub fn derive_session_id(raw_sender: &str, prefix: &str) -> SessionId {
    SessionId(format!("{prefix}{}", normalize_number(raw_sender)))
}
