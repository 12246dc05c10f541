//! Configuration types.

use crate::session::DEFAULT_SESSION_PREFIX;

/// Default system prompt for the reply agent.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant replying inside a \
WhatsApp conversation. Keep replies short and conversational; they render as chat \
bubbles on a phone. Never use markdown headings or bullet lists. If you are asked \
for something you cannot do, say so plainly and offer the closest thing you can do.";

/// Service-wide configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Prefix for session keys derived from sender numbers.
    pub session_prefix: String,
    /// Base URL of the messaging platform's Graph API (no trailing slash).
    pub graph_base_url: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            session_prefix: DEFAULT_SESSION_PREFIX.to_string(),
            graph_base_url: "https://graph.facebook.com/v20.0".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(prefix) = std::env::var("WA_AGENT_SESSION_PREFIX") {
            config.session_prefix = prefix;
        }
        if let Ok(base) = std::env::var("WA_AGENT_GRAPH_BASE_URL") {
            config.graph_base_url = base.trim_end_matches('/').to_string();
        }
        config
    }
}
