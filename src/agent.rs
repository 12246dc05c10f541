//! Reply generation via an OpenAI-compatible chat-completions endpoint.
//!
//! The prompt is built fresh each turn: the system prompt plus contact
//! identity, then the session's recent history mapped onto user/assistant
//! roles. The inbound message is persisted before generation, so it normally
//! arrives as the last history entry rather than being appended twice.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::session::SessionId;
use crate::store::{Direction, HistoryEntry, HistoryStore};

/// Produces the agent's reply text for one inbound message.
#[async_trait]
pub trait ReplyAgent: Send + Sync {
    async fn generate_reply(
        &self,
        session_id: &SessionId,
        text: &str,
        customer_number: &str,
        customer_name: Option<&str>,
    ) -> Result<String, AgentError>;
}

#[derive(Clone)]
pub struct AgentSettings {
    pub api_key: SecretString,
    pub model: String,
    pub endpoint: String,
    pub system_prompt: String,
    /// How many history entries to replay into the prompt.
    pub history_turns: usize,
}

/// `ReplyAgent` backed by a chat-completions API.
pub struct ChatCompletionAgent {
    client: Client,
    settings: AgentSettings,
    history: Arc<dyn HistoryStore>,
}

impl ChatCompletionAgent {
    pub fn new(settings: AgentSettings, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            client: Client::new(),
            settings,
            history,
        }
    }
}

#[async_trait]
impl ReplyAgent for ChatCompletionAgent {
    async fn generate_reply(
        &self,
        session_id: &SessionId,
        text: &str,
        customer_number: &str,
        customer_name: Option<&str>,
    ) -> Result<String, AgentError> {
        let history = match self
            .history
            .recent_history(session_id, self.settings.history_turns)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "History fetch failed; replying without context");
                Vec::new()
            }
        };

        let messages = build_messages(
            &self.settings.system_prompt,
            &history,
            text,
            customer_number,
            customer_name,
        );
        let request = ChatCompletionRequest {
            model: &self.settings.model,
            messages: &messages,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.settings.endpoint))
            .bearer_auth(self.settings.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Http(format!("Invalid completion response: {e}")))?;

        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if reply.is_empty() {
            return Err(AgentError::EmptyReply);
        }
        debug!(chars = reply.len(), "Reply generated");
        Ok(reply)
    }
}

// ── Prompt assembly ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

impl ChatMessage {
    fn system(content: String) -> Self {
        Self {
            role: "system",
            content,
        }
    }

    fn user(content: String) -> Self {
        Self {
            role: "user",
            content,
        }
    }

    fn assistant(content: String) -> Self {
        Self {
            role: "assistant",
            content,
        }
    }
}

fn build_messages(
    system_prompt: &str,
    history: &[HistoryEntry],
    text: &str,
    customer_number: &str,
    customer_name: Option<&str>,
) -> Vec<ChatMessage> {
    let contact = match customer_name {
        Some(name) => format!("{name} ({customer_number})"),
        None => customer_number.to_string(),
    };
    let mut messages = vec![ChatMessage::system(format!(
        "{system_prompt}\n\nYou are talking to {contact}."
    ))];

    for entry in history {
        match entry.direction {
            Direction::Human => messages.push(ChatMessage::user(entry.content.clone())),
            Direction::Agent => messages.push(ChatMessage::assistant(entry.content.clone())),
        }
    }

    // The inbound message usually arrives as the last history entry already.
    let already_present = history
        .last()
        .is_some_and(|e| e.direction == Direction::Human && e.content == text);
    if !already_present {
        messages.push(ChatMessage::user(text.to_string()));
    }

    messages
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}
