//! Inbound message pipeline: normalize, persist, gate, generate, deliver.
//!
//! **Core invariant**: the inbound message is persisted before any reply
//! decision, and the outbound reply is persisted whether or not dispatch
//! succeeded. History is the audit trail of what the agent saw and said.
//!
//! Each webhook event runs as one turn:
//! 1. Normalize the payload (unknown shapes and status events end quietly)
//! 2. Derive the session id from the sender's number
//! 3. Resolve reply-worthy text, transcribing voice notes
//! 4. Persist the inbound message
//! 5. Gate: allow-list first, then human takeover
//! 6. Generate the reply from session history
//! 7. Deliver (voice when asked, text fallback once) and persist the outbound

use std::sync::Arc;

use tracing::{Instrument, Span, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::agent::ReplyAgent;
use crate::arbiter::{ControlArbiter, ControlDecision, SuppressReason};
use crate::dispatch::{MessageSender, deliver_reply};
use crate::error::PipelineError;
use crate::media::{MediaBridge, wants_voice_reply};
use crate::payload::{self, MessageKind, NormalizedMessage};
use crate::session::{Customer, derive_session_id, normalize_number};
use crate::store::{Direction, HistoryStore};

/// How one webhook event ended. The transport acknowledges the event no
/// matter which variant comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// No actionable message in the payload (status update, unknown shape).
    Ignored,
    /// A voice note could not be turned into text; turn ended quietly.
    MediaSkipped,
    /// Inbound recorded, reply withheld: sender not allow-listed.
    SuppressedNotAllowed,
    /// Inbound recorded, reply withheld: human operator has the session.
    SuppressedHumanControl,
    /// A reply was generated and dispatch was attempted.
    Replied {
        delivered: bool,
        voice_fallback: bool,
    },
    /// The turn aborted on an internal error.
    Failed,
}

pub struct MessagePipeline {
    history: Arc<dyn HistoryStore>,
    arbiter: ControlArbiter,
    media: Arc<dyn MediaBridge>,
    sender: Arc<dyn MessageSender>,
    agent: Arc<dyn ReplyAgent>,
    session_prefix: String,
}

impl MessagePipeline {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        arbiter: ControlArbiter,
        media: Arc<dyn MediaBridge>,
        sender: Arc<dyn MessageSender>,
        agent: Arc<dyn ReplyAgent>,
        session_prefix: String,
    ) -> Self {
        Self {
            history,
            arbiter,
            media,
            sender,
            agent,
            session_prefix,
        }
    }

    /// Run one webhook event as a correlated turn. Never errors; failures
    /// are logged inside the turn span and reported as `Failed`.
    pub async fn handle_event(&self, body: &serde_json::Value) -> TurnOutcome {
        let turn_id = Uuid::new_v4();
        let span = info_span!("turn", %turn_id, session_id = tracing::field::Empty);
        async {
            match self.run_turn(body).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Turn failed");
                    TurnOutcome::Failed
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_turn(&self, body: &serde_json::Value) -> Result<TurnOutcome, PipelineError> {
        let Some(message) = payload::normalize(body) else {
            debug!("Event carried no actionable message");
            return Ok(TurnOutcome::Ignored);
        };

        let session_id = derive_session_id(&message.sender_id, &self.session_prefix);
        Span::current().record("session_id", tracing::field::display(&session_id));

        let customer = Customer {
            number: normalize_number(&message.sender_id),
            name: message.sender_name.clone(),
        };

        let Some((text, want_voice)) = self.resolve_text(&message).await else {
            return Ok(TurnOutcome::MediaSkipped);
        };

        let inbound_media_id = match message.kind {
            MessageKind::Audio => message.media_id.as_deref(),
            MessageKind::Text => None,
        };
        self.history
            .append_history(
                &session_id,
                Direction::Human,
                &text,
                &customer,
                inbound_media_id,
                None,
            )
            .await?;

        match self.arbiter.evaluate(&customer.number, &session_id).await? {
            ControlDecision::Suppressed(SuppressReason::NotAllowListed) => {
                info!(number = %customer.number, "Reply suppressed: sender not allow-listed");
                return Ok(TurnOutcome::SuppressedNotAllowed);
            }
            ControlDecision::Suppressed(SuppressReason::HumanInControl) => {
                info!("Reply suppressed: human operator active");
                return Ok(TurnOutcome::SuppressedHumanControl);
            }
            ControlDecision::AgentMayReply => {}
        }

        let reply = self
            .agent
            .generate_reply(
                &session_id,
                &text,
                &customer.number,
                message.sender_name.as_deref(),
            )
            .await?;

        let delivery = deliver_reply(
            self.sender.as_ref(),
            self.media.as_ref(),
            &message.sender_id,
            &reply,
            want_voice,
        )
        .await;

        if !delivery.delivered {
            warn!("Reply could not be delivered; recording it anyway");
        }

        let metadata = serde_json::json!({
            "delivery_status": if delivery.delivered { "delivered" } else { "failed" },
        });
        self.history
            .append_history(
                &session_id,
                Direction::Agent,
                &reply,
                &customer,
                delivery.media_id.as_deref(),
                Some(&metadata),
            )
            .await?;

        info!(
            delivered = delivery.delivered,
            voice = want_voice,
            voice_fallback = delivery.voice_fallback,
            "Turn complete"
        );
        Ok(TurnOutcome::Replied {
            delivered: delivery.delivered,
            voice_fallback: delivery.voice_fallback,
        })
    }

    /// The reply-worthy text plus whether the reply should be spoken.
    /// `None` ends the turn without recording anything.
    async fn resolve_text(&self, message: &NormalizedMessage) -> Option<(String, bool)> {
        match message.kind {
            MessageKind::Text => {
                let want_voice = wants_voice_reply(&message.text);
                Some((message.text.clone(), want_voice))
            }
            MessageKind::Audio => {
                let media_id = message.media_id.as_deref()?;
                let Some(blob) = self.media.download(media_id).await else {
                    info!(media_id, "Voice note unavailable; ending turn");
                    return None;
                };
                let transcript = match self.media.transcribe(blob).await {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(media_id, error = %e, "Transcription failed; ending turn");
                        return None;
                    }
                };
                let transcript = transcript.trim().to_string();
                if transcript.is_empty() {
                    info!(media_id, "Voice note transcribed to nothing; ending turn");
                    return None;
                }
                // A spoken question gets a spoken answer.
                Some((transcript, true))
            }
        }
    }
}
