//! Decides whether the agent may reply at all.
//!
//! Two gates run in order: the sender must be allow-listed, and no human
//! operator may have taken over the session. Store failures propagate to the
//! caller, which treats the turn as failed rather than replying anyway.

use std::sync::Arc;

use tracing::debug;

use crate::error::StoreError;
use crate::session::SessionId;
use crate::store::ControlStore;

/// Why a reply was suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    NotAllowListed,
    HumanInControl,
}

/// Verdict for one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlDecision {
    AgentMayReply,
    Suppressed(SuppressReason),
}

pub struct ControlArbiter {
    control: Arc<dyn ControlStore>,
}

impl ControlArbiter {
    pub fn new(control: Arc<dyn ControlStore>) -> Self {
        Self { control }
    }

    /// Run both gates. The allow-list is checked first; a sender that fails
    /// it never reaches the human-takeover lookup.
    pub async fn evaluate(
        &self,
        number: &str,
        session_id: &SessionId,
    ) -> Result<ControlDecision, StoreError> {
        if !self.control.is_allowed(number).await? {
            debug!(number, "Sender not allow-listed");
            return Ok(ControlDecision::Suppressed(SuppressReason::NotAllowListed));
        }

        if self.control.is_human_in_control(session_id).await? {
            debug!(session_id = %session_id, "Human operator active");
            return Ok(ControlDecision::Suppressed(SuppressReason::HumanInControl));
        }

        Ok(ControlDecision::AgentMayReply)
    }
}
