//! Outbound message dispatch to the messaging platform.
//!
//! Text replies are a single `messages` POST. Voice replies are two calls:
//! upload the audio to the `media` endpoint, then send a message referencing
//! the returned media id. When any step of the voice path fails, the reply
//! falls back to plain text exactly once, with the same content.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, multipart};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::credentials::{CredentialResolver, PlatformCredentials};
use crate::error::DispatchError;
use crate::media::{MediaBridge, VOICE_REPLY_MIME, audio_extension};
use crate::session::normalize_number;

/// What a successful send produced. `media_id` is set for voice messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub media_id: Option<String>,
}

/// Outbound message transport.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<Delivery, DispatchError>;

    async fn send_audio(
        &self,
        recipient: &str,
        audio: Vec<u8>,
        mime_type: &str,
    ) -> Result<Delivery, DispatchError>;
}

/// `MessageSender` backed by the WhatsApp Cloud API.
pub struct CloudApiSender {
    client: Client,
    credentials: Arc<CredentialResolver>,
    graph_base_url: String,
}

impl CloudApiSender {
    pub fn new(credentials: Arc<CredentialResolver>, graph_base_url: String) -> Self {
        Self {
            client: Client::new(),
            credentials,
            graph_base_url,
        }
    }

    fn api_url(&self, endpoint_id: &str, method: &str) -> String {
        format!("{}/{}/{}", self.graph_base_url, endpoint_id, method)
    }

    async fn resolve_credentials(&self) -> Result<PlatformCredentials, DispatchError> {
        self.credentials
            .resolve()
            .await
            .ok_or(DispatchError::NoCredentials)
    }

    async fn upload_audio(
        &self,
        creds: &PlatformCredentials,
        audio: Vec<u8>,
        mime_type: &str,
    ) -> Result<String, DispatchError> {
        let part = multipart::Part::bytes(audio)
            .file_name(format!("voice-reply.{}", audio_extension(mime_type)))
            .mime_str(mime_type)
            .map_err(|e| DispatchError::Http(format!("Invalid audio mime type: {e}")))?;
        let form = multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .text("type", mime_type.to_string())
            .part("file", part);

        let response = self
            .client
            .post(self.api_url(&creds.endpoint_id, "media"))
            .bearer_auth(creds.access_token.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| DispatchError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MediaUploadResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Http(format!("Invalid upload response: {e}")))?;
        match parsed.id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(DispatchError::MissingMediaId),
        }
    }

    async fn post_message(
        &self,
        creds: &PlatformCredentials,
        body: &serde_json::Value,
    ) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(self.api_url(&creds.endpoint_id, "messages"))
            .bearer_auth(creds.access_token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| DispatchError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DispatchError::Api {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct MediaUploadResponse {
    id: Option<String>,
}

#[async_trait]
impl MessageSender for CloudApiSender {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<Delivery, DispatchError> {
        let creds = self.resolve_credentials().await?;
        let to = normalize_number(recipient);
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "body": text },
        });
        self.post_message(&creds, &body).await?;
        debug!(to = %to, "Text message sent");
        Ok(Delivery::default())
    }

    async fn send_audio(
        &self,
        recipient: &str,
        audio: Vec<u8>,
        mime_type: &str,
    ) -> Result<Delivery, DispatchError> {
        let creds = self.resolve_credentials().await?;
        let media_id = self.upload_audio(&creds, audio, mime_type).await?;
        let to = normalize_number(recipient);
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "audio",
            "audio": { "id": media_id },
        });
        self.post_message(&creds, &body).await?;
        debug!(to = %to, media_id = %media_id, "Voice message sent");
        Ok(Delivery {
            media_id: Some(media_id),
        })
    }
}

// ── Reply delivery ──────────────────────────────────────────────────

/// Outcome of delivering one reply, voice fallback included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyDelivery {
    pub delivered: bool,
    /// Platform media id of the uploaded voice reply, when one was sent.
    pub media_id: Option<String>,
    /// True when a voice reply was requested but the text path was used.
    pub voice_fallback: bool,
}

/// Send a reply, as voice when requested, falling back to text at most once.
pub async fn deliver_reply(
    sender: &dyn MessageSender,
    media: &dyn MediaBridge,
    recipient: &str,
    reply_text: &str,
    want_voice: bool,
) -> ReplyDelivery {
    if want_voice {
        match media.synthesize(reply_text).await {
            Ok(audio) => match sender.send_audio(recipient, audio, VOICE_REPLY_MIME).await {
                Ok(delivery) => {
                    return ReplyDelivery {
                        delivered: true,
                        media_id: delivery.media_id,
                        voice_fallback: false,
                    };
                }
                Err(e) => {
                    warn!(error = %e, "Voice send failed; falling back to text");
                }
            },
            Err(e) => {
                warn!(error = %e, "Speech synthesis failed; falling back to text");
            }
        }
        return deliver_text(sender, recipient, reply_text, true).await;
    }
    deliver_text(sender, recipient, reply_text, false).await
}

async fn deliver_text(
    sender: &dyn MessageSender,
    recipient: &str,
    text: &str,
    voice_fallback: bool,
) -> ReplyDelivery {
    match sender.send_text(recipient, text).await {
        Ok(_) => ReplyDelivery {
            delivered: true,
            media_id: None,
            voice_fallback,
        },
        Err(e) => {
            warn!(error = %e, "Text send failed");
            ReplyDelivery {
                delivered: false,
                media_id: None,
                voice_fallback,
            }
        }
    }
}
