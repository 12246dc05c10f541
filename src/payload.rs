//! Inbound payload normalization.
//!
//! The messaging platform delivers webhook events in three shapes: the full
//! business-account envelope (`entry[0].changes[0].value`), a pre-unwrapped
//! event in a single-element array, and the bare event object itself. The
//! matchers run in that fixed order; first match wins, and a shape that
//! fails to parse falls through to the next one. Delivery receipts and
//! status updates carry no `messages` array and normalize to `None`.

use serde::Deserialize;
use serde_json::Value;

/// What kind of inbound message was extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Audio,
}

/// A platform-independent view of one actionable inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    /// Raw platform sender id (contact `wa_id` or message `from`), before
    /// digit normalization.
    pub sender_id: String,
    /// Contact display name, when the payload carries one.
    pub sender_name: Option<String>,
    pub kind: MessageKind,
    /// Message text. Empty for audio messages until transcription.
    pub text: String,
    /// Platform media id, present exactly when `kind` is `Audio`.
    pub media_id: Option<String>,
    /// MIME type reported for the audio, when present.
    pub media_mime_type: Option<String>,
}

// ── Wire shapes ──────────────────────────────────────────────────────
//
// All fields are lenient: a payload with odd or missing fields should fall
// out of matching (or message selection) rather than abort the turn.

#[derive(Debug, Deserialize)]
struct EventBody {
    #[serde(default)]
    contacts: Vec<WireContact>,
    /// `None` means the field was absent (status update), which fails the match.
    messages: Option<Vec<WireMessage>>,
}

#[derive(Debug, Deserialize)]
struct WireContact {
    #[serde(default)]
    wa_id: String,
    profile: Option<WireProfile>,
}

#[derive(Debug, Deserialize)]
struct WireProfile {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    from: String,
    #[serde(default, rename = "type")]
    kind: String,
    text: Option<WireText>,
    audio: Option<WireAudio>,
}

#[derive(Debug, Deserialize)]
struct WireText {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct WireAudio {
    #[serde(default)]
    id: String,
    mime_type: Option<String>,
}

// ── Shape matchers ───────────────────────────────────────────────────

/// Accepted payload shapes, tried in order. First match wins.
const SHAPE_MATCHERS: &[fn(&Value) -> Option<EventBody>] =
    &[match_business_envelope, match_array_wrapped, match_bare_event];

/// Canonical webhook envelope: `entry[0].changes[0].value`.
fn match_business_envelope(body: &Value) -> Option<EventBody> {
    if body.get("object")?.as_str()? != "whatsapp_business_account" {
        return None;
    }
    let value = body.get("entry")?.get(0)?.get("changes")?.get(0)?.get("value")?;
    parse_event_body(value)
}

/// Pre-unwrapped event delivered as a single-element array.
fn match_array_wrapped(body: &Value) -> Option<EventBody> {
    parse_event_body(body.as_array()?.first()?)
}

/// Bare event object with a top-level `messages` array.
fn match_bare_event(body: &Value) -> Option<EventBody> {
    if !body.is_object() {
        return None;
    }
    parse_event_body(body)
}

fn parse_event_body(value: &Value) -> Option<EventBody> {
    let event: EventBody = serde_json::from_value(value.clone()).ok()?;
    if event.messages.is_none() {
        return None;
    }
    Some(event)
}

// ── Message selection ────────────────────────────────────────────────

fn has_text_body(message: &WireMessage) -> bool {
    message.kind == "text" && message.text.as_ref().is_some_and(|t| !t.body.is_empty())
}

fn has_audio_id(message: &WireMessage) -> bool {
    message.kind == "audio" && message.audio.as_ref().is_some_and(|a| !a.id.is_empty())
}

/// Sender id: the contact record's `wa_id` when present, else the message `from`.
fn sender_id_for(contact_wa_id: Option<&str>, from: &str) -> Option<String> {
    match contact_wa_id {
        Some(id) => Some(id.to_string()),
        None if !from.is_empty() => Some(from.to_string()),
        None => None,
    }
}

/// Extract the first actionable message from a raw webhook body.
///
/// Text messages win over audio when both appear in one event. Returns
/// `None` for payloads with no usable message: status updates, receipts,
/// unknown message types, or unrecognized shapes.
pub fn normalize(body: &Value) -> Option<NormalizedMessage> {
    let event = SHAPE_MATCHERS.iter().find_map(|matcher| matcher(body))?;
    let messages = event.messages.as_deref().unwrap_or_default();

    let contact = event.contacts.first();
    let contact_wa_id = contact
        .map(|c| c.wa_id.as_str())
        .filter(|id| !id.is_empty());
    let sender_name = contact
        .and_then(|c| c.profile.as_ref())
        .map(|p| p.name.clone())
        .filter(|name| !name.is_empty());

    if let Some(message) = messages.iter().find(|m| has_text_body(m)) {
        let text = message
            .text
            .as_ref()
            .map(|t| t.body.clone())
            .unwrap_or_default();
        return Some(NormalizedMessage {
            sender_id: sender_id_for(contact_wa_id, &message.from)?,
            sender_name,
            kind: MessageKind::Text,
            text,
            media_id: None,
            media_mime_type: None,
        });
    }

    if let Some(message) = messages.iter().find(|m| has_audio_id(m)) {
        return Some(NormalizedMessage {
            sender_id: sender_id_for(contact_wa_id, &message.from)?,
            sender_name,
            kind: MessageKind::Audio,
            text: String::new(),
            media_id: message.audio.as_ref().map(|a| a.id.clone()),
            media_mime_type: message.audio.as_ref().and_then(|a| a.mime_type.clone()),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_value(messages: Value) -> Value {
        json!({
            "contacts": [{ "wa_id": "27821234567", "profile": { "name": "Alice" } }],
            "messages": messages,
        })
    }

    fn text_message(body: &str) -> Value {
        json!({ "from": "27821234567", "type": "text", "text": { "body": body } })
    }

    // ── Shape handling ──────────────────────────────────────────────

    #[test]
    fn three_shapes_normalize_identically() {
        let value = event_value(json!([text_message("Hi")]));

        let envelope = json!({
            "object": "whatsapp_business_account",
            "entry": [{ "changes": [{ "value": value }] }],
        });
        let array = json!([value]);
        let bare = value.clone();

        let from_envelope = normalize(&envelope).unwrap();
        let from_array = normalize(&array).unwrap();
        let from_bare = normalize(&bare).unwrap();

        assert_eq!(from_envelope, from_array);
        assert_eq!(from_array, from_bare);
        assert_eq!(from_envelope.sender_id, "27821234567");
        assert_eq!(from_envelope.sender_name.as_deref(), Some("Alice"));
        assert_eq!(from_envelope.kind, MessageKind::Text);
        assert_eq!(from_envelope.text, "Hi");
    }

    #[test]
    fn status_update_returns_none() {
        let payload = json!({
            "object": "whatsapp_business_account",
            "entry": [{ "changes": [{ "value": {
                "statuses": [{ "id": "wamid.X", "status": "delivered" }],
            }}]}],
        });
        assert!(normalize(&payload).is_none());
    }

    #[test]
    fn payload_without_messages_field_returns_none() {
        assert!(normalize(&json!({ "contacts": [] })).is_none());
    }

    #[test]
    fn empty_messages_array_returns_none() {
        assert!(normalize(&event_value(json!([]))).is_none());
    }

    #[test]
    fn envelope_without_entry_falls_through_to_bare_shape() {
        // Claims the business-account shape but has no entry; the bare
        // matcher still picks up the top-level messages array.
        let payload = json!({
            "object": "whatsapp_business_account",
            "contacts": [{ "wa_id": "27821234567" }],
            "messages": [text_message("Hi")],
        });
        let message = normalize(&payload).unwrap();
        assert_eq!(message.text, "Hi");
    }

    #[test]
    fn non_object_bodies_return_none() {
        assert!(normalize(&json!(42)).is_none());
        assert!(normalize(&json!("hello")).is_none());
        assert!(normalize(&json!(null)).is_none());
        assert!(normalize(&json!([])).is_none());
    }

    // ── Message selection ───────────────────────────────────────────

    #[test]
    fn text_preferred_over_audio() {
        let payload = event_value(json!([
            { "from": "27821234567", "type": "audio", "audio": { "id": "media-1" } },
            text_message("read me"),
        ]));
        let message = normalize(&payload).unwrap();
        assert_eq!(message.kind, MessageKind::Text);
        assert_eq!(message.text, "read me");
        assert!(message.media_id.is_none());
    }

    #[test]
    fn empty_text_body_falls_back_to_audio() {
        let payload = event_value(json!([
            text_message(""),
            { "from": "27821234567", "type": "audio",
              "audio": { "id": "media-1", "mime_type": "audio/ogg; codecs=opus" } },
        ]));
        let message = normalize(&payload).unwrap();
        assert_eq!(message.kind, MessageKind::Audio);
        assert_eq!(message.text, "");
        assert_eq!(message.media_id.as_deref(), Some("media-1"));
        assert_eq!(
            message.media_mime_type.as_deref(),
            Some("audio/ogg; codecs=opus")
        );
    }

    #[test]
    fn audio_without_id_is_not_actionable() {
        let payload = event_value(json!([
            { "from": "27821234567", "type": "audio", "audio": {} },
        ]));
        assert!(normalize(&payload).is_none());
    }

    #[test]
    fn unknown_message_type_returns_none() {
        let payload = event_value(json!([
            { "from": "27821234567", "type": "image", "image": { "id": "media-7" } },
        ]));
        assert!(normalize(&payload).is_none());
    }

    // ── Sender identity ─────────────────────────────────────────────

    #[test]
    fn sender_falls_back_to_message_from() {
        let payload = json!({ "messages": [text_message("no contacts here")] });
        let message = normalize(&payload).unwrap();
        assert_eq!(message.sender_id, "27821234567");
        assert!(message.sender_name.is_none());
    }

    #[test]
    fn contact_wa_id_wins_over_message_from() {
        let payload = json!({
            "contacts": [{ "wa_id": "27829999999" }],
            "messages": [text_message("Hi")],
        });
        let message = normalize(&payload).unwrap();
        assert_eq!(message.sender_id, "27829999999");
    }

    #[test]
    fn missing_profile_name_is_none() {
        let payload = json!({
            "contacts": [{ "wa_id": "27821234567" }],
            "messages": [text_message("Hi")],
        });
        let message = normalize(&payload).unwrap();
        assert!(message.sender_name.is_none());
    }

    #[test]
    fn no_sender_at_all_returns_none() {
        let payload = json!({
            "messages": [{ "type": "text", "text": { "body": "orphan" } }],
        });
        assert!(normalize(&payload).is_none());
    }
}
