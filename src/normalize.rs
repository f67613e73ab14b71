//! Channel payload normalization.
//!
//! Turns a WhatsApp Cloud API webhook envelope or a web chat request into the
//! canonical inbound events the rest of the engine works with.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{ContactHints, Message, MessageStatus, MessageType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

/// Type-specific content of an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundBody {
    Text {
        text: String,
    },
    /// `media_id` is the platform's handle; turning it into a fetchable URL
    /// is left to the media service.
    Media {
        kind: MediaKind,
        media_id: String,
        mime_type: Option<String>,
        caption: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
    },
    Interactive {
        title: String,
    },
    Unsupported {
        kind: String,
    },
}

impl InboundBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Text { .. } => MessageType::Text,
            Self::Media { kind, .. } => MessageType::from(kind.as_str().to_string()),
            Self::Location { .. } => MessageType::Location,
            Self::Interactive { .. } => MessageType::Interactive,
            Self::Unsupported { kind } => MessageType::Other(kind.clone()),
        }
    }

    /// The human-readable body stored on the message row.
    pub fn display_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Media { kind, caption, .. } => caption
                .clone()
                .unwrap_or_else(|| format!("[{}]", kind.as_str())),
            Self::Location {
                latitude,
                longitude,
                name,
            } => name
                .clone()
                .unwrap_or_else(|| format!("Location: {latitude}, {longitude}")),
            Self::Interactive { title } => title.clone(),
            Self::Unsupported { kind } => format!("[{kind} message]"),
        }
    }
}

/// One inbound message with its shared envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub contact_id: String,
    pub external_id: String,
    pub timestamp: DateTime<Utc>,
    pub contact_name: Option<String>,
    pub body: InboundBody,
}

impl InboundMessage {
    pub fn hints(&self) -> ContactHints {
        ContactHints {
            name: self.contact_name.clone(),
            phone: Some(self.contact_id.clone()),
            ..Default::default()
        }
    }

    pub fn to_message(&self, conversation_id: &str) -> Message {
        let mut message =
            Message::inbound_text(conversation_id, &self.body.display_text(), self.timestamp);
        message.message_type = self.body.message_type();
        message.external_message_id = self.external_id.clone();
        match &self.body {
            InboundBody::Media {
                media_id,
                mime_type,
                caption,
                ..
            } => {
                message.media_url = Some(media_id.clone());
                message.media_mime_type = mime_type.clone();
                message.media_caption = caption.clone();
            }
            InboundBody::Location {
                latitude,
                longitude,
                name,
            } => {
                message.latitude = Some(*latitude);
                message.longitude = Some(*longitude);
                message.location_name = name.clone();
            }
            _ => {}
        }
        message
    }
}

/// A delivery-status callback for a previously sent message.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub external_id: String,
    pub status: MessageStatus,
    pub recipient_id: String,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

/// Everything one `changes[]` item carried, keyed by the business phone
/// number it was addressed to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    pub phone_number_id: String,
    pub messages: Vec<InboundMessage>,
    pub statuses: Vec<StatusUpdate>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.statuses.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawChange {
    #[serde(default)]
    field: String,
    #[serde(default)]
    value: RawValue,
}

#[derive(Debug, Default, Deserialize)]
struct RawValue {
    #[serde(default)]
    metadata: Option<RawMetadata>,
    #[serde(default)]
    contacts: Vec<RawContact>,
    #[serde(default)]
    messages: Vec<Value>,
    #[serde(default)]
    statuses: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    phone_number_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawContact {
    #[serde(default)]
    wa_id: String,
    #[serde(default)]
    profile: Option<RawProfile>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProfile {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    from: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<RawText>,
    #[serde(default)]
    image: Option<RawMedia>,
    #[serde(default)]
    video: Option<RawMedia>,
    #[serde(default)]
    audio: Option<RawMedia>,
    #[serde(default)]
    document: Option<RawMedia>,
    #[serde(default)]
    location: Option<RawLocation>,
    #[serde(default)]
    interactive: Option<RawInteractive>,
    #[serde(default)]
    button: Option<RawButton>,
}

#[derive(Debug, Default, Deserialize)]
struct RawText {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawMedia {
    #[serde(default)]
    id: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLocation {
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInteractive {
    #[serde(default)]
    button_reply: Option<RawReply>,
    #[serde(default)]
    list_reply: Option<RawReply>,
}

#[derive(Debug, Default, Deserialize)]
struct RawReply {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawButton {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    id: String,
    status: String,
    #[serde(default)]
    recipient_id: String,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    errors: Vec<RawStatusError>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStatusError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    message: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Epoch seconds as sent by the platform (string or number), else now.
fn parse_timestamp(raw: Option<&Value>) -> DateTime<Utc> {
    let seconds = match raw {
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(Value::Number(n)) => n.as_i64(),
        _ => None,
    };
    seconds
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .unwrap_or_else(Utc::now)
}

fn media_body(kind: MediaKind, media: Option<RawMedia>) -> InboundBody {
    let media = media.unwrap_or_default();
    let caption = match kind {
        MediaKind::Document => non_empty(media.caption).or(non_empty(media.filename)),
        MediaKind::Image | MediaKind::Video => non_empty(media.caption),
        MediaKind::Audio => None,
    };
    InboundBody::Media {
        kind,
        media_id: media.id.trim().to_string(),
        mime_type: non_empty(media.mime_type),
        caption,
    }
}

/// `None` when the type-specific payload is unusable.
fn message_body(raw: RawMessage) -> Option<InboundBody> {
    let kind = raw.kind.trim().to_ascii_lowercase();
    let body = match kind.as_str() {
        "text" => InboundBody::Text {
            text: raw.text.map(|t| t.body.trim().to_string()).unwrap_or_default(),
        },
        "image" => media_body(MediaKind::Image, raw.image),
        "video" => media_body(MediaKind::Video, raw.video),
        "audio" => media_body(MediaKind::Audio, raw.audio),
        "document" => media_body(MediaKind::Document, raw.document),
        "location" => {
            let location = raw.location.unwrap_or_default();
            let (Some(latitude), Some(longitude)) = (location.latitude, location.longitude) else {
                return None;
            };
            InboundBody::Location {
                latitude,
                longitude,
                name: non_empty(location.name),
            }
        }
        "interactive" => {
            let interactive = raw.interactive.unwrap_or_default();
            let title = interactive
                .button_reply
                .or(interactive.list_reply)
                .map(|r| r.title.trim().to_string())
                .unwrap_or_default();
            InboundBody::Interactive { title }
        }
        // Template quick-reply buttons arrive as their own type.
        "button" => InboundBody::Interactive {
            title: raw
                .button
                .map(|b| b.text.trim().to_string())
                .unwrap_or_default(),
        },
        _ => InboundBody::Unsupported { kind },
    };
    Some(body)
}

fn parse_message(value: Value, names: &HashMap<String, String>) -> Option<InboundMessage> {
    let raw = match serde_json::from_value::<RawMessage>(value) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(error = %err, "skipping malformed whatsapp message");
            return None;
        }
    };
    let contact_id = raw.from.trim().to_string();
    if contact_id.is_empty() || raw.kind.trim().is_empty() {
        warn!("skipping whatsapp message without sender or type");
        return None;
    }
    let timestamp = parse_timestamp(raw.timestamp.as_ref());
    let external_id = raw.id.trim().to_string();
    let contact_name = names.get(&contact_id).cloned();
    let Some(body) = message_body(raw) else {
        warn!(external_message_id = %external_id, "skipping whatsapp message with unusable payload");
        return None;
    };
    Some(InboundMessage {
        contact_id,
        external_id,
        timestamp,
        contact_name,
        body,
    })
}

fn parse_status(value: Value) -> Option<StatusUpdate> {
    let raw = match serde_json::from_value::<RawStatus>(value) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(error = %err, "skipping malformed whatsapp status");
            return None;
        }
    };
    let Some(status) = MessageStatus::parse(raw.status.trim())
        .filter(|s| !matches!(s, MessageStatus::Received | MessageStatus::Queued))
    else {
        debug!(status = %raw.status, "ignoring unknown whatsapp status");
        return None;
    };
    let error = raw.errors.into_iter().next().map(|e| {
        let detail = [e.title.trim(), e.message.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(": ");
        match e.code {
            Some(code) if detail.is_empty() => format!("error {code}"),
            Some(code) => format!("{detail} ({code})"),
            None => detail,
        }
    });
    Some(StatusUpdate {
        external_id: raw.id.trim().to_string(),
        status,
        recipient_id: raw.recipient_id,
        timestamp: parse_timestamp(raw.timestamp.as_ref()),
        error: error.filter(|e| !e.is_empty()),
    })
}

fn parse_change(change: Value) -> Option<ChangeBatch> {
    let change = match serde_json::from_value::<RawChange>(change) {
        Ok(change) => change,
        Err(err) => {
            warn!(error = %err, "skipping malformed webhook change");
            return None;
        }
    };
    if change.field != "messages" {
        debug!(field = %change.field, "ignoring non-message webhook change");
        return None;
    }
    let value = change.value;
    let Some(phone_number_id) = value
        .metadata
        .map(|m| m.phone_number_id.trim().to_string())
        .filter(|id| !id.is_empty())
    else {
        warn!("skipping webhook change without metadata.phone_number_id");
        return None;
    };
    let names = value
        .contacts
        .into_iter()
        .filter_map(|c| {
            let name = c.profile?.name.trim().to_string();
            (!name.is_empty()).then(|| (c.wa_id.trim().to_string(), name))
        })
        .collect::<HashMap<_, _>>();

    Some(ChangeBatch {
        phone_number_id,
        messages: value
            .messages
            .into_iter()
            .filter_map(|m| parse_message(m, &names))
            .collect(),
        statuses: value.statuses.into_iter().filter_map(parse_status).collect(),
    })
}

/// Normalizes a WhatsApp webhook envelope.
///
/// Never fails: malformed entries, changes or messages are logged and
/// skipped so one bad item cannot cost the platform a retry of the batch.
pub fn normalize_whatsapp(payload: &Value) -> Vec<ChangeBatch> {
    let Some(entries) = payload.get("entry").and_then(Value::as_array) else {
        warn!("webhook payload has no entry array");
        return Vec::new();
    };
    let mut batches = Vec::new();
    for entry in entries {
        let Some(changes) = entry.get("changes").and_then(Value::as_array) else {
            warn!("skipping webhook entry without changes");
            continue;
        };
        batches.extend(
            changes
                .iter()
                .cloned()
                .filter_map(parse_change)
                .filter(|batch| !batch.is_empty()),
        );
    }
    batches
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebChatRequest {
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
}

/// A validated web chat submission.
#[derive(Debug, Clone, PartialEq)]
pub struct WebChatMessage {
    pub store_id: String,
    pub session_id: String,
    pub text: String,
    pub hints: ContactHints,
}

/// Validates a web chat request. Unlike the webhook there is no retrying
/// upstream here, so problems go straight back to the caller.
pub fn normalize_web_chat(request: WebChatRequest) -> Result<WebChatMessage> {
    let Some(store_id) = non_empty(request.store_id) else {
        return Err(Error::client_input("storeId is required"));
    };
    let Some(session_id) = non_empty(request.session_id) else {
        return Err(Error::client_input("sessionId is required"));
    };
    let Some(text) = non_empty(request.message) else {
        return Err(Error::client_input("message must not be empty"));
    };
    Ok(WebChatMessage {
        store_id,
        session_id,
        text,
        hints: ContactHints {
            name: non_empty(request.customer_name),
            email: non_empty(request.customer_email),
            phone: None,
            customer_id: non_empty(request.customer_id),
        },
    })
}
