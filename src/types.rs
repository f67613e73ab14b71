use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const PREVIEW_MAX_CHARS: usize = 100;
pub const AI_REPLY_CONFIDENCE: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Whatsapp,
    WebChat,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::WebChat => "web_chat",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "whatsapp" => Some(Self::Whatsapp),
            "web_chat" => Some(Self::WebChat),
            _ => None,
        }
    }

    /// Humanizing pause before an automatic reply on this channel.
    pub fn default_reply_delay_ms(&self) -> i64 {
        match self {
            Self::Whatsapp => 2000,
            Self::WebChat => 1500,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who currently produces the next outbound reply on a conversation.
///
/// The engine itself only ever moves a conversation to `Escalated`. Handing
/// an escalated conversation to a human and giving it back to the AI belong
/// to the dashboard, which follows the same [`Ownership::can_transition_to`]
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    Ai,
    Human,
    Escalated,
}

impl Ownership {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Human => "human",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ai" => Some(Self::Ai),
            "human" => Some(Self::Human),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    pub fn initial(ai_enabled: bool) -> Self {
        if ai_enabled {
            Self::Ai
        } else {
            Self::Human
        }
    }

    pub fn can_transition_to(&self, next: Ownership) -> bool {
        matches!(
            (self, next),
            (Self::Ai, Self::Escalated)
                | (Self::Human, Self::Escalated)
                | (Self::Escalated, Self::Human)
                | (Self::Human, Self::Ai)
        )
    }

    pub fn ai_handled(&self) -> bool {
        *self == Self::Ai
    }

    pub fn ai_escalated(&self) -> bool {
        *self == Self::Escalated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Location,
    Interactive,
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Location => "location",
            Self::Interactive => "interactive",
            Self::Other(tag) => tag,
        }
    }

    pub fn is_text(&self) -> bool {
        *self == Self::Text
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "text" => Self::Text,
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "document" => Self::Document,
            "location" => Self::Location,
            "interactive" => Self::Interactive,
            _ => Self::Other(value),
        }
    }
}

impl From<MessageType> for String {
    fn from(value: MessageType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Received,
    Queued,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "received" => Some(Self::Received),
            "queued" => Some(Self::Queued),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A merchant storefront. Read-only here; it owns at most one messaging config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Storefront {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagingConfig {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub ai_enabled: bool,
    pub ai_persona: String,
    pub ai_auto_reply_delay_ms: i64,
    pub ai_handle_orders: bool,
    pub ai_handle_products: bool,
    pub ai_handle_support: bool,
    pub ai_escalation_keywords: Vec<String>,
    pub whatsapp_phone_number_id: String,
    #[serde(skip_serializing)]
    pub whatsapp_access_token: String,
    #[serde(skip_serializing)]
    pub whatsapp_verify_token: String,
    #[serde(skip_serializing)]
    pub whatsapp_app_secret: String,
    pub web_chat_enabled: bool,
    pub web_chat_welcome_message: String,
    pub web_chat_primary_color: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessagingConfig {
    /// Defaults for a store's first contact on `channel`. Web chat gets
    /// widget copy; messaging-platform credentials stay blank until the
    /// merchant finishes setup.
    pub fn provisioned(storefront: &Storefront, channel: Channel) -> Self {
        let now = Utc::now();
        let (web_chat_enabled, welcome) = match channel {
            Channel::WebChat => (
                true,
                format!(
                    "Hi! Welcome to {}. How can we help you today?",
                    if storefront.name.trim().is_empty() {
                        "our store"
                    } else {
                        storefront.name.trim()
                    }
                ),
            ),
            Channel::Whatsapp => (false, String::new()),
        };
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: storefront.tenant_id.clone(),
            store_id: storefront.id.clone(),
            ai_enabled: true,
            ai_persona: String::new(),
            ai_auto_reply_delay_ms: channel.default_reply_delay_ms(),
            ai_handle_orders: true,
            ai_handle_products: true,
            ai_handle_support: true,
            ai_escalation_keywords: vec![
                "human".to_string(),
                "agent".to_string(),
                "manager".to_string(),
                "complaint".to_string(),
            ],
            whatsapp_phone_number_id: String::new(),
            whatsapp_access_token: String::new(),
            whatsapp_verify_token: String::new(),
            whatsapp_app_secret: String::new(),
            web_chat_enabled,
            web_chat_welcome_message: welcome,
            web_chat_primary_color: "#2563eb".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Hints about the contact gathered from the channel, used for customer
/// linkage and display when a conversation is first created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactHints {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub config_id: String,
    pub channel: Channel,
    pub contact_id: String,
    pub customer_id: Option<String>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub status: String,
    pub unread_count: i32,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_preview: String,
    pub ownership: Ownership,
    pub ai_context: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(
        config: &MessagingConfig,
        channel: Channel,
        contact_id: &str,
        hints: &ContactHints,
        customer: Option<&Customer>,
    ) -> Self {
        let now = Utc::now();
        let pick = |hint: &Option<String>, fallback: Option<&str>| {
            hint.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .or(fallback.filter(|v| !v.is_empty()))
                .unwrap_or("")
                .to_string()
        };
        Self {
            id: Uuid::new_v4().to_string(),
            config_id: config.id.clone(),
            channel,
            contact_id: contact_id.to_string(),
            customer_id: customer.map(|c| c.id.clone()),
            customer_name: pick(&hints.name, customer.map(|c| c.name.as_str())),
            customer_email: pick(&hints.email, customer.map(|c| c.email.as_str())),
            customer_phone: pick(&hints.phone, customer.map(|c| c.phone.as_str())),
            status: "open".to_string(),
            unread_count: 0,
            last_message_at: None,
            last_message_preview: String::new(),
            ownership: Ownership::initial(config.ai_enabled),
            ai_context: Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }
}

/// API shape of a conversation; carries the legacy boolean pair derived
/// from [`Ownership`] for dashboard consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub ai_handled: bool,
    pub ai_escalated: bool,
}

impl From<Conversation> for ConversationView {
    fn from(conversation: Conversation) -> Self {
        Self {
            ai_handled: conversation.ownership.ai_handled(),
            ai_escalated: conversation.ownership.ai_escalated(),
            conversation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub direction: Direction,
    pub message_type: MessageType,
    pub body: String,
    pub media_url: Option<String>,
    pub media_mime_type: Option<String>,
    pub media_caption: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_name: Option<String>,
    pub status: MessageStatus,
    pub external_message_id: String,
    pub ai_generated: bool,
    pub ai_confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Message {
    pub fn inbound_text(conversation_id: &str, body: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            direction: Direction::Inbound,
            message_type: MessageType::Text,
            body: body.to_string(),
            media_url: None,
            media_mime_type: None,
            media_caption: None,
            latitude: None,
            longitude: None,
            location_name: None,
            status: MessageStatus::Received,
            external_message_id: String::new(),
            ai_generated: false,
            ai_confidence: None,
            created_at,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            error_message: None,
        }
    }

    /// An AI-authored reply awaiting its delivery outcome.
    pub fn ai_reply(conversation_id: &str, body: &str) -> Self {
        Self {
            direction: Direction::Outbound,
            status: MessageStatus::Queued,
            ai_generated: true,
            ai_confidence: Some(AI_REPLY_CONFIDENCE),
            ..Self::inbound_text(conversation_id, body, Utc::now())
        }
    }

    /// Text used when this message appears in a model transcript.
    pub fn transcript_text(&self) -> String {
        if self.message_type.is_text() {
            self.body.clone()
        } else {
            format!("[{}]", self.message_type.as_str())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub store_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub store_id: String,
    pub name: String,
    pub price: f64,
    pub description: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub order_number: String,
    pub total_amount: f64,
    pub status: String,
    pub payment_status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    Customer,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptTurn {
    pub role: TranscriptRole,
    pub content: String,
}

impl From<&Message> for TranscriptTurn {
    fn from(message: &Message) -> Self {
        Self {
            role: match message.direction {
                Direction::Inbound => TranscriptRole::Customer,
                Direction::Outbound => TranscriptRole::Assistant,
            },
            content: message.transcript_text(),
        }
    }
}

/// Shortens `text` to the conversation-list preview length.
pub fn message_preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= PREVIEW_MAX_CHARS {
        return trimmed.to_string();
    }
    let head = trimmed.chars().take(PREVIEW_MAX_CHARS).collect::<String>();
    format!("{head}...")
}
