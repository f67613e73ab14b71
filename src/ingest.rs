//! Inbound pipelines: normalize, resolve, persist, escalate, schedule reply.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::escalation;
use crate::normalize::{normalize_whatsapp, ChangeBatch, InboundMessage, WebChatMessage};
use crate::reply::{should_reply, ReplyJob, ReplyQueue};
use crate::resolver;
use crate::status::apply_status;
use crate::store::MessagingStore;
use crate::types::{
    message_preview, Channel, Conversation, ConversationView, Message, MessagingConfig,
};
use crate::whatsapp::verify_signature;

pub const WEB_CHAT_HISTORY_LIMIT: usize = 200;

/// What happened to one inbound message.
#[derive(Debug, Clone)]
pub struct InboundOutcome {
    pub conversation: Conversation,
    /// `None` when the message was a redelivery and was skipped.
    pub message_id: Option<String>,
    pub escalated: bool,
    pub reply_scheduled: bool,
}

/// Widget settings returned to the embedded web chat.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetConfig {
    pub enabled: bool,
    pub welcome_message: String,
    pub primary_color: String,
    pub ai_persona: String,
}

impl From<&MessagingConfig> for WidgetConfig {
    fn from(config: &MessagingConfig) -> Self {
        Self {
            enabled: config.is_active && config.web_chat_enabled,
            welcome_message: config.web_chat_welcome_message.clone(),
            primary_color: config.web_chat_primary_color.clone(),
            ai_persona: config.ai_persona.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebChatSession {
    pub config: WidgetConfig,
    pub conversation: Option<ConversationView>,
    pub messages: Vec<Message>,
}

#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn MessagingStore>,
    replies: Arc<ReplyQueue>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn MessagingStore>, replies: Arc<ReplyQueue>) -> Self {
        Self { store, replies }
    }

    pub fn store(&self) -> &dyn MessagingStore {
        self.store.as_ref()
    }

    pub fn replies(&self) -> &ReplyQueue {
        &self.replies
    }

    /// Processes a raw webhook POST body. Never fails; returns how many
    /// messages and status callbacks were handled.
    pub async fn whatsapp_webhook(&self, body: &[u8], signature: Option<&str>) -> usize {
        let payload = match serde_json::from_slice::<Value>(body) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "webhook body is not JSON");
                return 0;
            }
        };
        let mut processed = 0;
        for batch in normalize_whatsapp(&payload) {
            match self.whatsapp_batch(&batch, body, signature).await {
                Ok(n) => processed += n,
                Err(err) => warn!(
                    phone_number_id = %batch.phone_number_id,
                    error = %err,
                    "skipping webhook change"
                ),
            }
        }
        processed
    }

    async fn whatsapp_batch(
        &self,
        batch: &ChangeBatch,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<usize> {
        let config = self
            .store
            .find_config_by_phone_number_id(&batch.phone_number_id)
            .await?
            .filter(|c| c.is_active)
            .ok_or_else(|| Error::not_found(format!("config for phone number {}", batch.phone_number_id)))?;
        if !verify_signature(&config.whatsapp_app_secret, signature, body) {
            return Err(Error::client_input("invalid webhook signature"));
        }

        let mut processed = 0;
        for inbound in &batch.messages {
            match self.whatsapp_message(&config, inbound).await {
                Ok(_) => processed += 1,
                Err(err) => warn!(
                    config_id = %config.id,
                    external_message_id = %inbound.external_id,
                    error = %err,
                    "failed to ingest whatsapp message"
                ),
            }
        }
        for update in &batch.statuses {
            match apply_status(self.store.as_ref(), &config, update).await {
                Ok(_) => processed += 1,
                Err(err) => warn!(
                    config_id = %config.id,
                    external_message_id = %update.external_id,
                    error = %err,
                    "failed to apply status callback"
                ),
            }
        }
        Ok(processed)
    }

    pub async fn whatsapp_message(
        &self,
        config: &MessagingConfig,
        inbound: &InboundMessage,
    ) -> Result<InboundOutcome> {
        let conversation = resolver::resolve(
            self.store.as_ref(),
            config,
            Channel::Whatsapp,
            &inbound.contact_id,
            &inbound.hints(),
        )
        .await?;
        let message = inbound.to_message(&conversation.id);
        self.accept(config, conversation, message).await
    }

    pub async fn web_chat_message(&self, inbound: WebChatMessage) -> Result<InboundOutcome> {
        let config = self.web_chat_config(&inbound.store_id).await?;
        let conversation = resolver::resolve(
            self.store.as_ref(),
            &config,
            Channel::WebChat,
            &inbound.session_id,
            &inbound.hints,
        )
        .await?;
        let message = Message::inbound_text(&conversation.id, &inbound.text, Utc::now());
        self.accept(&config, conversation, message).await
    }

    /// Widget settings plus the session's conversation, if one exists.
    pub async fn web_chat_session(&self, store_id: &str, session_id: &str) -> Result<WebChatSession> {
        let store_id = store_id.trim();
        let session_id = session_id.trim();
        if store_id.is_empty() {
            return Err(Error::client_input("storeId is required"));
        }
        if session_id.is_empty() {
            return Err(Error::client_input("sessionId is required"));
        }
        let storefront = self
            .store
            .find_storefront(store_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("store {store_id}")))?;

        let Some(config) = self.store.find_config_by_store(store_id).await? else {
            let defaults = MessagingConfig::provisioned(&storefront, Channel::WebChat);
            return Ok(WebChatSession {
                config: WidgetConfig::from(&defaults),
                conversation: None,
                messages: Vec::new(),
            });
        };
        let conversation = self
            .store
            .find_conversation(&config.id, Channel::WebChat, session_id)
            .await?;
        let messages = match &conversation {
            Some(c) => {
                self.store
                    .recent_messages(&c.id, WEB_CHAT_HISTORY_LIMIT)
                    .await?
            }
            None => Vec::new(),
        };
        Ok(WebChatSession {
            config: WidgetConfig::from(&config),
            conversation: conversation.map(ConversationView::from),
            messages,
        })
    }

    async fn web_chat_config(&self, store_id: &str) -> Result<MessagingConfig> {
        let storefront = self
            .store
            .find_storefront(store_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("store {store_id}")))?;
        let config = resolver::ensure_config(self.store.as_ref(), &storefront, Channel::WebChat).await?;
        if !config.is_active || !config.web_chat_enabled {
            return Err(Error::not_found(format!("web chat for store {store_id}")));
        }
        Ok(config)
    }

    async fn accept(
        &self,
        config: &MessagingConfig,
        conversation: Conversation,
        message: Message,
    ) -> Result<InboundOutcome> {
        if !self.store.insert_message(&message).await? {
            debug!(
                conversation_id = %conversation.id,
                external_message_id = %message.external_message_id,
                "duplicate delivery skipped"
            );
            return Ok(InboundOutcome {
                conversation,
                message_id: None,
                escalated: false,
                reply_scheduled: false,
            });
        }
        self.store
            .record_activity(&conversation.id, message.created_at, &message_preview(&message.body), 1)
            .await?;

        let escalation =
            escalation::evaluate(self.store.as_ref(), config, &conversation, &message.body).await?;
        let escalated = escalation.escalate() || conversation.ownership.ai_escalated();

        let reply_scheduled = !escalation.escalate()
            && should_reply(config, &conversation, &message.message_type, &message.body)
            && self
                .replies
                .submit(ReplyJob::new(config, &conversation))
                .is_some();

        info!(
            config_id = %config.id,
            conversation_id = %conversation.id,
            message_id = %message.id,
            channel = %conversation.channel,
            escalated,
            reply_scheduled,
            "inbound message stored"
        );
        Ok(InboundOutcome {
            conversation,
            message_id: Some(message.id),
            escalated,
            reply_scheduled,
        })
    }
}
