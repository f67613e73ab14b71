//! Background AI replies.
//!
//! Ingestion hands a [`ReplyJob`] to the [`ReplyQueue`] and returns. Each job
//! waits out the config's humanizing delay, then takes a worker permit and
//! runs [`ReplyEngine::reply`]. Nothing here is retried; failures are logged.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::completion::CompletionProvider;
use crate::error::{Error, Result};
use crate::prompting::{
    render_system_prompt, store_context, SystemPromptContext, MAX_CONTEXT_ORDERS,
    MAX_CONTEXT_PRODUCTS,
};
use crate::status;
use crate::store::{MessagingStore, SendOutcome};
use crate::types::{
    message_preview, Channel, Conversation, Message, MessageType, MessagingConfig, Ownership,
    TranscriptTurn,
};
use crate::whatsapp::{format_for_whatsapp, ChannelSender};

pub const TRANSCRIPT_LIMIT: usize = 20;
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_WORKER_CONCURRENCY: usize = 8;
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether an inbound message should get an automatic reply at all.
pub fn should_reply(
    config: &MessagingConfig,
    conversation: &Conversation,
    message_type: &MessageType,
    body: &str,
) -> bool {
    if !config.ai_enabled || conversation.ownership != Ownership::Ai {
        return false;
    }
    if body.trim().is_empty() {
        return false;
    }
    conversation.channel != Channel::Whatsapp || message_type.is_text()
}

#[derive(Debug, Clone)]
pub struct ReplyJob {
    pub config: MessagingConfig,
    pub conversation_id: String,
    pub channel: Channel,
    /// Recipient on the channel; the phone number for WhatsApp.
    pub contact_id: String,
}

impl ReplyJob {
    pub fn new(config: &MessagingConfig, conversation: &Conversation) -> Self {
        Self {
            config: config.clone(),
            conversation_id: conversation.id.clone(),
            channel: conversation.channel,
            contact_id: conversation.contact_id.clone(),
        }
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.config.ai_auto_reply_delay_ms).unwrap_or(0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// AI was switched off or ownership moved away during the delay.
    NotAiOwned,
    /// The model returned nothing usable.
    NoCompletion,
    /// Ownership changed between completion and insert; nothing persisted.
    Suppressed,
    Delivered {
        message_id: String,
        external_id: Option<String>,
    },
    DeliveryFailed {
        message_id: String,
        error: String,
    },
}

pub struct ReplyEngine {
    store: Arc<dyn MessagingStore>,
    completion: Arc<dyn CompletionProvider>,
    sender: Arc<dyn ChannelSender>,
    completion_timeout: Duration,
}

impl ReplyEngine {
    pub fn new(
        store: Arc<dyn MessagingStore>,
        completion: Arc<dyn CompletionProvider>,
        sender: Arc<dyn ChannelSender>,
    ) -> Self {
        Self {
            store,
            completion,
            sender,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    /// Generates, persists and delivers one reply. Assumes the humanizing
    /// delay has already elapsed.
    pub async fn reply(&self, job: &ReplyJob) -> Result<ReplyOutcome> {
        let config = self
            .store
            .find_config_by_store(&job.config.store_id)
            .await?
            .unwrap_or_else(|| job.config.clone());
        let conversation = self
            .store
            .get_conversation(&job.conversation_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("conversation {}", job.conversation_id)))?;
        if !config.ai_enabled || conversation.ownership != Ownership::Ai {
            return Ok(ReplyOutcome::NotAiOwned);
        }

        let transcript = self
            .store
            .recent_messages(&conversation.id, TRANSCRIPT_LIMIT)
            .await?
            .iter()
            .map(TranscriptTurn::from)
            .collect::<Vec<_>>();
        let system = self.system_prompt(&config, &conversation).await?;

        let completion = tokio::time::timeout(
            self.completion_timeout,
            self.completion.complete(&system, &transcript),
        )
        .await
        .map_err(|_| {
            Error::completion(format!(
                "timed out after {}s",
                self.completion_timeout.as_secs()
            ))
        })??;
        let Some(text) = completion else {
            return Ok(ReplyOutcome::NoCompletion);
        };

        let body = match job.channel {
            Channel::Whatsapp => format_for_whatsapp(&text),
            Channel::WebChat => text,
        };
        let message = Message::ai_reply(&conversation.id, &body);
        if !self.store.insert_ai_reply(&message).await? {
            debug!(
                conversation_id = %conversation.id,
                "ownership changed before reply was stored"
            );
            return Ok(ReplyOutcome::Suppressed);
        }

        let outcome = self.deliver(&config, job, &body).await;
        status::record_send(self.store.as_ref(), &message.id, &outcome).await?;
        self.store
            .record_activity(&conversation.id, message.created_at, &message_preview(&body), 0)
            .await?;

        Ok(match outcome {
            SendOutcome::Sent { external_id, .. } => ReplyOutcome::Delivered {
                message_id: message.id,
                external_id,
            },
            SendOutcome::Failed { error } => ReplyOutcome::DeliveryFailed {
                message_id: message.id,
                error,
            },
        })
    }

    async fn system_prompt(
        &self,
        config: &MessagingConfig,
        conversation: &Conversation,
    ) -> Result<String> {
        let store_name = self
            .store
            .find_storefront(&config.store_id)
            .await?
            .map(|s| s.name)
            .unwrap_or_default();
        let products = if config.ai_handle_products {
            self.store
                .active_products(&config.store_id, MAX_CONTEXT_PRODUCTS)
                .await?
        } else {
            Vec::new()
        };
        let orders = match conversation.customer_id.as_deref() {
            Some(customer_id) if config.ai_handle_orders => {
                self.store
                    .recent_orders(customer_id, MAX_CONTEXT_ORDERS)
                    .await?
            }
            _ => Vec::new(),
        };
        let context = store_context(&products, &orders);
        Ok(render_system_prompt(&SystemPromptContext {
            store_name: &store_name,
            persona: &config.ai_persona,
            store_context: &context,
            channel: conversation.channel,
        }))
    }

    async fn deliver(&self, config: &MessagingConfig, job: &ReplyJob, body: &str) -> SendOutcome {
        match job.channel {
            // Web chat clients poll the conversation; storing the reply is delivery.
            Channel::WebChat => SendOutcome::Sent {
                external_id: None,
                at: Utc::now(),
            },
            Channel::Whatsapp => match self.sender.send_text(config, &job.contact_id, body).await {
                Ok(Some(external_id)) => SendOutcome::Sent {
                    external_id: Some(external_id),
                    at: Utc::now(),
                },
                Ok(None) => SendOutcome::Failed {
                    error: "send returned no message id".to_string(),
                },
                Err(err) => SendOutcome::Failed {
                    error: err.to_string(),
                },
            },
        }
    }
}

/// Bounded pool for reply jobs.
///
/// `capacity` caps jobs in flight (waiting out their delay or running);
/// submissions beyond it are dropped. `concurrency` caps jobs running
/// against the store and the model at once.
pub struct ReplyQueue {
    engine: Arc<ReplyEngine>,
    pending: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    capacity: u32,
}

impl ReplyQueue {
    pub fn new(engine: Arc<ReplyEngine>, capacity: usize, concurrency: usize) -> Self {
        let capacity = u32::try_from(capacity.max(1)).unwrap_or(u32::MAX);
        Self {
            engine,
            pending: Arc::new(Semaphore::new(capacity as usize)),
            workers: Arc::new(Semaphore::new(concurrency.max(1))),
            capacity,
        }
    }

    /// Schedules `job` without blocking. Returns `None` if the queue is full.
    pub fn submit(&self, job: ReplyJob) -> Option<JoinHandle<()>> {
        let Ok(slot) = self.pending.clone().try_acquire_owned() else {
            warn!(
                config_id = %job.config.id,
                conversation_id = %job.conversation_id,
                "reply queue full, dropping reply job"
            );
            return None;
        };
        let engine = self.engine.clone();
        let workers = self.workers.clone();
        Some(tokio::spawn(async move {
            let _slot = slot;
            tokio::time::sleep(job.delay()).await;
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            match engine.reply(&job).await {
                Ok(ReplyOutcome::Delivered {
                    message_id,
                    external_id,
                }) => info!(
                    conversation_id = %job.conversation_id,
                    message_id = %message_id,
                    external_message_id = external_id.as_deref().unwrap_or(""),
                    "ai reply delivered"
                ),
                Ok(ReplyOutcome::DeliveryFailed { message_id, error }) => warn!(
                    conversation_id = %job.conversation_id,
                    message_id = %message_id,
                    error = %error,
                    "ai reply stored but delivery failed"
                ),
                Ok(outcome) => debug!(
                    conversation_id = %job.conversation_id,
                    outcome = ?outcome,
                    "ai reply skipped"
                ),
                Err(err) => warn!(
                    conversation_id = %job.conversation_id,
                    error = %err,
                    "ai reply failed"
                ),
            }
        }))
    }

    /// Waits until every submitted job has finished.
    pub async fn wait_idle(&self) {
        if let Ok(all) = self.pending.acquire_many(self.capacity).await {
            drop(all);
        }
    }
}
