//! Record store for configs, conversations and messages.
//!
//! Storefronts, customers, products and orders belong to other modules of the
//! platform and are only ever read through this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    Channel, Conversation, Customer, Message, MessageStatus, MessagingConfig, Order, Product,
    Storefront,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Outcome of a send attempt, recorded on the outbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent {
        external_id: Option<String>,
        at: DateTime<Utc>,
    },
    Failed {
        error: String,
    },
}

#[async_trait]
pub trait MessagingStore: Send + Sync {
    async fn find_storefront(&self, store_id: &str) -> Result<Option<Storefront>>;

    async fn find_config_by_store(&self, store_id: &str) -> Result<Option<MessagingConfig>>;
    async fn find_config_by_phone_number_id(
        &self,
        phone_number_id: &str,
    ) -> Result<Option<MessagingConfig>>;
    async fn find_config_by_verify_token(&self, token: &str) -> Result<Option<MessagingConfig>>;
    /// Fails with `Error::Conflict` if the store already has a config.
    async fn insert_config(&self, config: &MessagingConfig) -> Result<()>;

    async fn find_conversation(
        &self,
        config_id: &str,
        channel: Channel,
        contact_id: &str,
    ) -> Result<Option<Conversation>>;
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;
    /// Fails with `Error::Conflict` if (config, channel, contact) is taken.
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<()>;
    /// Bumps timestamp and preview unless `at` is older than the last message;
    /// `unread_delta` is always added to the unread count.
    async fn record_activity(
        &self,
        conversation_id: &str,
        at: DateTime<Utc>,
        preview: &str,
        unread_delta: i32,
    ) -> Result<()>;
    /// Moves a conversation to `Escalated`. Returns false when it already was,
    /// so concurrent escalations are harmless.
    async fn escalate(&self, conversation_id: &str) -> Result<bool>;

    /// Returns false when a message with the same non-empty external id
    /// already exists on the conversation.
    async fn insert_message(&self, message: &Message) -> Result<bool>;
    /// Inserts an AI reply only while the conversation is still AI-owned.
    async fn insert_ai_reply(&self, message: &Message) -> Result<bool>;
    async fn record_send_outcome(&self, message_id: &str, outcome: &SendOutcome) -> Result<()>;
    /// Up to `limit` most recent messages, oldest first.
    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>>;
    /// Applies a status callback to the outbound message with that external id
    /// among the config's conversations. Returns false when none matched.
    async fn apply_delivery_status(
        &self,
        config_id: &str,
        external_id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<bool>;

    async fn find_customer(&self, store_id: &str, customer_id: &str) -> Result<Option<Customer>>;
    /// Matches on digits only, so `+15551234567` and `15551234567` are equal.
    async fn find_customer_by_phone(&self, store_id: &str, phone: &str) -> Result<Option<Customer>>;
    /// Case-insensitive.
    async fn find_customer_by_email(&self, store_id: &str, email: &str) -> Result<Option<Customer>>;
    async fn active_products(&self, store_id: &str, limit: usize) -> Result<Vec<Product>>;
    /// Most recent first.
    async fn recent_orders(&self, customer_id: &str, limit: usize) -> Result<Vec<Order>>;
}

pub(crate) fn phone_digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}
