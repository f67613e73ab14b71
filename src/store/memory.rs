use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{phone_digits, MessagingStore, SendOutcome};
use crate::error::{Error, Result};
use crate::types::{
    Channel, Conversation, Customer, Direction, Message, MessageStatus, MessagingConfig, Order,
    Ownership, Product, Storefront,
};

#[derive(Default)]
struct Tables {
    storefronts: HashMap<String, Storefront>,
    configs: Vec<MessagingConfig>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    customers: Vec<Customer>,
    products: Vec<Product>,
    orders: Vec<Order>,
}

/// In-process store with the same uniqueness rules as the Postgres schema.
///
/// Used by tests and by `STORE_BACKEND=memory` for local runs without a
/// database. Everything is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_storefront(&self, storefront: Storefront) {
        let mut t = self.tables.write().await;
        t.storefronts.insert(storefront.id.clone(), storefront);
    }

    pub async fn add_customer(&self, customer: Customer) {
        self.tables.write().await.customers.push(customer);
    }

    pub async fn add_product(&self, product: Product) {
        self.tables.write().await.products.push(product);
    }

    pub async fn add_order(&self, order: Order) {
        self.tables.write().await.orders.push(order);
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.tables.read().await.conversations.clone()
    }

    pub async fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.tables
            .read()
            .await
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub async fn configs(&self) -> Vec<MessagingConfig> {
        self.tables.read().await.configs.clone()
    }
}

fn find_config(
    configs: &[MessagingConfig],
    pred: impl Fn(&MessagingConfig) -> bool,
) -> Option<MessagingConfig> {
    configs.iter().find(|c| pred(c)).cloned()
}

#[async_trait]
impl MessagingStore for MemoryStore {
    async fn find_storefront(&self, store_id: &str) -> Result<Option<Storefront>> {
        Ok(self.tables.read().await.storefronts.get(store_id).cloned())
    }

    async fn find_config_by_store(&self, store_id: &str) -> Result<Option<MessagingConfig>> {
        let t = self.tables.read().await;
        Ok(find_config(&t.configs, |c| c.store_id == store_id))
    }

    async fn find_config_by_phone_number_id(
        &self,
        phone_number_id: &str,
    ) -> Result<Option<MessagingConfig>> {
        if phone_number_id.is_empty() {
            return Ok(None);
        }
        let t = self.tables.read().await;
        Ok(find_config(&t.configs, |c| {
            c.whatsapp_phone_number_id == phone_number_id
        }))
    }

    async fn find_config_by_verify_token(&self, token: &str) -> Result<Option<MessagingConfig>> {
        if token.is_empty() {
            return Ok(None);
        }
        let t = self.tables.read().await;
        Ok(find_config(&t.configs, |c| c.whatsapp_verify_token == token))
    }

    async fn insert_config(&self, config: &MessagingConfig) -> Result<()> {
        let mut t = self.tables.write().await;
        if t.configs.iter().any(|c| c.store_id == config.store_id) {
            return Err(Error::conflict("messaging_configs_store_id_key"));
        }
        t.configs.push(config.clone());
        Ok(())
    }

    async fn find_conversation(
        &self,
        config_id: &str,
        channel: Channel,
        contact_id: &str,
    ) -> Result<Option<Conversation>> {
        let t = self.tables.read().await;
        Ok(t.conversations
            .iter()
            .find(|c| c.config_id == config_id && c.channel == channel && c.contact_id == contact_id)
            .cloned())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let t = self.tables.read().await;
        Ok(t.conversations.iter().find(|c| c.id == id).cloned())
    }

    async fn insert_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut t = self.tables.write().await;
        let taken = t.conversations.iter().any(|c| {
            c.config_id == conversation.config_id
                && c.channel == conversation.channel
                && c.contact_id == conversation.contact_id
        });
        if taken {
            return Err(Error::conflict("conversations_config_channel_contact_key"));
        }
        t.conversations.push(conversation.clone());
        Ok(())
    }

    async fn record_activity(
        &self,
        conversation_id: &str,
        at: DateTime<Utc>,
        preview: &str,
        unread_delta: i32,
    ) -> Result<()> {
        let mut t = self.tables.write().await;
        if let Some(c) = t.conversations.iter_mut().find(|c| c.id == conversation_id) {
            if !matches!(c.last_message_at, Some(last) if last > at) {
                c.last_message_at = Some(at);
                c.last_message_preview = preview.to_string();
            }
            c.unread_count += unread_delta;
            c.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn escalate(&self, conversation_id: &str) -> Result<bool> {
        let mut t = self.tables.write().await;
        match t
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id && c.ownership.can_transition_to(Ownership::Escalated))
        {
            Some(c) => {
                c.ownership = Ownership::Escalated;
                c.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_message(&self, message: &Message) -> Result<bool> {
        let mut t = self.tables.write().await;
        let duplicate = !message.external_message_id.is_empty()
            && t.messages.iter().any(|m| {
                m.conversation_id == message.conversation_id
                    && m.external_message_id == message.external_message_id
            });
        if duplicate {
            return Ok(false);
        }
        t.messages.push(message.clone());
        Ok(true)
    }

    async fn insert_ai_reply(&self, message: &Message) -> Result<bool> {
        let mut t = self.tables.write().await;
        let ai_owned = t
            .conversations
            .iter()
            .any(|c| c.id == message.conversation_id && c.ownership == Ownership::Ai);
        if !ai_owned {
            return Ok(false);
        }
        t.messages.push(message.clone());
        Ok(true)
    }

    async fn record_send_outcome(&self, message_id: &str, outcome: &SendOutcome) -> Result<()> {
        let mut t = self.tables.write().await;
        if let Some(m) = t.messages.iter_mut().find(|m| m.id == message_id) {
            match outcome {
                SendOutcome::Sent { external_id, at } => {
                    m.status = MessageStatus::Sent;
                    m.sent_at = Some(*at);
                    if let Some(id) = external_id {
                        m.external_message_id = id.clone();
                    }
                }
                SendOutcome::Failed { error } => {
                    m.status = MessageStatus::Failed;
                    m.error_message = Some(error.clone());
                }
            }
        }
        Ok(())
    }

    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let t = self.tables.read().await;
        let mut messages = t
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect::<Vec<_>>();
        // stable: ties keep insertion order
        messages.sort_by_key(|m| m.created_at);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }

    async fn apply_delivery_status(
        &self,
        config_id: &str,
        external_id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<bool> {
        if external_id.is_empty() {
            return Ok(false);
        }
        let mut t = self.tables.write().await;
        let owned = t
            .conversations
            .iter()
            .filter(|c| c.config_id == config_id)
            .map(|c| c.id.clone())
            .collect::<Vec<_>>();
        let Some(m) = t.messages.iter_mut().find(|m| {
            m.direction == Direction::Outbound
                && m.external_message_id == external_id
                && owned.contains(&m.conversation_id)
        }) else {
            return Ok(false);
        };
        m.status = status;
        match status {
            MessageStatus::Sent => m.sent_at = Some(at),
            MessageStatus::Delivered => m.delivered_at = Some(at),
            MessageStatus::Read => m.read_at = Some(at),
            MessageStatus::Failed => {
                m.error_message = Some(error.unwrap_or("delivery failed").to_string())
            }
            MessageStatus::Received | MessageStatus::Queued => {}
        }
        Ok(true)
    }

    async fn find_customer(&self, store_id: &str, customer_id: &str) -> Result<Option<Customer>> {
        let t = self.tables.read().await;
        Ok(t.customers
            .iter()
            .find(|c| c.store_id == store_id && c.id == customer_id)
            .cloned())
    }

    async fn find_customer_by_phone(&self, store_id: &str, phone: &str) -> Result<Option<Customer>> {
        let digits = phone_digits(phone);
        if digits.is_empty() {
            return Ok(None);
        }
        let t = self.tables.read().await;
        Ok(t.customers
            .iter()
            .find(|c| c.store_id == store_id && phone_digits(&c.phone) == digits)
            .cloned())
    }

    async fn find_customer_by_email(&self, store_id: &str, email: &str) -> Result<Option<Customer>> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Ok(None);
        }
        let t = self.tables.read().await;
        Ok(t.customers
            .iter()
            .find(|c| c.store_id == store_id && c.email.trim().to_lowercase() == email)
            .cloned())
    }

    async fn active_products(&self, store_id: &str, limit: usize) -> Result<Vec<Product>> {
        let t = self.tables.read().await;
        Ok(t.products
            .iter()
            .filter(|p| p.store_id == store_id && p.is_active)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn recent_orders(&self, customer_id: &str, limit: usize) -> Result<Vec<Order>> {
        let t = self.tables.read().await;
        let mut orders = t
            .orders
            .iter()
            .filter(|o| o.customer_id == customer_id)
            .cloned()
            .collect::<Vec<_>>();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders.truncate(limit);
        Ok(orders)
    }
}
