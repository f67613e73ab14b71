//! Find-or-create for messaging configs and conversations.
//!
//! Both creates are guarded by unique keys in the store. Losing a race is
//! not an error: the loser re-reads the row the winner inserted.

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::MessagingStore;
use crate::types::{Channel, ContactHints, Conversation, Customer, MessagingConfig, Storefront};

/// Returns the store's messaging config, provisioning channel defaults on
/// first contact.
pub async fn ensure_config(
    store: &dyn MessagingStore,
    storefront: &Storefront,
    channel: Channel,
) -> Result<MessagingConfig> {
    if let Some(config) = store.find_config_by_store(&storefront.id).await? {
        return Ok(config);
    }

    let config = MessagingConfig::provisioned(storefront, channel);
    match store.insert_config(&config).await {
        Ok(()) => {
            info!(
                store_id = %storefront.id,
                config_id = %config.id,
                %channel,
                "provisioned messaging config"
            );
            Ok(config)
        }
        Err(err) if err.is_conflict() => {
            debug!(store_id = %storefront.id, "config created concurrently, re-reading");
            store
                .find_config_by_store(&storefront.id)
                .await?
                .ok_or_else(|| Error::not_found(format!("messaging config for store {}", storefront.id)))
        }
        Err(err) => Err(err),
    }
}

/// Returns the one conversation for (config, channel, contact), creating it
/// if needed. Customer linkage only happens at creation.
pub async fn resolve(
    store: &dyn MessagingStore,
    config: &MessagingConfig,
    channel: Channel,
    contact_id: &str,
    hints: &ContactHints,
) -> Result<Conversation> {
    if let Some(existing) = store
        .find_conversation(&config.id, channel, contact_id)
        .await?
    {
        return Ok(existing);
    }

    let customer = link_customer(store, config, channel, contact_id, hints).await?;
    let conversation = Conversation::new(config, channel, contact_id, hints, customer.as_ref());

    match store.insert_conversation(&conversation).await {
        Ok(()) => {
            info!(
                config_id = %config.id,
                conversation_id = %conversation.id,
                %channel,
                customer_id = conversation.customer_id.as_deref().unwrap_or(""),
                ownership = conversation.ownership.as_str(),
                "conversation created"
            );
            Ok(conversation)
        }
        Err(err) if err.is_conflict() => {
            debug!(config_id = %config.id, contact_id, "conversation created concurrently, re-reading");
            store
                .find_conversation(&config.id, channel, contact_id)
                .await?
                .ok_or_else(|| Error::not_found(format!("conversation for contact {contact_id}")))
        }
        Err(err) => Err(err),
    }
}

async fn link_customer(
    store: &dyn MessagingStore,
    config: &MessagingConfig,
    channel: Channel,
    contact_id: &str,
    hints: &ContactHints,
) -> Result<Option<Customer>> {
    match channel {
        Channel::Whatsapp => {
            let phone = hints.phone.as_deref().unwrap_or(contact_id);
            store.find_customer_by_phone(&config.store_id, phone).await
        }
        Channel::WebChat => {
            if let Some(id) = hints.customer_id.as_deref().filter(|id| !id.trim().is_empty()) {
                if let Some(customer) = store.find_customer(&config.store_id, id.trim()).await? {
                    return Ok(Some(customer));
                }
            }
            match hints.email.as_deref() {
                Some(email) => store.find_customer_by_email(&config.store_id, email).await,
                None => Ok(None),
            }
        }
    }
}
