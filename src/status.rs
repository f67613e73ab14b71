use tracing::debug;

use crate::error::Result;
use crate::normalize::StatusUpdate;
use crate::store::{MessagingStore, SendOutcome};
use crate::types::{MessageStatus, MessagingConfig};

/// Records the result of the first send attempt on a freshly stored reply.
pub async fn record_send(
    store: &dyn MessagingStore,
    message_id: &str,
    outcome: &SendOutcome,
) -> Result<()> {
    if let SendOutcome::Failed { error } = outcome {
        debug!(message_id, error = %error, "recording failed send");
    }
    store.record_send_outcome(message_id, outcome).await
}

/// Applies one delivery callback to the outbound message carrying its
/// native id. Unknown ids are a no-op; returns whether a message changed.
pub async fn apply_status(
    store: &dyn MessagingStore,
    config: &MessagingConfig,
    update: &StatusUpdate,
) -> Result<bool> {
    if !matches!(
        update.status,
        MessageStatus::Sent | MessageStatus::Delivered | MessageStatus::Read | MessageStatus::Failed
    ) {
        debug!(status = update.status.as_str(), "ignoring non-delivery status");
        return Ok(false);
    }
    let applied = store
        .apply_delivery_status(
            &config.id,
            &update.external_id,
            update.status,
            update.timestamp,
            update.error.as_deref(),
        )
        .await?;
    if applied {
        debug!(
            config_id = %config.id,
            external_message_id = %update.external_id,
            recipient_id = %update.recipient_id,
            status = update.status.as_str(),
            "delivery status applied"
        );
    } else {
        debug!(
            config_id = %config.id,
            external_message_id = %update.external_id,
            recipient_id = %update.recipient_id,
            status = update.status.as_str(),
            "status callback for unknown message"
        );
    }
    Ok(applied)
}
