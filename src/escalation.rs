use tracing::info;

use crate::error::Result;
use crate::store::MessagingStore;
use crate::types::{Conversation, MessagingConfig, Ownership};

/// Result of running the escalation check on one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// Policy did not apply (AI disabled or the conversation is already escalated).
    NotEvaluated,
    NoMatch,
    Escalated { keyword: String },
    /// A keyword matched but another writer escalated the conversation first.
    AlreadyHandled { keyword: String },
}

impl EscalationOutcome {
    /// True when the conversation is escalated as a result of this message.
    pub fn escalate(&self) -> bool {
        matches!(self, Self::Escalated { .. } | Self::AlreadyHandled { .. })
    }
}

/// First configured keyword found in `body`, case-insensitively.
pub fn keyword_match<'a>(keywords: &'a [String], body: &str) -> Option<&'a str> {
    let haystack = body.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .find(|k| haystack.contains(&k.to_lowercase()))
}

/// Checks `body` against the config's keywords and moves the conversation
/// to `Escalated` on a match, whether the AI or a human held it. Never
/// clears an escalation.
pub async fn evaluate(
    store: &dyn MessagingStore,
    config: &MessagingConfig,
    conversation: &Conversation,
    body: &str,
) -> Result<EscalationOutcome> {
    if !config.ai_enabled || conversation.ownership == Ownership::Escalated {
        return Ok(EscalationOutcome::NotEvaluated);
    }
    let Some(keyword) = keyword_match(&config.ai_escalation_keywords, body) else {
        return Ok(EscalationOutcome::NoMatch);
    };
    let keyword = keyword.to_string();

    if store.escalate(&conversation.id).await? {
        info!(
            config_id = %config.id,
            conversation_id = %conversation.id,
            keyword = %keyword,
            "conversation escalated to a human"
        );
        Ok(EscalationOutcome::Escalated { keyword })
    } else {
        Ok(EscalationOutcome::AlreadyHandled { keyword })
    }
}
