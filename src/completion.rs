//! Language-model completion for AI replies.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{TranscriptRole, TranscriptTurn};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4.1-mini";

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Returns `None` when the model produced nothing usable.
    async fn complete(&self, system: &str, transcript: &[TranscriptTurn]) -> Result<Option<String>>;
}

/// Chat-completions client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiCompletion {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiCompletion {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(&self, system: &str, transcript: &[TranscriptTurn]) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": system })];
        messages.extend(transcript.iter().map(|turn| {
            let role = match turn.role {
                TranscriptRole::Customer => "user",
                TranscriptRole::Assistant => "assistant",
            };
            json!({ "role": role, "content": turn.content })
        }));
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.7,
            "max_tokens": 500
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletion {
    async fn complete(&self, system: &str, transcript: &[TranscriptTurn]) -> Result<Option<String>> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(system, transcript))
            .send()
            .await
            .map_err(|err| Error::completion(format!("openai request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::completion(format!("openai returned {status}: {body}")));
        }
        let payload = response
            .json::<Value>()
            .await
            .map_err(|err| Error::completion(format!("openai parse failed: {err}")))?;

        let text = payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|msg| msg.get("content"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("");
        if text.is_empty() {
            debug!(model = %self.model, "completion returned empty content");
            return Ok(None);
        }
        Ok(Some(text.to_string()))
    }
}

/// Used when no API key is configured; AI replies are silently skipped.
pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    async fn complete(&self, _system: &str, _transcript: &[TranscriptTurn]) -> Result<Option<String>> {
        Ok(None)
    }
}
