#![allow(dead_code, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use messaging_server::app::{router, AppState};
use messaging_server::completion::CompletionProvider;
use messaging_server::config::Config;
use messaging_server::store::{MemoryStore, MessagingStore};
use messaging_server::types::{Channel, Message, MessagingConfig, Storefront, TranscriptTurn};
use messaging_server::whatsapp::ChannelSender;
use messaging_server::Result;

pub const PHONE_NUMBER_ID: &str = "109876543210";
pub const VERIFY_TOKEN: &str = "verify-me";
pub const CUSTOMER_PHONE: &str = "233200000001";

pub struct ScriptedCompletion {
    pub reply: String,
    pub calls: Mutex<Vec<(String, Vec<TranscriptTurn>)>>,
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    async fn complete(&self, system: &str, transcript: &[TranscriptTurn]) -> Result<Option<String>> {
        self.calls
            .lock()
            .unwrap()
            .push((system.to_string(), transcript.to_vec()));
        Ok(Some(self.reply.clone()))
    }
}

/// Accepts every send and hands out sequential `wamid.OUT<n>` ids.
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ChannelSender for RecordingSender {
    async fn send_text(&self, _config: &MessagingConfig, to: &str, body: &str) -> Result<Option<String>> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), body.to_string()));
        Ok(Some(format!("wamid.OUT{}", sent.len())))
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub completion: Arc<ScriptedCompletion>,
    pub sender: Arc<RecordingSender>,
    pub state: Arc<AppState>,
    pub router: Router,
}

pub fn storefront(id: &str) -> Storefront {
    Storefront {
        id: id.to_string(),
        tenant_id: "tenant-1".to_string(),
        name: "Print Hub".to_string(),
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_reply("Happy to help!").await
    }

    /// Test app whose completion always answers `reply`.
    pub async fn with_reply(reply: &str) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.add_storefront(storefront("store-1")).await;
        let completion = Arc::new(ScriptedCompletion {
            reply: reply.to_string(),
            calls: Mutex::new(Vec::new()),
        });
        let sender = Arc::new(RecordingSender::default());
        let state = AppState::new(
            &Config::default(),
            store.clone(),
            completion.clone(),
            sender.clone(),
        );
        let router = router(state.clone());
        Self {
            store,
            completion,
            sender,
            state,
            router,
        }
    }

    /// Registers a WhatsApp config for `store-1`; `tweak` adjusts it first.
    pub async fn whatsapp_config(&self, tweak: impl FnOnce(&mut MessagingConfig)) -> MessagingConfig {
        let mut config = MessagingConfig::provisioned(&storefront("store-1"), Channel::Whatsapp);
        config.whatsapp_phone_number_id = PHONE_NUMBER_ID.to_string();
        config.whatsapp_access_token = "EAAG-test".to_string();
        config.whatsapp_verify_token = VERIFY_TOKEN.to_string();
        config.ai_escalation_keywords = vec!["scam".into(), "refund".into(), "human".into()];
        tweak(&mut config);
        self.store.insert_config(&config).await.unwrap();
        config
    }

    pub async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    pub async fn post_json(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        self.request(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post_webhook(&self, envelope: &Value) -> (StatusCode, Value) {
        self.post_json("/api/webhooks/whatsapp", envelope).await
    }

    /// Lets background replies finish.
    pub async fn settle(&self) {
        self.state.pipeline.replies().wait_idle().await;
    }

    pub async fn all_messages(&self) -> Vec<Message> {
        let mut all = Vec::new();
        for convo in self.store.conversations().await {
            all.extend(self.store.messages(&convo.id).await);
        }
        all
    }

    pub fn completion_calls(&self) -> usize {
        self.completion.calls.lock().unwrap().len()
    }
}

pub fn envelope(value: Value) -> Value {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "waba-1",
            "changes": [{ "field": "messages", "value": value }]
        }]
    })
}

pub fn inbound(message: Value) -> Value {
    envelope(json!({
        "messaging_product": "whatsapp",
        "metadata": { "display_phone_number": "15550000000", "phone_number_id": PHONE_NUMBER_ID },
        "contacts": [{ "wa_id": CUSTOMER_PHONE, "profile": { "name": "Ama" } }],
        "messages": [message]
    }))
}

pub fn text_message(id: &str, body: &str) -> Value {
    inbound(json!({
        "from": CUSTOMER_PHONE,
        "id": id,
        "timestamp": "1700000000",
        "type": "text",
        "text": { "body": body }
    }))
}

pub fn status_callback(external_id: &str, status: &str) -> Value {
    envelope(json!({
        "messaging_product": "whatsapp",
        "metadata": { "display_phone_number": "15550000000", "phone_number_id": PHONE_NUMBER_ID },
        "statuses": [{
            "id": external_id,
            "status": status,
            "timestamp": "1700000100",
            "recipient_id": CUSTOMER_PHONE
        }]
    }))
}
