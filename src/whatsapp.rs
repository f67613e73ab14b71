//! WhatsApp Cloud API plumbing: outbound text sends, webhook signature and
//! subscription checks, and reply formatting.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use regex::Regex;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::MessagingConfig;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com/v21.0";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Delivers an outbound text on a messaging channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Returns the platform's message id when the send was accepted with one.
    async fn send_text(&self, config: &MessagingConfig, to: &str, body: &str) -> Result<Option<String>>;
}

/// Graph API client posting to `{base}/{phone_number_id}/messages`.
#[derive(Clone)]
pub struct WhatsAppCloudSender {
    client: reqwest::Client,
    base_url: String,
}

impl WhatsAppCloudSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ChannelSender for WhatsAppCloudSender {
    async fn send_text(&self, config: &MessagingConfig, to: &str, body: &str) -> Result<Option<String>> {
        let access_token = config.whatsapp_access_token.trim();
        let phone_number_id = config.whatsapp_phone_number_id.trim();
        if access_token.is_empty() || phone_number_id.is_empty() {
            return Err(Error::upstream("missing whatsapp access token or phone number id"));
        }

        let payload = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": body
            }
        });
        let response = self
            .client
            .post(format!("{}/{}/messages", self.base_url, phone_number_id))
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|err| Error::upstream(format!("whatsapp request failed: {err}")))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let detail = serde_json::from_str::<Value>(&raw_body)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or(raw_body);
            warn!(config_id = %config.id, %status, "whatsapp send rejected");
            return Err(Error::upstream(format!("whatsapp returned {status}: {detail}")));
        }

        let message_id = serde_json::from_str::<Value>(&raw_body)
            .ok()
            .and_then(|v| {
                v.pointer("/messages/0/id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .filter(|id| !id.is_empty());
        debug!(config_id = %config.id, message_id = ?message_id, "whatsapp send accepted");
        Ok(message_id)
    }
}

/// Checks `X-Hub-Signature-256` against the raw request body. A config
/// without an app secret accepts every request.
pub fn verify_signature(app_secret: &str, signature_header: Option<&str>, body: &[u8]) -> bool {
    if app_secret.is_empty() {
        return true;
    }
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature).trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

/// Webhook subscription handshake: the challenge to echo back, if the
/// request is a valid `subscribe` for `expected_token`.
pub fn verify_subscription<'a>(
    mode: &str,
    token: &str,
    challenge: &'a str,
    expected_token: &str,
) -> Option<&'a str> {
    let valid = mode == "subscribe"
        && !challenge.is_empty()
        && !expected_token.is_empty()
        && token == expected_token;
    valid.then_some(challenge)
}

/// Rewrites common markdown into WhatsApp's native emphasis.
pub fn format_for_whatsapp(text: &str) -> String {
    let heading_re = Regex::new(r"(?m)^#{1,6}\s+(.+?)\s*#*$").ok();
    let bold_re = Regex::new(r"\*\*(.+?)\*\*|__(.+?)__").ok();
    let strike_re = Regex::new(r"~~(.+?)~~").ok();
    let link_re = Regex::new(r"\[([^\]]+)\]\((https?://[^)\s]+)\)").ok();

    let mut out = text.to_string();
    if let Some(re) = heading_re.as_ref() {
        out = re.replace_all(&out, "*$1*").to_string();
    }
    if let Some(re) = bold_re.as_ref() {
        out = re.replace_all(&out, "*${1}${2}*").to_string();
    }
    if let Some(re) = strike_re.as_ref() {
        out = re.replace_all(&out, "~$1~").to_string();
    }
    if let Some(re) = link_re.as_ref() {
        out = re.replace_all(&out, "$1 ($2)").to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::types::{Channel, Storefront};

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn config() -> MessagingConfig {
        let mut config = MessagingConfig::provisioned(
            &Storefront {
                id: "s1".into(),
                tenant_id: "t1".into(),
                name: "Shop".into(),
            },
            Channel::Whatsapp,
        );
        config.whatsapp_phone_number_id = "10987".into();
        config.whatsapp_access_token = "EAAG-token".into();
        config
    }

    #[test]
    fn signature_accepts_valid_and_rejects_tampered() {
        let body = br#"{"object":"whatsapp_business_account"}"#;
        let header = sign("app-secret", body);
        assert!(verify_signature("app-secret", Some(&header), body));
        assert!(!verify_signature("app-secret", Some(&header), b"{}"));
        assert!(!verify_signature("other", Some(&header), body));
        assert!(!verify_signature("app-secret", None, body));
        assert!(!verify_signature("app-secret", Some("sha256=zz"), body));
    }

    #[test]
    fn signature_skipped_without_secret() {
        assert!(verify_signature("", None, b"anything"));
    }

    #[test]
    fn subscription_echoes_challenge_only_for_matching_token() {
        assert_eq!(verify_subscription("subscribe", "tok", "123", "tok"), Some("123"));
        assert_eq!(verify_subscription("subscribe", "bad", "123", "tok"), None);
        assert_eq!(verify_subscription("unsubscribe", "tok", "123", "tok"), None);
        assert_eq!(verify_subscription("subscribe", "", "123", ""), None);
        assert_eq!(verify_subscription("subscribe", "tok", "", "tok"), None);
    }

    #[test]
    fn markdown_becomes_native_emphasis() {
        assert_eq!(format_for_whatsapp("Our **best** seller"), "Our *best* seller");
        assert_eq!(format_for_whatsapp("## Prices\nMugs"), "*Prices*\nMugs");
        assert_eq!(format_for_whatsapp("~~old~~ new"), "~old~ new");
        assert_eq!(
            format_for_whatsapp("see [our shop](https://shop.example/mugs)"),
            "see our shop (https://shop.example/mugs)"
        );
        assert_eq!(format_for_whatsapp("plain _italic_ text"), "plain _italic_ text");
    }

    #[tokio::test]
    async fn send_returns_native_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/10987/messages"))
            .and(header("authorization", "Bearer EAAG-token"))
            .and(body_partial_json(json!({
                "messaging_product": "whatsapp",
                "to": "233200000001",
                "type": "text",
                "text": { "body": "Hello!" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messaging_product": "whatsapp",
                "contacts": [{ "input": "233200000001", "wa_id": "233200000001" }],
                "messages": [{ "id": "wamid.OUT1" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sender = WhatsAppCloudSender::new(reqwest::Client::new()).with_base_url(server.uri());
        let id = sender.send_text(&config(), "233200000001", "Hello!").await.unwrap();
        assert_eq!(id.as_deref(), Some("wamid.OUT1"));
    }

    #[tokio::test]
    async fn send_without_id_in_response_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "messages": [] })))
            .mount(&server)
            .await;
        let sender = WhatsAppCloudSender::new(reqwest::Client::new()).with_base_url(server.uri());
        assert_eq!(sender.send_text(&config(), "1", "hi").await.unwrap(), None);
    }

    #[tokio::test]
    async fn send_error_carries_graph_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "Invalid OAuth access token.", "code": 190 }
            })))
            .mount(&server)
            .await;
        let sender = WhatsAppCloudSender::new(reqwest::Client::new()).with_base_url(server.uri());
        let err = sender.send_text(&config(), "1", "hi").await.unwrap_err();
        assert!(err.to_string().contains("Invalid OAuth access token."));
    }

    #[tokio::test]
    async fn send_requires_credentials() {
        let mut config = config();
        config.whatsapp_access_token.clear();
        let sender = WhatsAppCloudSender::new(reqwest::Client::new());
        let err = sender.send_text(&config, "1", "hi").await.unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
    }
}
