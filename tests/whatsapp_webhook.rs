#![allow(clippy::unwrap_used)]

mod common;

use axum::{body::Body, http::Request, http::StatusCode};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use common::*;
use messaging_server::types::{Direction, MessageStatus, MessageType, Ownership};

#[tokio::test]
async fn verification_echoes_challenge_for_known_token() {
    let app = TestApp::new().await;
    app.whatsapp_config(|_| {}).await;

    let (status, body) = app
        .get("/api/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=4242")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(4242));

    let (status, _) = app
        .get("/api/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=4242")
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test(start_paused = true)]
async fn new_contact_with_ai_disabled_gets_no_reply() {
    let app = TestApp::new().await;
    app.whatsapp_config(|c| c.ai_enabled = false).await;

    let (status, body) = app.post_webhook(&text_message("wamid.IN1", "Hi, do you print mugs?")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true, "processed": 1 }));
    app.settle().await;

    let conversations = app.store.conversations().await;
    assert_eq!(conversations.len(), 1);
    let convo = &conversations[0];
    assert_eq!(convo.ownership, Ownership::Human);
    assert_eq!(convo.contact_id, CUSTOMER_PHONE);
    assert_eq!(convo.customer_name, "Ama");
    assert_eq!(convo.unread_count, 1);
    assert_eq!(convo.last_message_preview, "Hi, do you print mugs?");

    let messages = app.all_messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, MessageStatus::Received);
    assert_eq!(app.completion_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn text_message_gets_formatted_ai_reply_and_status_round_trip() {
    let app = TestApp::with_reply("Yes, we print **custom mugs**. See [our catalog](https://shop.example/mugs)").await;
    app.whatsapp_config(|_| {}).await;

    app.post_webhook(&text_message("wamid.IN1", "Do you print mugs?")).await;
    app.settle().await;

    let formatted = "Yes, we print *custom mugs*. See our catalog (https://shop.example/mugs)";
    let sent = app.sender.sent.lock().unwrap().clone();
    assert_eq!(sent, vec![(CUSTOMER_PHONE.to_string(), formatted.to_string())]);

    let reply = app
        .all_messages()
        .await
        .into_iter()
        .find(|m| m.direction == Direction::Outbound)
        .unwrap();
    assert!(reply.ai_generated);
    assert_eq!(reply.body, formatted);
    assert_eq!(reply.status, MessageStatus::Sent);
    assert_eq!(reply.external_message_id, "wamid.OUT1");

    let (status, body) = app.post_webhook(&status_callback("wamid.OUT1", "delivered")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 1);
    let (_, _) = app.post_webhook(&status_callback("wamid.OUT1", "read")).await;

    let reply = app
        .all_messages()
        .await
        .into_iter()
        .find(|m| m.id == reply.id)
        .unwrap();
    assert_eq!(reply.status, MessageStatus::Read);
    assert!(reply.delivered_at.is_some());
    assert!(reply.read_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn keyword_escalates_and_silences_later_messages() {
    let app = TestApp::new().await;
    app.whatsapp_config(|_| {}).await;

    app.post_webhook(&text_message("wamid.IN1", "This looks like a SCAM")).await;
    app.settle().await;
    let convo = app.store.conversations().await.remove(0);
    assert_eq!(convo.ownership, Ownership::Escalated);

    app.post_webhook(&text_message("wamid.IN2", "hello? anyone there?")).await;
    app.settle().await;

    assert_eq!(app.completion_calls(), 0);
    assert!(app.sender.sent.lock().unwrap().is_empty());
    let messages = app.all_messages().await;
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.direction == Direction::Inbound));
}

#[tokio::test(start_paused = true)]
async fn location_is_stored_without_reply() {
    let app = TestApp::new().await;
    app.whatsapp_config(|_| {}).await;

    let envelope = inbound(json!({
        "from": CUSTOMER_PHONE,
        "id": "wamid.LOC",
        "timestamp": "1700000000",
        "type": "location",
        "location": { "latitude": 5.6037, "longitude": -0.187 }
    }));
    let (_, body) = app.post_webhook(&envelope).await;
    assert_eq!(body["processed"], 1);
    app.settle().await;

    let messages = app.all_messages().await;
    assert_eq!(messages.len(), 1);
    let location = &messages[0];
    assert_eq!(location.message_type, MessageType::Location);
    assert_eq!(location.latitude, Some(5.6037));
    assert_eq!(location.longitude, Some(-0.187));
    assert_eq!(location.body, "Location: 5.6037, -0.187");
    assert_eq!(app.completion_calls(), 0);
}

#[tokio::test]
async fn unknown_status_id_is_a_no_op() {
    let app = TestApp::new().await;
    app.whatsapp_config(|_| {}).await;

    let (status, body) = app.post_webhook(&status_callback("wamid.UNKNOWN", "read")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert!(app.all_messages().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn redelivered_envelope_is_idempotent() {
    let app = TestApp::new().await;
    app.whatsapp_config(|_| {}).await;
    let envelope = text_message("wamid.IN1", "Do you deliver to Kumasi?");

    app.post_webhook(&envelope).await;
    app.settle().await;
    let (status, _) = app.post_webhook(&envelope).await;
    assert_eq!(status, StatusCode::OK);
    app.settle().await;

    assert_eq!(app.store.conversations().await.len(), 1);
    let messages = app.all_messages().await;
    assert_eq!(messages.iter().filter(|m| m.direction == Direction::Inbound).count(), 1);
    assert_eq!(messages.iter().filter(|m| m.ai_generated).count(), 1);
    assert_eq!(app.store.conversations().await[0].unread_count, 1);
}

#[tokio::test]
async fn unknown_phone_number_and_garbage_still_acknowledge() {
    let app = TestApp::new().await;

    let (status, body) = app.post_webhook(&text_message("wamid.IN1", "hi")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true, "processed": 0 }));

    let (status, body) = app
        .request(
            Request::post("/api/webhooks/whatsapp")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 0);
    assert!(app.store.conversations().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn signed_webhooks_require_valid_signature() {
    let app = TestApp::new().await;
    app.whatsapp_config(|c| c.whatsapp_app_secret = "app-secret".into()).await;
    let payload = text_message("wamid.IN1", "hello").to_string();

    let (_, body) = app.post_webhook(&serde_json::from_str(&payload).unwrap()).await;
    assert_eq!(body["processed"], 0);
    assert!(app.store.conversations().await.is_empty());

    let mut mac = Hmac::<Sha256>::new_from_slice(b"app-secret").unwrap();
    mac.update(payload.as_bytes());
    let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
    let (status, body) = app
        .request(
            Request::post("/api/webhooks/whatsapp")
                .header("content-type", "application/json")
                .header("x-hub-signature-256", signature)
                .body(Body::from(payload))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 1);
    app.settle().await;
    assert_eq!(app.store.conversations().await.len(), 1);
}
