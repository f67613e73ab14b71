#![allow(clippy::unwrap_used)]

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::*;
use messaging_server::types::{Channel, Customer, MessageStatus, Ownership};

#[tokio::test(start_paused = true)]
async fn first_message_provisions_config_and_gets_reply() {
    let app = TestApp::new().await;

    let (status, body) = app
        .post_json(
            "/api/webchat",
            &json!({ "storeId": "store-1", "sessionId": "sess-1", "message": "Do you print banners?" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["escalated"], false);
    assert!(body["messageId"].is_string());

    let configs = app.store.configs().await;
    assert_eq!(configs.len(), 1);
    assert!(configs[0].web_chat_enabled);
    assert!(configs[0].web_chat_welcome_message.contains("Print Hub"));

    app.settle().await;
    assert!(app.sender.sent.lock().unwrap().is_empty());

    let (status, session) = app.get("/api/webchat?storeId=store-1&sessionId=sess-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["config"]["enabled"], true);
    assert_eq!(session["conversation"]["id"], body["conversationId"]);
    assert_eq!(session["conversation"]["aiHandled"], true);
    assert_eq!(session["conversation"]["channel"], "web_chat");
    let messages = session["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["body"], "Do you print banners?");
    assert_eq!(messages[1]["body"], "Happy to help!");
    assert_eq!(messages[1]["aiGenerated"], true);
    assert_eq!(messages[1]["status"], "sent");
}

#[tokio::test(start_paused = true)]
async fn escalation_keyword_is_reported_and_blocks_reply() {
    let app = TestApp::new().await;

    let (_, body) = app
        .post_json(
            "/api/webchat",
            &json!({ "storeId": "store-1", "sessionId": "sess-2", "message": "I need to talk to a HUMAN" }),
        )
        .await;
    assert_eq!(body["escalated"], true);
    app.settle().await;

    let convo = app.store.conversations().await.remove(0);
    assert_eq!(convo.ownership, Ownership::Escalated);
    assert_eq!(app.completion_calls(), 0);

    let (_, session) = app.get("/api/webchat?storeId=store-1&sessionId=sess-2").await;
    assert_eq!(session["conversation"]["aiEscalated"], true);
    assert_eq!(session["conversation"]["aiHandled"], false);
}

#[tokio::test]
async fn validation_errors_are_400() {
    let app = TestApp::new().await;

    let (status, body) = app
        .post_json("/api/webchat", &json!({ "storeId": "store-1", "sessionId": "s", "message": "   " }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "message must not be empty");

    let (status, body) = app
        .post_json("/api/webchat", &json!({ "sessionId": "s", "message": "hi" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "storeId is required");

    let (status, _) = app.get("/api/webchat?storeId=store-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.store.conversations().await.is_empty());
}

#[tokio::test]
async fn unknown_store_is_404() {
    let app = TestApp::new().await;

    let (status, body) = app
        .post_json("/api/webchat", &json!({ "storeId": "ghost", "sessionId": "s", "message": "hi" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "store ghost not found");

    let (status, _) = app.get("/api/webchat?storeId=ghost&sessionId=s").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn widget_defaults_before_first_message() {
    let app = TestApp::new().await;

    let (status, session) = app.get("/api/webchat?storeId=store-1&sessionId=new").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["config"]["enabled"], true);
    assert_eq!(session["config"]["primaryColor"], "#2563eb");
    assert!(session["conversation"].is_null());
    assert_eq!(session["messages"], json!([]));
    assert!(app.store.configs().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn known_customer_is_linked_by_email() {
    let app = TestApp::new().await;
    app.store
        .add_customer(Customer {
            id: "cust-9".into(),
            store_id: "store-1".into(),
            name: "Kwame Mensah".into(),
            email: "kwame@example.com".into(),
            phone: String::new(),
        })
        .await;

    let (status, _) = app
        .post_json(
            "/api/webchat",
            &json!({
                "storeId": "store-1",
                "sessionId": "sess-3",
                "message": "Where is my order?",
                "customerEmail": "Kwame@Example.com"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    app.settle().await;

    let convo = app.store.conversations().await.remove(0);
    assert_eq!(convo.channel, Channel::WebChat);
    assert_eq!(convo.customer_id.as_deref(), Some("cust-9"));
    assert_eq!(convo.customer_name, "Kwame Mensah");
    assert_eq!(convo.customer_email, "Kwame@Example.com");

    let reply = app
        .all_messages()
        .await
        .into_iter()
        .find(|m| m.ai_generated)
        .unwrap();
    assert_eq!(reply.status, MessageStatus::Sent);
}

#[tokio::test]
async fn disabled_web_chat_is_404() {
    let app = TestApp::new().await;
    app.whatsapp_config(|_| {}).await;

    let (status, _) = app
        .post_json("/api/webchat", &json!({ "storeId": "store-1", "sessionId": "s", "message": "hi" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, session) = app.get("/api/webchat?storeId=store-1&sessionId=s").await;
    assert_eq!(session["config"]["enabled"], false);
}

#[tokio::test]
async fn health_is_ok() {
    let app = TestApp::new().await;
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}
