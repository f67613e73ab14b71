use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::completion::{CompletionProvider, DisabledCompletion, OpenAiCompletion};
use crate::config::{Config, StoreBackend};
use crate::error::{Error, Result};
use crate::ingest::Pipeline;
use crate::normalize::{normalize_web_chat, WebChatRequest};
use crate::reply::{ReplyEngine, ReplyQueue};
use crate::store::{MemoryStore, MessagingStore, PgStore};
use crate::whatsapp::{verify_subscription, ChannelSender, WhatsAppCloudSender, SIGNATURE_HEADER};

pub struct AppState {
    pub pipeline: Pipeline,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn MessagingStore>,
        completion: Arc<dyn CompletionProvider>,
        sender: Arc<dyn ChannelSender>,
    ) -> Arc<Self> {
        let engine = ReplyEngine::new(store.clone(), completion, sender)
            .with_completion_timeout(config.completion_timeout);
        let replies = ReplyQueue::new(
            Arc::new(engine),
            config.reply_queue_capacity,
            config.reply_worker_concurrency,
        );
        Arc::new(Self {
            pipeline: Pipeline::new(store, Arc::new(replies)),
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/webhooks/whatsapp",
            get(whatsapp_webhook_verify).post(whatsapp_webhook_event),
        )
        .route("/api/webchat", get(get_web_chat).post(post_web_chat))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": Utc::now().to_rfc3339() }))
}

async fn whatsapp_webhook_verify(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").map(String::as_str).unwrap_or("");
    let verify_token = params.get("hub.verify_token").map(String::as_str).unwrap_or("");
    let challenge = params.get("hub.challenge").map(String::as_str).unwrap_or("");

    let config = match state
        .pipeline
        .store()
        .find_config_by_verify_token(verify_token)
        .await
    {
        Ok(config) => config,
        Err(err) => return err.into_response(),
    };
    let expected = config
        .as_ref()
        .map(|c| c.whatsapp_verify_token.as_str())
        .unwrap_or("");
    if let Some(challenge) = verify_subscription(mode, verify_token, challenge, expected) {
        return (StatusCode::OK, challenge.to_string()).into_response();
    }

    warn!(mode, "rejected webhook verification");
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": "invalid webhook verification token" })),
    )
        .into_response()
}

async fn whatsapp_webhook_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let processed = state.pipeline.whatsapp_webhook(&body, signature).await;
    Json(json!({ "received": true, "processed": processed }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebChatQuery {
    #[serde(default)]
    store_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

async fn get_web_chat(
    Query(query): Query<WebChatQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse> {
    let session = state
        .pipeline
        .web_chat_session(
            query.store_id.as_deref().unwrap_or(""),
            query.session_id.as_deref().unwrap_or(""),
        )
        .await?;
    Ok(Json(session))
}

async fn post_web_chat(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<WebChatRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(request) = body.map_err(|rejection| Error::client_input(rejection.body_text()))?;
    let inbound = normalize_web_chat(request)?;
    let outcome = state.pipeline.web_chat_message(inbound).await?;
    Ok(Json(json!({
        "success": true,
        "conversationId": outcome.conversation.id,
        "messageId": outcome.message_id,
        "escalated": outcome.escalated,
    })))
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn open_store(config: &Config) -> Result<Arc<dyn MessagingStore>> {
    match config.store_backend {
        StoreBackend::Postgres => {
            let store =
                PgStore::connect(&config.database_url, config.database_max_connections).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("using in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

pub async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Config::from_env();
    let store = open_store(&config).await?;
    let http = reqwest::Client::new();

    let completion: Arc<dyn CompletionProvider> = match config.openai_api_key.as_deref() {
        Some(key) => Arc::new(
            OpenAiCompletion::new(http.clone(), key, &config.openai_chat_model)
                .with_base_url(&config.openai_base_url),
        ),
        None => {
            warn!("OPENAI_API_KEY not configured; AI replies are disabled");
            Arc::new(DisabledCompletion)
        }
    };
    let sender: Arc<dyn ChannelSender> =
        Arc::new(WhatsAppCloudSender::new(http).with_base_url(&config.whatsapp_graph_base_url));

    let state = AppState::new(&config, store, completion, sender);
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|err| Error::config(format!("failed to bind {addr}: {err}")))?;

    info!(port = config.port, "messaging server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
