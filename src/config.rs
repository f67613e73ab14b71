use std::env;
use std::time::Duration;

use crate::completion::{DEFAULT_CHAT_MODEL, DEFAULT_OPENAI_BASE_URL};
use crate::reply::{DEFAULT_COMPLETION_TIMEOUT, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_CONCURRENCY};
use crate::whatsapp::DEFAULT_GRAPH_BASE_URL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Process settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store_backend: StoreBackend,
    pub database_url: String,
    pub database_max_connections: u32,
    pub openai_api_key: Option<String>,
    pub openai_chat_model: String,
    pub openai_base_url: String,
    pub whatsapp_graph_base_url: String,
    pub reply_worker_concurrency: usize,
    pub reply_queue_capacity: usize,
    pub completion_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            store_backend: StoreBackend::Postgres,
            database_url: String::new(),
            database_max_connections: 10,
            openai_api_key: None,
            openai_chat_model: DEFAULT_CHAT_MODEL.to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            whatsapp_graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            reply_worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            reply_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
        }
    }
}

impl Config {
    /// Reads the environment. Unparseable numbers fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let number = |key: &str| text(key).and_then(|v| v.parse::<u64>().ok());

        let store_backend = match text("STORE_BACKEND").as_deref() {
            Some(v) if v.eq_ignore_ascii_case("memory") => StoreBackend::Memory,
            _ => StoreBackend::Postgres,
        };

        Self {
            port: text("PORT")
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(defaults.port),
            store_backend,
            database_url: resolve_database_url(&lookup),
            database_max_connections: number("DATABASE_MAX_CONNECTIONS")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.database_max_connections),
            openai_api_key: text("OPENAI_API_KEY"),
            openai_chat_model: text("OPENAI_CHAT_MODEL").unwrap_or(defaults.openai_chat_model),
            openai_base_url: text("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            whatsapp_graph_base_url: text("WHATSAPP_GRAPH_BASE_URL")
                .unwrap_or(defaults.whatsapp_graph_base_url),
            reply_worker_concurrency: number("REPLY_WORKER_CONCURRENCY")
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.reply_worker_concurrency),
            reply_queue_capacity: number("REPLY_QUEUE_CAPACITY")
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.reply_queue_capacity),
            completion_timeout: number("COMPLETION_TIMEOUT_SECS")
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.completion_timeout),
        }
    }
}

/// `DATABASE_URL`, else a URL assembled from `POSTGRES_*` / `PG*` parts.
fn resolve_database_url(lookup: &impl Fn(&str) -> Option<String>) -> String {
    if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
        return url;
    }
    let part = |primary: &str, fallback: &str, default: &str| {
        lookup(primary)
            .or_else(|| lookup(fallback))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    };
    let host = part("POSTGRES_HOST", "PGHOST", "localhost");
    let port = part("POSTGRES_PORT", "PGPORT", "5432");
    let user = part("POSTGRES_USER", "PGUSER", "postgres");
    let password = part("POSTGRES_PASSWORD", "PGPASSWORD", "postgres");
    let db = part("POSTGRES_DB", "PGDATABASE", "messaging");
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}
