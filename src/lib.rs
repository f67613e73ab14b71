//! Conversation ingestion and AI-escalation engine for storefront messaging.
//!
//! Inbound WhatsApp webhooks and web chat posts are normalized, attached to
//! one conversation per contact, checked against escalation keywords and,
//! while the AI owns the conversation, answered in the background.

pub mod app;
pub mod completion;
pub mod config;
pub mod error;
pub mod escalation;
pub mod ingest;
pub mod normalize;
pub mod prompting;
pub mod reply;
pub mod resolver;
pub mod status;
pub mod store;
pub mod types;
pub mod whatsapp;

pub use error::{Error, Result};
