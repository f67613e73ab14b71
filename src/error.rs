use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by ingestion, resolution and reply generation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller supplied a missing or empty required field (web chat only).
    #[error("{message}")]
    ClientInput { message: String },

    /// Unknown store, config or conversation.
    #[error("{what} not found")]
    NotFound { what: String },

    /// A unique key was already taken by a concurrent writer.
    #[error("duplicate record for {key}")]
    Conflict { key: String },

    /// The record store rejected an operation.
    #[error("store operation failed: {0}")]
    Store(#[source] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Outbound channel delivery failed or returned no message id.
    #[error("delivery failed: {message}")]
    Upstream { message: String },

    /// The completion provider errored or timed out.
    #[error("completion failed: {message}")]
    Completion { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub fn client_input(message: impl std::fmt::Display) -> Self {
        Self::ClientInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound {
            what: what.to_string(),
        }
    }

    #[must_use]
    pub fn conflict(key: impl std::fmt::Display) -> Self {
        Self::Conflict {
            key: key.to_string(),
        }
    }

    #[must_use]
    pub fn upstream(message: impl std::fmt::Display) -> Self {
        Self::Upstream {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn completion(message: impl std::fmt::Display) -> Self {
        Self::Completion {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn config(message: impl std::fmt::Display) -> Self {
        Self::Config {
            message: message.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::ClientInput { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Upstream { .. } | Self::Completion { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        // 23505 = unique_violation
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some("23505") {
                return Self::conflict(db.constraint().unwrap_or("unique key"));
            }
        }
        Self::Store(err)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(
            Error::client_input("sessionId is required").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::not_found("store s1").status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn not_found_message_names_the_record() {
        assert_eq!(Error::not_found("store s9").to_string(), "store s9 not found");
    }

    #[test]
    fn conflict_is_detectable() {
        assert!(Error::conflict("conversations_key").is_conflict());
        assert!(!Error::upstream("timeout").is_conflict());
    }
}
