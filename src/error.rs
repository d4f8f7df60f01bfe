use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("invalid pairing: {0}")]
    InvalidPairing(String),

    #[error("malformed conversation key: {0}")]
    MalformedKey(String),

    #[error("ambiguous conversation key: {0}")]
    AmbiguousKey(String),

    #[error("conversation could not be resolved from message history")]
    Unresolvable,

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("counter backend error: {0}")]
    Counter(String),

    #[error("notification channel degraded: {0}")]
    DeliveryDegraded(String),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidPairing(_) | AppError::MalformedKey(_) | AppError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::AmbiguousKey(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound | AppError::Unresolvable => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code, shared by the REST error body and the
    /// WebSocket `error` event.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::StartServer(_) => "start-server",
            AppError::InvalidPairing(_) => "invalid-pairing",
            AppError::MalformedKey(_) => "malformed-key",
            AppError::AmbiguousKey(_) => "ambiguous-key",
            AppError::Unresolvable => "unresolvable",
            AppError::RateLimited { .. } => "rate-limited",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::NotFound => "not-found",
            AppError::Validation(_) => "validation",
            AppError::Database(_) => "database",
            AppError::Counter(_) => "counter-backend",
            AppError::DeliveryDegraded(_) => "delivery-degraded",
            AppError::Internal => "internal",
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AppError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Whether the client may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::RateLimited { .. } | AppError::Counter(_) | AppError::Internal
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // 5xx details stay in the logs, not on the wire
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let mut body = json!({
            "error": self.code(),
            "message": message,
        });
        if let Some(retry_after) = self.retry_after_secs() {
            body["retry_after_secs"] = json!(retry_after);
        }
        if matches!(self, AppError::AmbiguousKey(_)) {
            body["recovery"] = json!("POST /api/v1/conversations/resolve");
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after_secs() {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
