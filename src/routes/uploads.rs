use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::guards::User;
use crate::ratelimit::OpClass;
use crate::state::AppState;

const ALLOWED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif"];

#[derive(Deserialize)]
pub struct CreateUploadRequest {
    pub file_name: String,
    pub content_type: String,
    pub byte_len: u64,
}

#[derive(Serialize)]
pub struct CreateUploadResponse {
    pub url: String,
}

/// POST /api/v1/uploads
///
/// Validates type and size, consumes the upload rate class, and returns the
/// opaque URL the message can reference. The bytes go to the storage tier
/// directly; they never pass through this service.
pub async fn create_upload(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<CreateUploadRequest>,
) -> Result<(StatusCode, Json<CreateUploadResponse>), AppError> {
    state.rate_limiter.enforce(OpClass::Upload, user.id).await?;

    let content_type = body.content_type.trim().to_ascii_lowercase();
    if !ALLOWED_IMAGE_TYPES.contains(&content_type.as_str()) {
        return Err(AppError::Validation(format!(
            "unsupported image type {content_type}"
        )));
    }
    if body.byte_len == 0 || body.byte_len > state.config.max_upload_bytes {
        return Err(AppError::Validation(format!(
            "image size must be between 1 and {} bytes",
            state.config.max_upload_bytes
        )));
    }

    let url = state
        .uploads
        .store_image(user.id, body.file_name.trim(), &content_type)
        .await?;

    Ok((StatusCode::CREATED, Json(CreateUploadResponse { url })))
}
