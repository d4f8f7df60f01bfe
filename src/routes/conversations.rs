use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation_key::ConversationKey;
use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::{ConversationSummary, MessageRecord};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct OpenConversationRequest {
    pub other_user_id: Uuid,
}

#[derive(Serialize)]
pub struct ConversationResponse {
    pub conversation_key: ConversationKey,
    pub last_message: Option<MessageRecord>,
}

/// POST /api/v1/conversations/open
///
/// Validates the pairing and returns the canonical key plus the thread's
/// last message. Creates nothing: the conversation exists once its first
/// message does.
pub async fn open_conversation(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<OpenConversationRequest>,
) -> Result<Json<ConversationResponse>, AppError> {
    let (conversation_key, last_message) = state
        .conversations
        .open_or_create(user.id, body.other_user_id)
        .await?;
    Ok(Json(ConversationResponse {
        conversation_key,
        last_message,
    }))
}

/// GET /api/v1/conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    user: User,
) -> Result<Json<Vec<ConversationSummary>>, AppError> {
    let summaries = state.conversations.list_for_user(user.id).await?;
    Ok(Json(summaries))
}

/// GET /api/v1/conversations/:key
pub async fn get_conversation(
    State(state): State<AppState>,
    user: User,
    Path(key): Path<String>,
) -> Result<Json<ConversationResponse>, AppError> {
    let (conversation_key, last_message) = state.conversations.get(user.id, &key).await?;
    Ok(Json(ConversationResponse {
        conversation_key,
        last_message,
    }))
}

#[derive(Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /api/v1/conversations/:key/messages — chronological, paginated.
pub async fn get_message_history(
    State(state): State<AppState>,
    user: User,
    Path(key): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<MessageRecord>>, AppError> {
    let page = state
        .conversations
        .history(user.id, &key, params.limit, params.offset)
        .await?;
    Ok(Json(page))
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub raw_key: String,
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub conversation_key: ConversationKey,
}

/// POST /api/v1/conversations/resolve
///
/// Recovery path for ambiguous keys: derives the canonical key from the
/// caller's message history with the opaque id.
pub async fn resolve_conversation(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, AppError> {
    let conversation_key = state
        .conversations
        .resolve_conversation(user.id, &body.raw_key)
        .await?;
    Ok(Json(ResolveResponse { conversation_key }))
}
