//! One actor per connection.
//!
//! The connection authenticates at upgrade time, then walks an explicit
//! state machine: `Authenticated → Joined → Closed`. Each inbound frame is a
//! switch over (state, event); outbound traffic drains an mpsc queue the
//! registry writes into. Inbound events are handled sequentially, which is
//! what gives one sender FIFO ordering within a conversation.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use uuid::Uuid;

use crate::conversation_key::ConversationKey;
use crate::error::AppError;
use crate::metrics;
use crate::middleware::auth::{user_id_from_claims, verify_jwt};
use crate::services::message_service::SendInput;
use crate::state::AppState;
use crate::websocket::events::WsOutboundEvent;
use crate::websocket::message_types::WsInboundEvent;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

fn bearer_token(params: &WsParams, headers: &HeaderMap) -> Option<String> {
    params.token.clone().or_else(|| {
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.to_string())
    })
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Connecting → Authenticated happens here; a bad credential terminates
    // the handshake with an auth error, not a retryable close.
    let user_id = match bearer_token(&params, &headers)
        .ok_or(AppError::Unauthorized)
        .and_then(|token| verify_jwt(&token, &state.config.jwt_secret))
        .and_then(|claims| user_id_from_claims(&claims))
    {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!(error = %e, "websocket connection rejected at upgrade");
            return e.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(state, user_id, socket))
}

enum LoopAction {
    Outbound(Option<Message>),
    Inbound(Option<Result<Message, axum::Error>>),
}

async fn handle_socket(state: AppState, user_id: Uuid, socket: WebSocket) {
    metrics::WS_ACTIVE_CONNECTIONS.inc();
    info!(%user_id, "websocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Authenticated until the first accepted join; Joined afterwards. The
    // outbound queue only exists while joined.
    let mut joined_key: Option<ConversationKey> = None;
    let mut outbound: Option<UnboundedReceiver<Message>> = None;

    loop {
        let action = tokio::select! {
            maybe = async {
                match outbound.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => LoopAction::Outbound(maybe),
            incoming = receiver.next() => LoopAction::Inbound(incoming),
        };

        match action {
            LoopAction::Outbound(Some(msg)) => {
                if sender.send(msg).await.is_err() {
                    break;
                }
            }
            // Registry dropped our queue; treat as closed.
            LoopAction::Outbound(None) => break,
            LoopAction::Inbound(Some(Ok(Message::Text(text)))) => {
                match handle_frame(&state, user_id, joined_key, &text).await {
                    FrameResult::Joined(key, rx) => {
                        joined_key = Some(key);
                        outbound = Some(rx);
                    }
                    FrameResult::Reply(event) => {
                        if sender.send(event.to_ws_message()).await.is_err() {
                            break;
                        }
                    }
                    FrameResult::Continue => {}
                }
            }
            LoopAction::Inbound(Some(Ok(Message::Close(_)))) | LoopAction::Inbound(None) => break,
            LoopAction::Inbound(Some(Ok(_))) => {}
            LoopAction::Inbound(Some(Err(_))) => break,
        }
    }

    // Dropping the connection drops its registry sender; pruning happens on
    // the next fanout. If the user was mid-typing their flag expires on the
    // debounce clock.
    metrics::WS_ACTIVE_CONNECTIONS.dec();
    info!(%user_id, "websocket closed");
}

enum FrameResult {
    /// Join accepted: switch to the new conversation's outbound queue.
    Joined(ConversationKey, UnboundedReceiver<Message>),
    /// An event for this connection only (ack or error).
    Reply(WsOutboundEvent),
    /// Handled; nothing to write back on this connection directly.
    Continue,
}

async fn handle_frame(
    state: &AppState,
    user_id: Uuid,
    joined: Option<ConversationKey>,
    text: &str,
) -> FrameResult {
    let event: WsInboundEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            return FrameResult::Reply(WsOutboundEvent::Error {
                code: "malformed-event".into(),
                message: format!("unrecognized event: {e}"),
                retry_after_secs: None,
            });
        }
    };

    match event {
        WsInboundEvent::Join { conversation_key } => {
            match authorize_join(state, user_id, &conversation_key).await {
                Ok(key) => {
                    let outbound = state.registry.add_subscriber(key, user_id).await;
                    info!(%user_id, conversation = %key, "joined conversation");
                    FrameResult::Joined(key, outbound)
                }
                Err(e) => FrameResult::Reply(WsOutboundEvent::from_error(&e)),
            }
        }
        WsInboundEvent::SendMessage {
            conversation_key,
            text,
            image_url,
        } => {
            let Some(key) = require_joined(joined, &conversation_key) else {
                return not_joined_reply();
            };
            match state
                .messages
                .send(SendInput {
                    conversation_key: key,
                    sender_id: user_id,
                    text,
                    image_url,
                })
                .await
            {
                Ok(record) => FrameResult::Reply(WsOutboundEvent::MessageSentAck { message: record }),
                Err(e) => FrameResult::Reply(WsOutboundEvent::from_error(&e)),
            }
        }
        WsInboundEvent::Typing {
            conversation_key,
            is_typing,
        } => {
            let Some(key) = require_joined(joined, &conversation_key) else {
                return not_joined_reply();
            };
            state.presence.set_typing(key, user_id, is_typing).await;
            FrameResult::Continue
        }
        WsInboundEvent::MarkRead {
            conversation_key,
            message_ids,
        } => {
            let Some(key) = require_joined(joined, &conversation_key) else {
                return not_joined_reply();
            };
            match state.presence.mark_read(key, user_id, &message_ids).await {
                Ok(_) => FrameResult::Continue,
                Err(e) => FrameResult::Reply(WsOutboundEvent::from_error(&e)),
            }
        }
    }
}

/// Join requires the key to parse, the caller to be an endpoint, and the
/// pairing to be valid (one client, one professional).
async fn authorize_join(
    state: &AppState,
    user_id: Uuid,
    raw_key: &str,
) -> Result<ConversationKey, AppError> {
    let key = state.conversations.authorize_key(raw_key, user_id)?;
    let (a, b) = key.participants();
    state.conversations.validate_pairing(a, b).await?;
    Ok(key)
}

/// Events other than join are only legal on the joined conversation.
fn require_joined(joined: Option<ConversationKey>, raw_key: &str) -> Option<ConversationKey> {
    let joined = joined?;
    match ConversationKey::parse(raw_key) {
        Ok(key) if key == joined => Some(key),
        _ => None,
    }
}

fn not_joined_reply() -> FrameResult {
    FrameResult::Reply(WsOutboundEvent::Error {
        code: "not-joined".into(),
        message: "join the conversation before sending events for it".into(),
        retry_after_secs: None,
    })
}
