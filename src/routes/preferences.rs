use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::NotificationPreference;
use crate::state::AppState;

/// GET /api/v1/notifications/preferences
pub async fn get_preferences(
    State(state): State<AppState>,
    user: User,
) -> Result<Json<NotificationPreference>, AppError> {
    let prefs = state.preferences.preferences(user.id).await?;
    Ok(Json(prefs))
}

#[derive(Deserialize)]
pub struct UpdatePreferencesRequest {
    pub push_enabled: bool,
    pub email_enabled: bool,
    #[serde(default)]
    pub push_token: Option<String>,
}

/// PUT /api/v1/notifications/preferences
///
/// The only mutation path for the preference document the dispatcher reads.
pub async fn update_preferences(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<UpdatePreferencesRequest>,
) -> Result<Json<NotificationPreference>, AppError> {
    let prefs = NotificationPreference {
        user_id: user.id,
        push_enabled: body.push_enabled,
        email_enabled: body.email_enabled,
        push_token: body.push_token.filter(|t| !t.trim().is_empty()),
    };
    state.preferences.update(prefs.clone()).await?;
    Ok(Json(prefs))
}
