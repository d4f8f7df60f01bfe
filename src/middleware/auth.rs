use axum::extract::State;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// Validates a bearer token and extracts claims (HS256 shared secret).
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized)
}

/// Parses the user id out of validated claims.
pub fn user_id_from_claims(claims: &Claims) -> Result<Uuid, AppError> {
    Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized)
}

/// Middleware guarding the REST surface: extracts the bearer token and adds
/// the caller's user id to request extensions. The WebSocket route
/// authenticates at upgrade time instead.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, AppError> {
    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized)?;

    let claims = verify_jwt(token, &state.config.jwt_secret)?;
    let user_id = user_id_from_claims(&claims)?;

    req.extensions_mut().insert(user_id);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: i64,
    }

    fn token_for(sub: &str, secret: &str, exp_offset_secs: i64) -> String {
        let claims = TestClaims {
            sub: sub.to_string(),
            exp: chrono::Utc::now().timestamp() + exp_offset_secs,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_round_trips_user_id() {
        let user = Uuid::new_v4();
        let token = token_for(&user.to_string(), "secret", 3600);
        let claims = verify_jwt(&token, "secret").unwrap();
        assert_eq!(user_id_from_claims(&claims).unwrap(), user);
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let token = token_for(&Uuid::new_v4().to_string(), "secret", 3600);
        assert!(matches!(
            verify_jwt(&token, "other").unwrap_err(),
            AppError::Unauthorized
        ));
    }

    #[test]
    fn expired_token_is_unauthorized() {
        let token = token_for(&Uuid::new_v4().to_string(), "secret", -3600);
        assert!(matches!(
            verify_jwt(&token, "secret").unwrap_err(),
            AppError::Unauthorized
        ));
    }

    #[test]
    fn non_uuid_subject_is_unauthorized() {
        let token = token_for("not-a-uuid", "secret", 3600);
        let claims = verify_jwt(&token, "secret").unwrap();
        assert!(user_id_from_claims(&claims).is_err());
    }
}
