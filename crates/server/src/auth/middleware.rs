//! # Caller Identification
//!
//! Resolves who is making a request. A valid `Authorization: Bearer <jwt>` header
//! identifies an authenticated user; otherwise an `X-Session-Id` header identifies an
//! anonymous session. Requests carrying neither are rejected with `401`.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use core_access::{get_or_create_user, Caller};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::state::AppState;

pub const SESSION_HEADER: &str = "x-session-id";
const MAX_SESSION_ID_LEN: usize = 128;

/// Represents the claims we expect to find in the JWT.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// The subject of the token, which we use as the unique user identifier.
    pub sub: String,
    /// The expiration timestamp.
    pub exp: usize,
}

/// An Axum extractor that provides the caller a request acts on behalf of.
#[derive(Debug, Clone)]
pub struct CallerIdentity(pub Caller);

/// A custom rejection type for authentication failures.
pub struct AuthError(StatusCode, String);

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl FromRequestParts<AppState> for CallerIdentity {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let bearer_header =
            Option::<TypedHeader<Authorization<Bearer>>>::from_request_parts(parts, state)
                .await
                .map_err(|e| {
                    warn!("Unexpected error during header extraction: {}", e);
                    AuthError(
                        StatusCode::BAD_REQUEST,
                        "Invalid Authorization header format.".to_string(),
                    )
                })?;

        if let Some(TypedHeader(Authorization(bearer))) = bearer_header {
            // `Validation::default()` checks `exp`.
            let token_data = decode::<Claims>(
                bearer.token(),
                &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
                &Validation::default(),
            )
            .map_err(|e| {
                warn!("JWT validation failed: {}", e);
                AuthError(
                    StatusCode::UNAUTHORIZED,
                    "Invalid or expired token.".to_string(),
                )
            })?;

            let user = get_or_create_user(&state.sqlite_provider.db, &token_data.claims.sub)
                .await
                .map_err(|e| {
                    error!("Failed to get or create user: {}", e);
                    AuthError(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Could not retrieve user.".to_string(),
                    )
                })?;
            return Ok(CallerIdentity(user.caller()));
        }

        let session = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim);
        match session {
            Some(id) if is_valid_session_id(id) => {
                debug!(session_id = %id, "Anonymous session request.");
                Ok(CallerIdentity(Caller::session(id)))
            }
            Some(_) => Err(AuthError(
                StatusCode::BAD_REQUEST,
                "Invalid X-Session-Id header.".to_string(),
            )),
            None => Err(AuthError(
                StatusCode::UNAUTHORIZED,
                "A bearer token or X-Session-Id header is required.".to_string(),
            )),
        }
    }
}
