use armada_core::identity::{Identity, IdentityProvider};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the numeric id of the acting user.
pub const USER_HEADER: &str = "x-armada-user";

/// The caller, resolved fresh through the identity provider on every request.
#[derive(Debug, Clone)]
pub struct Actor(pub Identity);

impl FromRequestParts<AppState> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized(format!("missing {USER_HEADER} header")))?;
        let user_id: u64 = raw
            .trim()
            .parse()
            .map_err(|_| AppError::unauthorized(format!("invalid {USER_HEADER} header '{raw}'")))?;
        let identity = state
            .armada
            .identities
            .resolve(user_id)
            .map_err(|_| AppError::unauthorized(format!("unknown user {user_id}")))?;
        Ok(Actor(identity))
    }
}
