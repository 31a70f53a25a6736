//! `Caller` extractor: resolves the bearer token to a live session.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use crate::{
    errors::AppError,
    services::sessions::{Caller, SessionToken},
    state::AppState,
};

/// Requests without an `Authorization` header are anonymous; a token that
/// does not name a live session is rejected rather than downgraded.
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
            return Ok(Caller::Anonymous);
        };
        let token = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::unauthorized("malformed authorization header"))?;

        let token = SessionToken::from(token.to_string());
        let info = state
            .sessions
            .get(&token)
            .ok_or_else(|| AppError::unauthorized("session expired, please log in again"))?;
        Ok(info.into_caller(token))
    }
}
