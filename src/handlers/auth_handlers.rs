//! Registration, login, logout and the public salt lookup.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::{
    errors::AppError,
    models::{Principal, Role},
    services::{principals::SaltInfo, sessions::Caller},
    state::AppState,
};

#[derive(Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub principal: Principal,
}

/// `POST /auth/register`
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<impl IntoResponse, AppError> {
    let principal = state
        .principals
        .register(&body.username, body.password, Role::Ordinary)
        .await?;
    Ok((StatusCode::CREATED, Json(principal)))
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<Json<LoginResponse>, AppError> {
    let outcome = state.principals.login(&body.username, body.password).await?;
    Ok(Json(LoginResponse {
        token: outcome.token.as_str().to_string(),
        principal: outcome.principal,
    }))
}

/// `POST /auth/logout`: ends the session and forgets its key.
pub async fn logout(State(state): State<AppState>, caller: Caller) -> Result<StatusCode, AppError> {
    let Some(token) = caller.session() else {
        return Err(AppError::unauthorized("not logged in"));
    };
    state.principals.logout(token);
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /auth/salt/{username}`
pub async fn salt(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<SaltInfo>, AppError> {
    Ok(Json(state.principals.salt_for(&username).await?))
}
