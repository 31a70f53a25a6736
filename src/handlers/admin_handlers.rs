//! Administrator endpoints. Every handler requires an administrator caller;
//! the services enforce it, so these stay thin.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    errors::AppError,
    handlers::object_handlers::attachment_response,
    models::{Principal, Role, StoredObject},
    services::sessions::Caller,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct RoleChange {
    pub role: Role,
}

fn require_admin(caller: &Caller) -> Result<(), AppError> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(AppError::forbidden("administrator role required"))
    }
}

/// `GET /admin/files`
pub async fn list_all_objects(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<StoredObject>>, AppError> {
    Ok(Json(state.vault.list_all(&caller).await?))
}

/// `GET /admin/principals`
pub async fn list_principals(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<Principal>>, AppError> {
    require_admin(&caller)?;
    Ok(Json(state.principals.list().await?))
}

/// `GET /admin/principals/{id}/files`
pub async fn list_principal_objects(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<StoredObject>>, AppError> {
    Ok(Json(state.vault.list_for_principal(&caller, id).await?))
}

/// `POST /admin/principals/{id}/toggle`
pub async fn toggle_principal(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Principal>, AppError> {
    Ok(Json(state.principals.toggle_enabled(&caller, id).await?))
}

/// `POST /admin/principals/{id}/role`
pub async fn change_role(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<RoleChange>,
) -> Result<Json<Principal>, AppError> {
    Ok(Json(state.principals.set_role(&caller, id, body.role).await?))
}

/// `DELETE /admin/principals/{id}`: removes the principal and their objects.
pub async fn delete_principal(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.principals.delete(&caller, id, &state.vault).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /admin/files/{id}/download`: the bytes exactly as stored.
pub async fn download_raw(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let mut download = state.vault.download_raw(&caller, id).await?;
    let suffix = download.object.encryption_mode.physical_suffix();
    download.object.logical_name.push_str(suffix);
    download.object.content_type = Some("application/octet-stream".into());
    Ok(attachment_response(download))
}

/// `DELETE /admin/files/{id}`
pub async fn delete_object(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    require_admin(&caller)?;
    state.vault.delete(&caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
