//! Defines the HTTP surface.
//!
//! ## Structure
//! - **Auth**: `POST /auth/register`, `POST /auth/login`, `POST /auth/logout`,
//!   `GET /auth/salt/{username}`
//! - **Objects**: `POST /files`, `GET /files`, `GET /files/{id}`,
//!   `DELETE /files/{id}`, `GET /api/stats`
//! - **Admin**: `/admin/files…`, `/admin/principals…`
//! - **Health**: `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        admin_handlers, auth_handlers,
        health_handlers::{healthz, readyz},
        object_handlers::{delete_object, get_object, list_objects, stats, upload_object},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Build the router. Upload size is enforced by the vault while streaming,
/// so the framework body limit is disabled for uploads.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // auth
        .route("/auth/register", post(auth_handlers::register))
        .route("/auth/login", post(auth_handlers::login))
        .route("/auth/logout", post(auth_handlers::logout))
        .route("/auth/salt/{username}", get(auth_handlers::salt))
        // objects
        .route(
            "/files",
            post(upload_object)
                .layer(DefaultBodyLimit::disable())
                .get(list_objects),
        )
        .route("/files/{id}", get(get_object).delete(delete_object))
        .route("/api/stats", get(stats))
        // admin
        .route("/admin/files", get(admin_handlers::list_all_objects))
        .route("/admin/files/{id}", delete(admin_handlers::delete_object))
        .route(
            "/admin/files/{id}/download",
            get(admin_handlers::download_raw),
        )
        .route("/admin/principals", get(admin_handlers::list_principals))
        .route(
            "/admin/principals/{id}",
            delete(admin_handlers::delete_principal),
        )
        .route(
            "/admin/principals/{id}/files",
            get(admin_handlers::list_principal_objects),
        )
        .route(
            "/admin/principals/{id}/toggle",
            post(admin_handlers::toggle_principal),
        )
        .route(
            "/admin/principals/{id}/role",
            post(admin_handlers::change_role),
        )
}
