//! HTTP handlers for object operations.
//! Streams bodies in both directions and delegates everything else to
//! `VaultService`.

use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use uuid::Uuid;

use crate::{
    errors::AppError,
    models::{EncryptionMode, StoredObject},
    services::{
        sessions::Caller,
        vault::{Download, UploadRequest},
    },
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub client_encrypted: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub name: String,
    pub size: i64,
    pub encryption_mode: EncryptionMode,
}

impl From<&StoredObject> for UploadResponse {
    fn from(object: &StoredObject) -> Self {
        Self {
            id: object.id,
            name: object.logical_name.clone(),
            size: object.declared_size,
            encryption_mode: object.encryption_mode,
        }
    }
}

/// `POST /files`: multipart upload.
///
/// The first part named `file` is streamed into the vault. A
/// `client_encrypted` part must precede it to take effect; the query flag of
/// the same name works regardless of order.
pub async fn upload_object(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut client_encrypted = query.client_encrypted.unwrap_or(false);
    let expected_size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        match field.name() {
            Some("client_encrypted") => {
                let value = field.text().await.map_err(bad_multipart)?;
                client_encrypted |= matches!(value.trim(), "true" | "1" | "on" | "yes");
            }
            Some("file") => {
                let request = UploadRequest {
                    file_name: field.file_name().unwrap_or_default().to_string(),
                    content_type: field.content_type().map(str::to_string),
                    client_encrypted,
                    expected_size,
                };
                let body = field.map_err(|err| io::Error::new(io::ErrorKind::Other, err));
                let object = state.vault.upload(&caller, request, body).await?;
                return Ok((StatusCode::CREATED, Json(UploadResponse::from(&object))));
            }
            _ => continue,
        }
    }

    Err(AppError::bad_request("multipart body has no `file` part"))
}

/// `GET /files`: the caller's objects, newest first.
pub async fn list_objects(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<StoredObject>>, AppError> {
    Ok(Json(state.vault.list(&caller).await?))
}

/// `GET /files/{id}`: decrypted download.
pub async fn get_object(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let download = state.vault.download(&caller, id).await?;
    Ok(attachment_response(download))
}

/// `DELETE /files/{id}`
pub async fn delete_object(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.vault.delete(&caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/stats`: global for administrators, scoped otherwise.
pub async fn stats(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    let stats = if caller.is_admin() {
        state.vault.global_stats(&caller).await?
    } else {
        state.vault.stats(&caller).await?
    };
    Ok(Json(stats))
}

/// Stream a download as an attachment with an exact `Content-Length`.
pub fn attachment_response(download: Download) -> Response {
    let Download {
        object,
        content_length,
        body,
    } = download;

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();

    let content_type = object
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));

    let disposition = format!(
        "attachment; filename=\"{}\"",
        ascii_filename(&object.logical_name)
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

/// Header-safe rendition of a file name: printable ASCII without quotes or
/// backslashes.
fn ascii_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    if cleaned.trim().is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}

fn bad_multipart(err: MultipartError) -> AppError {
    AppError::new(err.status(), format!("invalid multipart body: {}", err.body_text()))
}
