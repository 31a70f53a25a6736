use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;
use tracing::{error, warn};

use crate::{crypto::CipherError, services::object_store::StoreError};

/// Failures of the vault core.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("key material must be exactly 32 bytes, got {len}")]
    InvalidKeyMaterial { len: usize },
    #[error("no encryption key available for this request")]
    KeyUnavailable,
    #[error("stored container is shorter than its nonce prefix")]
    MalformedContainer,
    #[error("stored container failed authentication")]
    AuthenticationFailed,
    #[error("storage failure: {0}")]
    StorageFailure(#[source] io::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("access denied")]
    AccessDenied,
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("upload is empty")]
    EmptyUpload,
    #[error("upload exceeds the limit of {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("{0}")]
    Conflict(String),
    #[error("key derivation failed: {0}")]
    Kdf(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type VaultResult<T> = Result<T, VaultError>;

impl From<CipherError> for VaultError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::InvalidKeyMaterial { len } => VaultError::InvalidKeyMaterial { len },
            CipherError::MalformedContainer => VaultError::MalformedContainer,
            CipherError::AuthenticationFailed => VaultError::AuthenticationFailed,
            CipherError::LimitExceeded => VaultError::StorageFailure(io::Error::new(
                io::ErrorKind::InvalidInput,
                "stream exceeds the single-nonce limit",
            )),
            CipherError::Kdf(msg) => VaultError::Kdf(msg),
            CipherError::Io(err) => VaultError::StorageFailure(err),
        }
    }
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => VaultError::NotFound(format!("object `{name}`")),
            StoreError::AlreadyExists(name) => VaultError::AlreadyExists(format!("object `{name}`")),
            StoreError::InvalidName(name) => VaultError::InvalidName(name),
            StoreError::Io(err) => VaultError::StorageFailure(err),
        }
    }
}

impl From<io::Error> for VaultError {
    fn from(err: io::Error) -> Self {
        VaultError::StorageFailure(err)
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!("unhandled error: {err:#}");
        AppError::internal("internal server error")
    }
}

/// Each variant gets a fixed client message; details stay in the server log.
impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::InvalidKeyMaterial { .. } | VaultError::Kdf(_) => {
                error!("key material problem: {err}");
                AppError::internal("server encryption key is misconfigured")
            }
            VaultError::KeyUnavailable => AppError::unauthorized(
                "encryption key unavailable, please re-authenticate",
            ),
            VaultError::MalformedContainer | VaultError::AuthenticationFailed => {
                warn!("integrity failure: {err}");
                AppError::internal("stored object failed an integrity check")
            }
            VaultError::StorageFailure(ref io_err) => {
                error!("storage failure: {io_err}");
                AppError::internal("storage failure")
            }
            VaultError::NotFound(_) => AppError::new(StatusCode::NOT_FOUND, "not found"),
            VaultError::AccessDenied => AppError::forbidden("access denied"),
            VaultError::AlreadyExists(_) => AppError::new(StatusCode::CONFLICT, "already exists"),
            VaultError::InvalidName(_) => AppError::bad_request(err.to_string()),
            VaultError::EmptyUpload => AppError::bad_request("upload is empty"),
            VaultError::TooLarge { limit } => AppError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("upload exceeds the limit of {limit} bytes"),
            ),
            VaultError::InvalidCredentials => {
                AppError::unauthorized("invalid username or password")
            }
            VaultError::Conflict(msg) => AppError::new(StatusCode::CONFLICT, msg),
            VaultError::Database(ref db_err) => {
                error!("database error: {db_err}");
                AppError::internal("database error")
            }
        }
    }
}
