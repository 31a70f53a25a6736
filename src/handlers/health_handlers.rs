//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and disk I/O

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use tracing::{error, warn};
use uuid::Uuid;

use crate::state::AppState;

/// `GET /healthz`
///
/// Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. `SELECT 1` against SQLite.
/// 2. Write/read/delete of a scratch file in the upload directory.
///
/// HTTP 200 when all checks pass, 503 otherwise. Failure details go to the
/// log; the response only carries a fixed reason per check.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite = sqlite_status(state.metadata.ping().await);
    let disk = check_disk(state.vault.store().root()).await;
    let overall_ok = sqlite.ok && disk.ok;

    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite);
    checks.insert("disk", disk);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

fn sqlite_status(ping: Result<bool, sqlx::Error>) -> CheckStatus {
    match ping {
        Ok(true) => CheckStatus::passed(),
        Ok(false) => {
            error!("readiness: SELECT 1 returned an unexpected row");
            CheckStatus::failed("unexpected result")
        }
        Err(e) => {
            error!("readiness: database check failed: {e}");
            CheckStatus::failed("database unavailable")
        }
    }
}

async fn check_disk(root: &Path) -> CheckStatus {
    // Leading dot keeps the scratch file out of the object namespace.
    let tmp_path = root.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(e) = fs::write(&tmp_path, b"readyz").await {
        error!("readiness: cannot write {}: {e}", tmp_path.display());
        return CheckStatus::failed("storage not writable");
    }
    let outcome = match fs::read(&tmp_path).await {
        Ok(bytes) if bytes == b"readyz" => CheckStatus::passed(),
        Ok(_) => {
            error!("readiness: {} read back different bytes", tmp_path.display());
            CheckStatus::failed("storage read mismatch")
        }
        Err(e) => {
            error!("readiness: cannot read {}: {e}", tmp_path.display());
            CheckStatus::failed("storage not readable")
        }
    };
    if let Err(e) = fs::remove_file(&tmp_path).await {
        warn!("readiness: cannot remove {}: {e}", tmp_path.display());
    }
    outcome
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Debug, Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<&'static str>,
}

impl CheckStatus {
    fn passed() -> Self {
        Self { ok: true, error: None }
    }

    fn failed(reason: &'static str) -> Self {
        Self {
            ok: false,
            error: Some(reason),
        }
    }
}
