//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness: DB connectivity, configured buckets and disk I/O

use crate::{models::bucket::EntityClass, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Liveness probe. Never performs I/O.
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
/// Returns JSON describing each check. HTTP 200 when all checks pass,
/// HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = HashMap::new();
    checks.insert("sqlite", check_sqlite(&state).await);
    checks.insert("buckets", check_buckets(&state).await);
    checks.insert("disk", check_disk(&state.storage_dir).await);

    let ready = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if ready { "ok".into() } else { "error".into() },
        checks,
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn check_sqlite(state: &AppState) -> CheckStatus {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    }
}

/// Both entity-class buckets must exist, otherwise every upload for that
/// class fails as misconfigured.
async fn check_buckets(state: &AppState) -> CheckStatus {
    let names = state.pipeline.gateway().buckets();
    let mut missing = Vec::new();
    for class in EntityClass::ALL {
        let name = names.name_for(class);
        let found = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM buckets WHERE name = ?")
            .bind(name)
            .fetch_one(&*state.db)
            .await;
        match found {
            Ok(0) => missing.push(name.to_string()),
            Ok(_) => {}
            Err(e) => return CheckStatus::failed(format!("error: {}", e)),
        }
    }
    if missing.is_empty() {
        CheckStatus::ok()
    } else {
        CheckStatus::failed(format!("missing buckets: {}", missing.join(", ")))
    }
}

/// Write, read back and remove a probe file under the storage directory.
async fn check_disk(dir: &Path) -> CheckStatus {
    let probe = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(e) = fs::write(&probe, b"readyz").await {
        return CheckStatus::failed(format!("could not write probe file: {}", e));
    }
    let read = fs::read(&probe).await;
    let removed = fs::remove_file(&probe).await;
    match (read, removed) {
        (Ok(bytes), _) if bytes != b"readyz" => CheckStatus::failed("probe content mismatch"),
        (Ok(_), Ok(())) => CheckStatus::ok(),
        (Ok(_), Err(e)) => CheckStatus {
            ok: true,
            error: Some(format!("could not remove probe file: {}", e)),
        },
        (Err(e), _) => CheckStatus::failed(format!("could not read probe file: {}", e)),
    }
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

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
