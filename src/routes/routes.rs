//! Defines the HTTP routes of the document service.
//!
//! ## Structure
//! - **Health**
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **Documents**
//!   - `POST   /documents/{class}/{entity_id}/{document_name}`: multipart upload into a slot
//!
//! - **Objects** (`{class}` is `technician` or `company`)
//!   - `GET    /objects/{class}/{*key}`: download (decrypted)
//!   - `DELETE /objects/{class}/{*key}`: delete
//!   - `GET    /urls/{class}/{*key}`: issue a fresh signed URL
//!   - `GET    /signed/{bucket}/{*key}?expires=&signature=`: signed download
//!
//! The wildcard `*key` covers keys like `T1/CERT_1700000000000_a1b2c3d4e.pdf`.

use crate::{
    handlers::{
        document_handlers::{delete_object, get_object, get_signed, issue_url, upload_document},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Request body ceiling: the largest accepted upload plus multipart framing.
const BODY_LIMIT_BYTES: usize = 12 * 1024 * 1024;

/// Build the router. Handlers share [`AppState`].
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/documents/{class}/{entity_id}/{document_name}",
            post(upload_document),
        )
        .route("/objects/{class}/{*key}", get(get_object).delete(delete_object))
        .route("/urls/{class}/{*key}", get(issue_url))
        .route("/signed/{bucket}/{*key}", get(get_signed))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
}
