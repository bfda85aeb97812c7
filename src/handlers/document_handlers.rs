//! HTTP handlers for document uploads and object access.
//!
//! Uploads go through the upload-with-rollback saga; its metadata step is the
//! document slot pointer kept by [`DocumentRepository`]. Reads always return
//! decrypted bytes.
//!
//! [`DocumentRepository`]: crate::services::document_repository::DocumentRepository

use crate::{
    errors::{AppError, status_for},
    models::{
        bucket::EntityClass,
        upload::{UploadRequest, UploadedFile},
    },
    services::{pipeline::DownloadedFile, signing::extract_object_key},
    state::AppState,
};
use anyhow::Context;
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Multipart field carrying the document.
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize, Deserialize)]
pub struct SignedUrlResponse {
    pub url: String,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct SignedUrlQuery {
    pub expires: i64,
    pub signature: String,
}

fn parse_class(raw: &str) -> Result<EntityClass, AppError> {
    raw.parse::<EntityClass>().map_err(AppError::not_found)
}

/// POST `/documents/{class}/{entity_id}/{document_name}`: multipart upload
/// into a document slot. A file already linked to the slot is superseded.
pub async fn upload_document(
    State(state): State<AppState>,
    Path((class, entity_id, document_name)): Path<(String, String, String)>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let class = parse_class(&class)?;
    let file = read_file_field(&mut multipart).await?;

    let previous = state
        .documents
        .find(class, &entity_id, &document_name)
        .await?;
    let request = UploadRequest {
        entity_id: entity_id.clone(),
        document_name: document_name.clone(),
        file,
        previous_file_reference: previous.map(|record| record.file_url),
    };

    let documents = state.documents.clone();
    let bucket = state.pipeline.gateway().bucket_name(class).to_string();
    let result = state
        .pipeline
        .upload_with_rollback(class, request, |url| async move {
            let key = extract_object_key(&url, &bucket)
                .with_context(|| format!("signed URL does not point into `{bucket}`"))?;
            documents
                .link(class, &entity_id, &document_name, &key, &url)
                .await
                .context("linking document slot")?;
            Ok::<_, anyhow::Error>(())
        })
        .await;

    let status = match result.failure_kind {
        None => StatusCode::CREATED,
        Some(kind) => status_for(kind),
    };
    Ok((status, Json(result)).into_response())
}

async fn read_file_field(multipart: &mut Multipart) -> Result<Option<UploadedFile>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let mime_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|err| AppError::new(err.status(), err.body_text()))?;
        return Ok(Some(UploadedFile {
            file_name,
            mime_type,
            data,
        }));
    }
    Ok(None)
}

/// GET `/objects/{class}/{*key}`: decrypted object body.
pub async fn get_object(
    State(state): State<AppState>,
    Path((class, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let class = parse_class(&class)?;
    let file = state.pipeline.download(class, &key).await?;
    Ok(file_response(file))
}

/// DELETE `/objects/{class}/{*key}`: removes the object and any slot
/// pointing at it.
pub async fn delete_object(
    State(state): State<AppState>,
    Path((class, key)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let class = parse_class(&class)?;
    state.pipeline.delete(class, &key).await?;
    state.documents.unlink_object(class, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/urls/{class}/{*key}`: fresh signed URL for an existing object.
pub async fn issue_url(
    State(state): State<AppState>,
    Path((class, key)): Path<(String, String)>,
) -> Result<Json<SignedUrlResponse>, AppError> {
    let class = parse_class(&class)?;
    let url = state.pipeline.issue_signed_url(class, &key).await?;
    Ok(Json(SignedUrlResponse {
        url,
        expires_in: state.pipeline.config().signed_url_ttl.as_secs(),
    }))
}

/// GET `/signed/{bucket}/{*key}?expires=&signature=`: serve an object to the
/// holder of a valid signed URL.
pub async fn get_signed(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<SignedUrlQuery>,
) -> Result<Response, AppError> {
    if !state
        .signer
        .verify(&bucket, &key, query.expires, &query.signature)
    {
        return Err(AppError::forbidden("signed URL is invalid or has expired"));
    }
    let class = state
        .pipeline
        .gateway()
        .buckets()
        .class_for(&bucket)
        .ok_or_else(|| AppError::not_found(format!("bucket `{bucket}` not found")))?;

    let file = state.pipeline.download(class, &key).await?;
    Ok(file_response(file))
}

fn file_response(file: DownloadedFile) -> Response {
    let content_type = file
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let length = HeaderValue::from(file.data.len());

    let mut response = Response::new(Body::from(file.data));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, length);
    response
}
