#![allow(dead_code)]

use document_vault::{
    db,
    models::bucket::BucketNames,
    services::{
        cipher::AesGcmCipher, pipeline::PipelineConfig, signing::UrlSigner,
        storage_service::LocalObjectStore,
    },
    state::AppState,
};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::sync::Arc;
use tempfile::TempDir;

pub const BASE_URL: &str = "http://localhost:3000";
pub const PDF: &[u8] = b"%PDF-1.4\n";

pub async fn memory_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    Arc::new(pool)
}

/// Fully wired state over an in-memory database and a temp directory, with
/// both default buckets created.
pub async fn app_state(config: PipelineConfig) -> (AppState, TempDir) {
    let db = memory_pool().await;
    let dir = TempDir::new().unwrap();
    let signer = UrlSigner::new(b"integration-secret", BASE_URL).unwrap();

    let buckets = BucketNames::default();
    let store = LocalObjectStore::new(db.clone(), dir.path(), signer.clone());
    store.create_bucket(&buckets.technician).await.unwrap();
    store.create_bucket(&buckets.company).await.unwrap();

    let state = AppState::local(
        db,
        dir.path(),
        signer,
        Arc::new(AesGcmCipher::generate()),
        buckets,
        config,
    );
    (state, dir)
}
