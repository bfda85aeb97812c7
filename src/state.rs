//! Shared handler state.

use crate::{
    models::bucket::BucketNames,
    services::{
        cipher::Cipher,
        document_repository::DocumentRepository,
        gateway::StorageGateway,
        pipeline::{PipelineConfig, UploadPipeline},
        signing::UrlSigner,
        storage_service::LocalObjectStore,
    },
};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<UploadPipeline>,
    pub documents: DocumentRepository,
    /// Verifies incoming signed URLs; must share the secret of the store's signer.
    pub signer: UrlSigner,
    /// Used by the readiness probe.
    pub db: Arc<SqlitePool>,
    pub storage_dir: PathBuf,
}

impl AppState {
    /// Wire the pipeline over the bundled SQLite + disk object store.
    pub fn local(
        db: Arc<SqlitePool>,
        storage_dir: impl Into<PathBuf>,
        signer: UrlSigner,
        cipher: Arc<dyn Cipher>,
        buckets: BucketNames,
        config: PipelineConfig,
    ) -> Self {
        let storage_dir = storage_dir.into();
        let store = LocalObjectStore::new(db.clone(), storage_dir.clone(), signer.clone());
        let gateway = StorageGateway::new(Arc::new(store), buckets);

        Self {
            pipeline: Arc::new(UploadPipeline::new(config, gateway, cipher)),
            documents: DocumentRepository::new(db.clone()),
            signer,
            db,
            storage_dir,
        }
    }
}
