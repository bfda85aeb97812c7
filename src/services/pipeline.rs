//! The document upload pipeline.
//!
//! ```text
//! validate → sanitize → compress → encrypt → allocate key → put → signed URL
//! ```
//!
//! Every call is an independent unit of work; the pipeline holds no mutable
//! state, so concurrent uploads (even for the same document slot) only
//! contend on the object store. Nothing here retries: failures go back to
//! the caller, and a retried upload allocates a fresh key.

use crate::{
    models::{
        bucket::EntityClass,
        object::StoredObject,
        upload::{FailureKind, StoredObjectKey, UploadRequest, UploadResult, UploadedFile},
    },
    services::{
        cipher::Cipher,
        gateway::{GatewayError, StorageGateway},
        key_allocator,
        processing::{CompressionSettings, Compressor, ContentSanitizer, SanitizeOutcome},
        signing::extract_object_key,
        validation::{ValidationError, ValidationPolicy, Validator},
    },
};
use bytes::Bytes;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Lifetime of every signed URL handed out by the pipeline.
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(3600);

/// Feature toggles and tunables, fixed for the lifetime of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub encryption_enabled: bool,
    pub sanitize_images: bool,
    /// Turn a sanitizer decode failure into a validation failure instead of
    /// storing the original bytes.
    pub reject_undecodable_images: bool,
    pub compression_enabled: bool,
    pub jpeg_quality: u8,
    pub compression: CompressionSettings,
    pub validation: ValidationPolicy,
    pub signed_url_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            encryption_enabled: true,
            sanitize_images: true,
            reject_undecodable_images: false,
            compression_enabled: true,
            jpeg_quality: 95,
            compression: CompressionSettings::default(),
            validation: ValidationPolicy::default(),
            signed_url_ttl: SIGNED_URL_TTL,
        }
    }
}

/// Typed failure of a pipeline operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineFailure {
    #[error("invalid file: {0}")]
    Validation(#[from] ValidationError),
    #[error("storage is misconfigured: {0}")]
    Operational(String),
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    NotFound(String),
    #[error("database operation failed, upload was rolled back: {reason}")]
    Commit { key: String, reason: String },
    #[error(
        "database operation failed ({commit_reason}) and rollback of `{key}` failed ({delete_reason}); the stored file is orphaned"
    )]
    Compensation {
        key: String,
        commit_reason: String,
        delete_reason: String,
    },
}

impl PipelineFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineFailure::Validation(_) => FailureKind::Validation,
            PipelineFailure::Operational(_) => FailureKind::Operational,
            PipelineFailure::Transport(_) => FailureKind::Transport,
            PipelineFailure::NotFound(_) => FailureKind::NotFound,
            PipelineFailure::Commit { .. } => FailureKind::Commit,
            PipelineFailure::Compensation { .. } => FailureKind::Compensation,
        }
    }

    /// Key of the object the failure concerns, when one was written.
    pub fn object_key(&self) -> Option<&str> {
        match self {
            PipelineFailure::Commit { key, .. } | PipelineFailure::Compensation { key, .. } => {
                Some(key)
            }
            _ => None,
        }
    }

    pub fn into_result(self) -> UploadResult {
        let key = self.object_key().map(str::to_string);
        UploadResult::failed(self.kind(), self.to_string(), key)
    }
}

impl From<GatewayError> for PipelineFailure {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::BucketMisconfigured { .. } => {
                PipelineFailure::Operational(err.to_string())
            }
            GatewayError::NotFound { .. } => PipelineFailure::NotFound(err.to_string()),
            GatewayError::AlreadyExists { .. } | GatewayError::Transport(_) => {
                PipelineFailure::Transport(err.to_string())
            }
        }
    }
}

/// An object written by the pipeline and its freshly issued URL.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredUpload {
    pub class: EntityClass,
    pub key: StoredObjectKey,
    pub signed_url: String,
    pub object: StoredObject,
}

/// A decrypted object as read back through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub key: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

pub struct UploadPipeline {
    config: PipelineConfig,
    validator: Validator,
    sanitizer: ContentSanitizer,
    compressor: Compressor,
    cipher: Arc<dyn Cipher>,
    gateway: StorageGateway,
}

impl UploadPipeline {
    pub fn new(config: PipelineConfig, gateway: StorageGateway, cipher: Arc<dyn Cipher>) -> Self {
        Self {
            validator: Validator::new(config.validation.clone()),
            sanitizer: ContentSanitizer::new(config.jpeg_quality),
            compressor: Compressor::new(config.compression.clone()),
            config,
            cipher,
            gateway,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn gateway(&self) -> &StorageGateway {
        &self.gateway
    }

    /// Run the full pipeline without a metadata step.
    pub async fn upload(&self, class: EntityClass, request: UploadRequest) -> UploadResult {
        let entity_id = request.entity_id.clone();
        match self.store(class, request).await {
            Ok(upload) => UploadResult::succeeded(upload.key.to_string(), upload.signed_url),
            Err(failure) => {
                audit_rejection(class, &entity_id, &failure);
                failure.into_result()
            }
        }
    }

    /// Validate, transform and persist one upload, then issue its signed URL.
    ///
    /// On success exactly one new object exists. On failure nothing new is
    /// left in the store.
    pub async fn store(
        &self,
        class: EntityClass,
        request: UploadRequest,
    ) -> Result<StoredUpload, PipelineFailure> {
        let UploadRequest {
            entity_id,
            document_name,
            file,
            previous_file_reference,
        } = request;

        self.validator.validate(file.as_ref()).into_result()?;
        let file = file.ok_or(ValidationError::EmptyInput)?;
        let declared_mime = file
            .essence_mime()
            .ok_or(ValidationError::MissingMimeType)?;
        let original_name = file.file_name.clone();
        let original_size = file.data.len();

        let payload = self.prepare_payload(file).await?;

        let key = key_allocator::allocate(&entity_id, &document_name, &original_name)?;
        let key_str = key.to_string();

        if let Some(previous) = previous_file_reference {
            self.discard_previous(class, &previous).await;
        }

        let object = self
            .gateway
            .put(class, &key_str, payload, &declared_mime)
            .await?;

        let signed_url = match self
            .gateway
            .signed_url(class, &key_str, self.config.signed_url_ttl)
            .await
        {
            Ok(url) => url,
            Err(err) => {
                // no URL means no caller can ever reference the object
                if let Err(cleanup) = self.gateway.delete(class, &key_str).await {
                    warn!(bucket = %class, key = %key_str, error = %cleanup, "failed to remove unsigned object");
                }
                return Err(err.into());
            }
        };

        info!(
            bucket = %class,
            entity_id = %entity_id,
            key = %key_str,
            original_size,
            stored_size = object.size_bytes,
            encrypted = self.config.encryption_enabled,
            "document stored"
        );

        Ok(StoredUpload {
            class,
            key,
            signed_url,
            object,
        })
    }

    /// Sanitize, compress and encrypt on the blocking pool.
    async fn prepare_payload(&self, file: UploadedFile) -> Result<Bytes, PipelineFailure> {
        let config = self.config.clone();
        let sanitizer = self.sanitizer.clone();
        let compressor = self.compressor.clone();
        let cipher = Arc::clone(&self.cipher);

        tokio::task::spawn_blocking(move || {
            let file = transform(&config, &sanitizer, &compressor, file)?;
            if !config.encryption_enabled {
                return Ok(file.data);
            }
            cipher
                .encrypt(&file.data)
                .map(Bytes::from)
                .map_err(|e| PipelineFailure::Operational(e.to_string()))
        })
        .await
        .map_err(|e| PipelineFailure::Transport(format!("content processing task failed: {e}")))?
    }

    /// Best-effort removal of a superseded object. Never blocks the upload.
    async fn discard_previous(&self, class: EntityClass, reference: &str) {
        let bucket = self.gateway.bucket_name(class);
        let key = if reference.contains("://") {
            extract_object_key(reference, bucket)
        } else {
            Some(reference.to_string())
        };
        let Some(key) = key else {
            warn!(bucket, reference, "previous file reference not recognised, skipping delete");
            return;
        };

        match self.gateway.delete(class, &key).await {
            Ok(()) => info!(bucket, key = %key, "superseded document deleted"),
            Err(err) => {
                warn!(bucket, key = %key, error = %err, "failed to delete superseded document")
            }
        }
    }

    /// Read an object back, decrypting it if it is stored encrypted.
    pub async fn download(
        &self,
        class: EntityClass,
        key: &str,
    ) -> Result<DownloadedFile, PipelineFailure> {
        let (object, data) = self.gateway.get(class, key).await.map_err(|err| {
            let failure = PipelineFailure::from(err);
            warn!(
                bucket = %class,
                key,
                kind = ?failure.kind(),
                reason = %failure,
                "document read failed"
            );
            failure
        })?;

        let data = if self.cipher.is_encrypted(&data) {
            Bytes::from(self.cipher.decrypt(&data).map_err(|e| {
                error!(bucket = %class, key, error = %e, "stored document could not be decrypted");
                PipelineFailure::Transport(format!("could not decrypt `{key}`: {e}"))
            })?)
        } else {
            data
        };

        debug!(bucket = %class, key, size = data.len(), "document read");
        Ok(DownloadedFile {
            key: object.key,
            content_type: object.content_type,
            data,
        })
    }

    /// Caller-initiated delete.
    pub async fn delete(&self, class: EntityClass, key: &str) -> Result<(), PipelineFailure> {
        self.gateway.delete(class, key).await.map_err(|err| {
            let failure = PipelineFailure::from(err);
            warn!(
                bucket = %class,
                key,
                kind = ?failure.kind(),
                reason = %failure,
                "document delete failed"
            );
            failure
        })?;
        info!(bucket = %class, key, "document deleted");
        Ok(())
    }

    /// Issue a new signed URL for an existing object.
    pub async fn issue_signed_url(
        &self,
        class: EntityClass,
        key: &str,
    ) -> Result<String, PipelineFailure> {
        Ok(self
            .gateway
            .signed_url(class, key, self.config.signed_url_ttl)
            .await?)
    }
}

fn transform(
    config: &PipelineConfig,
    sanitizer: &ContentSanitizer,
    compressor: &Compressor,
    file: UploadedFile,
) -> Result<UploadedFile, PipelineFailure> {
    let file = if config.sanitize_images {
        let sanitized = sanitizer.sanitize(file);
        match sanitized.outcome {
            SanitizeOutcome::DecodeFailed(reason) if config.reject_undecodable_images => {
                return Err(ValidationError::UndecodableImage(reason).into());
            }
            SanitizeOutcome::DecodeFailed(reason) => {
                warn!(file = %sanitized.file.file_name, %reason, "image not sanitized, storing original bytes");
                sanitized.file
            }
            SanitizeOutcome::Reencoded | SanitizeOutcome::PassedThrough => sanitized.file,
        }
    } else {
        file
    };

    Ok(if config.compression_enabled {
        compressor.compress(file)
    } else {
        file
    })
}

/// Audit event for an upload that ended without a stored object.
/// Operational failures need an operator; everything else is a warning.
pub(crate) fn audit_rejection(class: EntityClass, entity_id: &str, failure: &PipelineFailure) {
    let kind = failure.kind();
    if kind == FailureKind::Operational {
        error!(bucket = %class, entity_id, ?kind, reason = %failure, "upload rejected");
    } else {
        warn!(bucket = %class, entity_id, ?kind, reason = %failure, "upload rejected");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        models::bucket::BucketNames,
        services::{
            cipher::{AesGcmCipher, CipherError, MockCipher},
            storage_service::tests::test_store,
        },
    };
    use std::{
        io,
        sync::Mutex,
        thread::{self, ThreadId},
    };
    use tempfile::TempDir;
    use tracing_subscriber::fmt::MakeWriter;

    /// In-memory sink for formatted log output.
    #[derive(Clone, Default)]
    pub(crate) struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        pub(crate) fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
            tracing_subscriber::fmt()
                .with_writer(self.clone())
                .with_ansi(false)
                .finish()
        }

        pub(crate) fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    pub(crate) async fn test_pipeline(config: PipelineConfig) -> (UploadPipeline, TempDir) {
        let (store, dir) = test_store().await;
        let gateway = StorageGateway::new(Arc::new(store), BucketNames::default());
        let pipeline = UploadPipeline::new(config, gateway, Arc::new(AesGcmCipher::generate()));
        (pipeline, dir)
    }

    pub(crate) fn pdf_request(entity: &str, document: &str) -> UploadRequest {
        UploadRequest::new(
            entity,
            document,
            UploadedFile::new("cert.pdf", "application/pdf", b"%PDF-1.4\n".to_vec()),
        )
    }

    #[tokio::test]
    async fn upload_encrypts_at_rest_and_download_decrypts() {
        let (pipeline, _dir) = test_pipeline(PipelineConfig::default()).await;

        let upload = pipeline
            .store(EntityClass::Technician, pdf_request("T1", "CERT"))
            .await
            .unwrap();
        let key = upload.key.to_string();

        let (object, at_rest) = pipeline
            .gateway()
            .get(EntityClass::Technician, &key)
            .await
            .unwrap();
        assert_ne!(&at_rest[..], b"%PDF-1.4\n");
        assert_eq!(object.content_type.as_deref(), Some("application/pdf"));

        let file = pipeline.download(EntityClass::Technician, &key).await.unwrap();
        assert_eq!(&file.data[..], b"%PDF-1.4\n");
        assert_eq!(file.content_type.as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn plaintext_mode_stores_bytes_as_is() {
        let config = PipelineConfig {
            encryption_enabled: false,
            ..PipelineConfig::default()
        };
        let (pipeline, _dir) = test_pipeline(config).await;

        let result = pipeline
            .upload(EntityClass::Company, pdf_request("C1", "RUT"))
            .await;
        assert!(result.success);

        let key = result.object_key.unwrap();
        let (_, at_rest) = pipeline.gateway().get(EntityClass::Company, &key).await.unwrap();
        assert_eq!(&at_rest[..], b"%PDF-1.4\n");
    }

    #[tokio::test]
    async fn invalid_file_never_reaches_storage() {
        let (pipeline, _dir) = test_pipeline(PipelineConfig::default()).await;
        let request = UploadRequest::new(
            "T1",
            "CERT",
            UploadedFile::new("cert.pdf", "application/pdf", vec![0, 0, 0, 0]),
        );

        let result = pipeline.upload(EntityClass::Technician, request).await;

        assert!(!result.success);
        assert_eq!(result.failure_kind, Some(FailureKind::Validation));
        assert!(result.failure_reason.unwrap().contains("signature"));
        assert_eq!(result.object_key, None);
    }

    #[tokio::test]
    async fn unsafe_entity_id_is_a_validation_failure() {
        let (pipeline, _dir) = test_pipeline(PipelineConfig::default()).await;
        let result = pipeline
            .upload(EntityClass::Technician, pdf_request("../T1", "CERT"))
            .await;
        assert_eq!(result.failure_kind, Some(FailureKind::Validation));
    }

    #[tokio::test]
    async fn undecodable_image_is_rejected_when_configured() {
        let config = PipelineConfig {
            reject_undecodable_images: true,
            ..PipelineConfig::default()
        };
        let (pipeline, _dir) = test_pipeline(config).await;
        let request = UploadRequest::new(
            "T1",
            "FOTO",
            UploadedFile::new("p.png", "image/png", vec![0x89, 0x50, 0x4E, 0x47, 0, 1]),
        );

        let result = pipeline.upload(EntityClass::Technician, request).await;
        assert_eq!(result.failure_kind, Some(FailureKind::Validation));
        assert!(result.failure_reason.unwrap().contains("decoded"));
    }

    #[tokio::test]
    async fn undecodable_image_is_stored_unchanged_by_default() {
        let config = PipelineConfig {
            encryption_enabled: false,
            ..PipelineConfig::default()
        };
        let (pipeline, _dir) = test_pipeline(config).await;
        let bytes = vec![0x89, 0x50, 0x4E, 0x47, 0, 1];
        let request = UploadRequest::new(
            "T1",
            "FOTO",
            UploadedFile::new("p.png", "image/png", bytes.clone()),
        );

        let upload = pipeline.store(EntityClass::Technician, request).await.unwrap();
        let file = pipeline
            .download(EntityClass::Technician, &upload.key.to_string())
            .await
            .unwrap();
        assert_eq!(file.data.to_vec(), bytes);
    }

    #[tokio::test]
    async fn replacing_deletes_previous_object_first() {
        let (pipeline, _dir) = test_pipeline(PipelineConfig::default()).await;
        let first = pipeline
            .store(EntityClass::Technician, pdf_request("T1", "CERT"))
            .await
            .unwrap();

        // reference the old object by its signed URL, as stored in metadata
        let renewal = pdf_request("T1", "CERT").replacing(first.signed_url.clone());
        let second = pipeline.store(EntityClass::Technician, renewal).await.unwrap();

        assert_ne!(first.key, second.key);
        let old = pipeline
            .download(EntityClass::Technician, &first.key.to_string())
            .await;
        assert_eq!(old.unwrap_err().kind(), FailureKind::NotFound);
        assert!(pipeline
            .download(EntityClass::Technician, &second.key.to_string())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn failed_delete_of_previous_object_does_not_block_upload() {
        let (pipeline, _dir) = test_pipeline(PipelineConfig::default()).await;
        let renewal = pdf_request("T1", "CERT").replacing("T1/CERT_1_missing00.pdf");
        assert!(pipeline.upload(EntityClass::Technician, renewal).await.success);
    }

    #[tokio::test]
    async fn missing_bucket_is_operational() {
        let (store, _dir) = test_store().await;
        let gateway = StorageGateway::new(
            Arc::new(store),
            BucketNames {
                technician: "not-created".into(),
                company: "company-documents".into(),
            },
        );
        let pipeline = UploadPipeline::new(
            PipelineConfig::default(),
            gateway,
            Arc::new(AesGcmCipher::generate()),
        );

        let logs = CapturedLogs::default();
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        let result = pipeline
            .upload(EntityClass::Technician, pdf_request("T1", "CERT"))
            .await;
        assert_eq!(result.failure_kind, Some(FailureKind::Operational));
        assert!(result.failure_reason.unwrap().contains("not-created"));

        let output = logs.contents();
        assert!(output.contains("ERROR"));
        assert!(output.contains("upload rejected"));
        assert!(output.contains("kind=Operational"));
    }

    #[tokio::test]
    async fn rejected_upload_is_logged_with_its_kind() {
        let (pipeline, _dir) = test_pipeline(PipelineConfig::default()).await;
        let request = UploadRequest::new(
            "T7",
            "CERT",
            UploadedFile::new("cert.exe", "application/pdf", b"%PDF-1.4\n".to_vec()),
        );

        let logs = CapturedLogs::default();
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        let result = pipeline.upload(EntityClass::Technician, request).await;
        assert_eq!(result.failure_kind, Some(FailureKind::Validation));

        let output = logs.contents();
        assert!(output.contains("WARN"));
        assert!(output.contains("upload rejected"));
        assert!(output.contains("kind=Validation"));
        assert!(output.contains("T7"));
        assert!(output.contains("exe"));
    }

    #[tokio::test]
    async fn failed_reads_and_deletes_are_logged() {
        let (pipeline, _dir) = test_pipeline(PipelineConfig::default()).await;
        let logs = CapturedLogs::default();
        let _guard = tracing::subscriber::set_default(logs.subscriber());

        let missing = "T1/CERT_1_missing00.pdf";
        assert!(pipeline.download(EntityClass::Technician, missing).await.is_err());
        assert!(pipeline.delete(EntityClass::Technician, missing).await.is_err());

        let output = logs.contents();
        assert!(output.contains("document read failed"));
        assert!(output.contains("document delete failed"));
    }

    #[tokio::test]
    async fn encryption_runs_on_the_blocking_pool() {
        let worker = thread::current().id();
        let seen: Arc<Mutex<Option<ThreadId>>> = Arc::default();
        let recorded = Arc::clone(&seen);

        let (store, _dir) = test_store().await;
        let gateway = StorageGateway::new(Arc::new(store), BucketNames::default());
        let mut cipher = MockCipher::new();
        cipher.expect_encrypt().times(1).returning(move |data| {
            *recorded.lock().unwrap() = Some(thread::current().id());
            Ok(data.to_vec())
        });
        let pipeline = UploadPipeline::new(PipelineConfig::default(), gateway, Arc::new(cipher));

        let result = pipeline
            .upload(EntityClass::Technician, pdf_request("T1", "CERT"))
            .await;
        assert!(result.success);

        let encrypted_on = (*seen.lock().unwrap()).expect("encrypt was called");
        assert_ne!(encrypted_on, worker);
    }

    #[tokio::test]
    async fn encryption_failure_stores_nothing() {
        let (store, _dir) = test_store().await;
        let gateway = StorageGateway::new(Arc::new(store), BucketNames::default());
        let mut cipher = MockCipher::new();
        cipher
            .expect_encrypt()
            .returning(|_| Err(CipherError::Encrypt));
        let pipeline = UploadPipeline::new(PipelineConfig::default(), gateway, Arc::new(cipher));

        let result = pipeline
            .upload(EntityClass::Technician, pdf_request("T1", "CERT"))
            .await;
        assert!(!result.success);
        assert_eq!(result.failure_kind, Some(FailureKind::Operational));
    }

    #[tokio::test]
    async fn concurrent_uploads_for_same_slot_land_on_distinct_keys() {
        let (pipeline, _dir) = test_pipeline(PipelineConfig::default()).await;
        let (a, b) = tokio::join!(
            pipeline.store(EntityClass::Technician, pdf_request("T1", "CERT")),
            pipeline.store(EntityClass::Technician, pdf_request("T1", "CERT")),
        );
        assert_ne!(a.unwrap().key, b.unwrap().key);
    }
}
