use anyhow::{Context, Result};
use axum::Router;
use document_vault::{
    config::AppConfig,
    db,
    routes,
    services::{
        cipher::{AesGcmCipher, Cipher},
        signing::UrlSigner,
        storage_service::{LocalObjectStore, StoreError},
    },
    state::AppState,
};
use rand::RngCore;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting document-vault with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL `{}`", db_url))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );

    // --- Secrets ---
    let signing_secret = match &cfg.signing_secret {
        Some(secret) => secret.as_bytes().to_vec(),
        None => {
            tracing::warn!(
                "DOCUMENT_VAULT_SIGNING_SECRET is not set; signed URLs will not survive a restart"
            );
            let mut secret = vec![0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut secret);
            secret
        }
    };
    let signer = UrlSigner::new(&signing_secret, cfg.public_base_url.clone())
        .map_err(|e| anyhow::anyhow!("invalid signing secret: {}", e))?;

    let cipher: Arc<dyn Cipher> = match &cfg.encryption_key {
        Some(key) => Arc::new(AesGcmCipher::from_base64(key).context("loading encryption key")?),
        None => {
            if cfg.encryption_enabled {
                tracing::warn!(
                    "DOCUMENT_VAULT_ENCRYPTION_KEY is not set; using an ephemeral key, stored documents become unreadable after a restart"
                );
            }
            Arc::new(AesGcmCipher::generate())
        }
    };

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&db).await?;
        let store = LocalObjectStore::new(db.clone(), cfg.storage_dir.clone(), signer);
        let buckets = cfg.buckets();
        for name in [&buckets.technician, &buckets.company] {
            match store.create_bucket(name).await {
                Ok(_) => tracing::info!("Created bucket {}", name),
                Err(StoreError::BucketAlreadyExists(_)) => {
                    tracing::debug!("Bucket {} already exists", name)
                }
                Err(err) => return Err(err.into()),
            }
        }
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let state = AppState::local(
        db,
        cfg.storage_dir.clone(),
        signer,
        cipher,
        cfg.buckets(),
        cfg.pipeline_config(),
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
