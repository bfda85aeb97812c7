use crate::{models::bucket::BucketNames, services::pipeline::PipelineConfig};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Origin used when building signed URLs.
    pub public_base_url: String,
    pub technician_bucket: String,
    pub company_bucket: String,
    /// HMAC secret for signed URLs. Generated per process when unset.
    pub signing_secret: Option<String>,
    /// Base64 AES-256 key. Generated per process when unset.
    pub encryption_key: Option<String>,
    pub encryption_enabled: bool,
    pub compression_enabled: bool,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("public_base_url", &self.public_base_url)
            .field("technician_bucket", &self.technician_bucket)
            .field("company_bucket", &self.company_bucket)
            .field("signing_secret", &redact(&self.signing_secret))
            .field("encryption_key", &redact(&self.encryption_key))
            .field("encryption_enabled", &self.encryption_enabled)
            .field("compression_enabled", &self.compression_enabled)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Document upload and storage service")]
pub struct Args {
    /// Host to bind to (overrides DOCUMENT_VAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DOCUMENT_VAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where payloads are stored (overrides DOCUMENT_VAULT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides DOCUMENT_VAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public origin for signed URLs (overrides DOCUMENT_VAULT_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Bucket for technician documents (overrides DOCUMENT_VAULT_TECHNICIAN_BUCKET)
    #[arg(long)]
    pub technician_bucket: Option<String>,

    /// Bucket for company documents (overrides DOCUMENT_VAULT_COMPANY_BUCKET)
    #[arg(long)]
    pub company_bucket: Option<String>,

    /// Encrypt payloads at rest (overrides DOCUMENT_VAULT_ENCRYPTION_ENABLED)
    #[arg(long)]
    pub encryption_enabled: Option<bool>,

    /// Recompress large images (overrides DOCUMENT_VAULT_COMPRESSION_ENABLED)
    #[arg(long)]
    pub compression_enabled: Option<bool>,

    /// Run migrations, create the configured buckets and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::from_sources(args, |name| env::var(name))?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values from `lookup`, falling back to defaults.
    /// Secrets are only ever read from the environment.
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let string = |name: &str, default: &str| match lookup(name) {
            Ok(value) => value,
            Err(_) => default.to_string(),
        };
        let secret = |name: &str| lookup(name).ok().filter(|v| !v.trim().is_empty());

        let port = match args.port {
            Some(port) => port,
            None => parse_env(&lookup, "DOCUMENT_VAULT_PORT", 3000)?,
        };
        let encryption_enabled = match args.encryption_enabled {
            Some(flag) => flag,
            None => parse_env(&lookup, "DOCUMENT_VAULT_ENCRYPTION_ENABLED", true)?,
        };
        let compression_enabled = match args.compression_enabled {
            Some(flag) => flag,
            None => parse_env(&lookup, "DOCUMENT_VAULT_COMPRESSION_ENABLED", true)?,
        };

        let defaults = BucketNames::default();
        let host = args
            .host
            .unwrap_or_else(|| string("DOCUMENT_VAULT_HOST", "0.0.0.0"));
        let public_base_url = args.public_base_url.unwrap_or_else(|| {
            string(
                "DOCUMENT_VAULT_PUBLIC_BASE_URL",
                &format!("http://localhost:{port}"),
            )
        });

        Ok(Self {
            host,
            port,
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| string("DOCUMENT_VAULT_STORAGE_DIR", "./data/objects")),
            database_url: args.database_url.unwrap_or_else(|| {
                string(
                    "DOCUMENT_VAULT_DATABASE_URL",
                    "sqlite://./data/meta/document_vault.db",
                )
            }),
            public_base_url,
            technician_bucket: args.technician_bucket.unwrap_or_else(|| {
                string("DOCUMENT_VAULT_TECHNICIAN_BUCKET", &defaults.technician)
            }),
            company_bucket: args
                .company_bucket
                .unwrap_or_else(|| string("DOCUMENT_VAULT_COMPANY_BUCKET", &defaults.company)),
            signing_secret: secret("DOCUMENT_VAULT_SIGNING_SECRET"),
            encryption_key: secret("DOCUMENT_VAULT_ENCRYPTION_KEY"),
            encryption_enabled,
            compression_enabled,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn buckets(&self) -> BucketNames {
        BucketNames {
            technician: self.technician_bucket.clone(),
            company: self.company_bucket.clone(),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            encryption_enabled: self.encryption_enabled,
            compression_enabled: self.compression_enabled,
            ..PipelineConfig::default()
        }
    }
}

fn parse_env<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Result<String, env::VarError>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
