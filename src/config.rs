use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// MongoDB connection string. The GridFS backend is disabled when unset.
    pub mongo_url: Option<String>,
    pub mongo_database: String,
    /// Upper bound for an asynchronous upload before it is cancelled.
    pub max_upload_secs: u64,
    pub upload_poll_interval_ms: u64,
    pub max_upload_bytes: usize,
    pub task_workers: usize,
    pub cache_ttl_secs: u64,
    pub api_version: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "File upload and processing API")]
pub struct Args {
    /// Host to bind to (overrides UPLOADER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOADER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded payloads are stored (overrides UPLOADER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides UPLOADER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// MongoDB URL for the GridFS backend (overrides UPLOADER_MONGO_URL)
    #[arg(long)]
    pub mongo_url: Option<String>,

    /// MongoDB database name (overrides UPLOADER_MONGO_DATABASE)
    #[arg(long)]
    pub mongo_database: Option<String>,

    /// Minutes an asynchronous upload may run (overrides UPLOADER_MAX_UPLOAD_MINUTES)
    #[arg(long)]
    pub max_upload_minutes: Option<u64>,

    /// Poll interval of the upload supervisor in ms (overrides UPLOADER_UPLOAD_POLL_INTERVAL_MS)
    #[arg(long)]
    pub upload_poll_interval_ms: Option<u64>,

    /// Maximum request body size in bytes (overrides UPLOADER_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Number of background task workers (overrides UPLOADER_TASK_WORKERS)
    #[arg(long)]
    pub task_workers: Option<usize>,

    /// Token cache TTL in seconds (overrides UPLOADER_CACHE_TTL_SECS)
    #[arg(long)]
    pub cache_ttl_secs: Option<u64>,

    /// API version path segment (overrides UPLOADER_API_VERSION)
    #[arg(long)]
    pub api_version: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("UPLOADER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("UPLOADER_PORT", 8000u16)?;
        let env_storage =
            env::var("UPLOADER_STORAGE_DIR").unwrap_or_else(|_| "./data/media".into());
        let env_db = env::var("UPLOADER_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/uploader.db".into());
        let env_mongo = env::var("UPLOADER_MONGO_URL").ok().filter(|v| !v.is_empty());
        let env_mongo_db =
            env::var("UPLOADER_MONGO_DATABASE").unwrap_or_else(|_| "uploader".into());
        let env_max_minutes = env_parse("UPLOADER_MAX_UPLOAD_MINUTES", 5u64)?;
        let env_poll = env_parse("UPLOADER_UPLOAD_POLL_INTERVAL_MS", 1000u64)?;
        let env_max_bytes = env_parse("UPLOADER_MAX_UPLOAD_BYTES", 100 * 1024 * 1024usize)?;
        let env_workers = env_parse("UPLOADER_TASK_WORKERS", 2usize)?;
        let env_ttl = env_parse("UPLOADER_CACHE_TTL_SECS", 300u64)?;
        let env_api = env::var("UPLOADER_API_VERSION").unwrap_or_else(|_| "v1".into());

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            mongo_url: args.mongo_url.or(env_mongo),
            mongo_database: args.mongo_database.unwrap_or(env_mongo_db),
            max_upload_secs: args.max_upload_minutes.unwrap_or(env_max_minutes) * 60,
            upload_poll_interval_ms: args.upload_poll_interval_ms.unwrap_or(env_poll),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_bytes),
            task_workers: args.task_workers.unwrap_or(env_workers).max(1),
            cache_ttl_secs: args.cache_ttl_secs.unwrap_or(env_ttl),
            api_version: args.api_version.unwrap_or(env_api),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_upload_duration(&self) -> Duration {
        Duration::from_secs(self.max_upload_secs)
    }

    pub fn upload_poll_interval(&self) -> Duration {
        Duration::from_millis(self.upload_poll_interval_ms.max(1))
    }

    /// Prefix under which every REST route is mounted, e.g. `/api/v1`.
    pub fn api_prefix(&self) -> String {
        format!("/api/{}", self.api_version)
    }

    /// Configuration for tests: local paths, no MongoDB, short timeouts.
    pub fn for_storage(storage_dir: impl Into<String>, database_url: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            storage_dir: storage_dir.into(),
            database_url: database_url.into(),
            mongo_url: None,
            mongo_database: "uploader".into(),
            max_upload_secs: 60,
            upload_poll_interval_ms: 50,
            max_upload_bytes: 10 * 1024 * 1024,
            task_workers: 1,
            cache_ttl_secs: 60,
            api_version: "v1".into(),
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
