use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub bucket: String,
    pub storage_dir: String,
    pub database_url: String,
    pub base_url: String,
    pub max_upload_bytes: u64,
    pub backend_timeout_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "File API over a local object store")]
pub struct Args {
    /// Host to bind to (overrides FILE_API_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_API_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Bucket holding every file (overrides FILE_API_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Directory where objects are stored (overrides FILE_API_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILE_API_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public origin used in download URLs (overrides FILE_API_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Largest accepted upload in bytes (overrides FILE_API_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Per-call object store deadline, 0 disables it (overrides FILE_API_BACKEND_TIMEOUT_SECS)
    #[arg(long)]
    pub backend_timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name))?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values looked up by `lookup`, then over defaults.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let text = |name: &str, default: &str| -> Result<String> {
            match lookup(name) {
                Ok(value) => Ok(value),
                Err(env::VarError::NotPresent) => Ok(default.to_string()),
                Err(err) => Err(err).with_context(|| format!("reading {}", name)),
            }
        };

        // --- Environment fallback ---
        let env_host = text("FILE_API_HOST", "0.0.0.0")?;
        let env_port = env_parse(&lookup, "FILE_API_PORT", 5555)?;
        let env_bucket = text("FILE_API_BUCKET", "fileapi")?;
        let env_storage = text("FILE_API_STORAGE_DIR", "./data/objects")?;
        let env_db = text("FILE_API_DATABASE_URL", "sqlite://./data/meta/file_api.db")?;
        let env_base_url = text("FILE_API_BASE_URL", "http://localhost:5555")?;
        let env_max_upload = env_parse(&lookup, "FILE_API_MAX_UPLOAD_BYTES", 5 * 1024 * 1024)?;
        let env_timeout = env_parse(&lookup, "FILE_API_BACKEND_TIMEOUT_SECS", 30)?;

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            bucket: args.bucket.unwrap_or(env_bucket),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            base_url: args.base_url.unwrap_or(env_base_url),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            backend_timeout_secs: args.backend_timeout_secs.unwrap_or(env_timeout),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn backend_timeout(&self) -> Option<Duration> {
        (self.backend_timeout_secs > 0).then(|| Duration::from_secs(self.backend_timeout_secs))
    }
}

fn env_parse<T, F>(lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match lookup(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
