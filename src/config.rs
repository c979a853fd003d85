use anyhow::{Context, Result};
use clap::Parser;
use std::{env, time::Duration};

const DEFAULT_MAX_CHUNK_BYTES: usize = 64 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub max_chunk_bytes: usize,
    /// Age after which an unmerged upload is swept. `None` keeps uploads forever.
    pub stale_upload_after: Option<Duration>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Resumable chunked upload server")]
pub struct Args {
    /// Host to bind to (overrides CHUNK_UPLOAD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CHUNK_UPLOAD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding chunks and merged files (overrides CHUNK_UPLOAD_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Largest accepted upload request body in bytes (overrides CHUNK_UPLOAD_MAX_CHUNK_BYTES)
    #[arg(long)]
    pub max_chunk_bytes: Option<usize>,

    /// Sweep uploads untouched for this many seconds (overrides CHUNK_UPLOAD_STALE_UPLOAD_SECS)
    #[arg(long)]
    pub stale_upload_secs: Option<u64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::merge(Args::parse(), |key| env::var(key))
    }

    /// Layer CLI arguments over values found through `lookup`.
    fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        // --- Environment fallback ---
        let env_host = lookup("CHUNK_UPLOAD_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_var(&lookup, "CHUNK_UPLOAD_PORT")?.unwrap_or(3000);
        let env_storage =
            lookup("CHUNK_UPLOAD_STORAGE_DIR").unwrap_or_else(|_| "./uploads".into());
        let env_max_chunk =
            parse_var(&lookup, "CHUNK_UPLOAD_MAX_CHUNK_BYTES")?.unwrap_or(DEFAULT_MAX_CHUNK_BYTES);
        let env_stale = parse_var::<u64, _>(&lookup, "CHUNK_UPLOAD_STALE_UPLOAD_SECS")?;

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            max_chunk_bytes: args.max_chunk_bytes.unwrap_or(env_max_chunk),
            stale_upload_after: args
                .stale_upload_secs
                .or(env_stale)
                .map(Duration::from_secs),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match lookup(key) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
