use anyhow::{Context, Result, bail};
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
    /// Bucket served by the file endpoints and scanned by the thumbnail job.
    pub bucket: String,
    pub thumbnail_width: u32,
    pub thumbnail_folder: String,
    pub job_interval: Duration,
    /// Base of the public object URLs, e.g. `https://storage.googleapis.com`.
    pub public_base_url: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "File upload/download API with background thumbnail generation")]
pub struct Args {
    /// Host to bind to (overrides THUMBNAIL_SERVICE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides THUMBNAIL_SERVICE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides THUMBNAIL_SERVICE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides THUMBNAIL_SERVICE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket to serve (overrides THUMBNAIL_SERVICE_BUCKET); required
    #[arg(long)]
    pub bucket: Option<String>,

    /// Thumbnail width in pixels (overrides THUMBNAIL_SERVICE_THUMBNAIL_WIDTH)
    #[arg(long)]
    pub thumbnail_width: Option<u32>,

    /// Folder thumbnails are written under (overrides THUMBNAIL_SERVICE_THUMBNAIL_FOLDER)
    #[arg(long)]
    pub thumbnail_folder: Option<String>,

    /// Seconds between the end of one job run and the start of the next
    /// (overrides THUMBNAIL_SERVICE_JOB_INTERVAL_SECS)
    #[arg(long)]
    pub job_interval_secs: Option<u64>,

    /// Base URL for public object links (overrides THUMBNAIL_SERVICE_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |key| env::var(key))?;
        Ok((cfg, migrate))
    }

    /// Merge CLI values over environment values over defaults.
    fn resolve(args: Args, lookup: impl Fn(&str) -> Result<String, env::VarError>) -> Result<Self> {
        let text = |key: &str, default: &str| -> Result<String> {
            match lookup(key) {
                Ok(value) => Ok(value),
                Err(env::VarError::NotPresent) => Ok(default.to_string()),
                Err(err) => Err(err).with_context(|| format!("reading {}", key)),
            }
        };

        let env_bucket = match lookup("THUMBNAIL_SERVICE_BUCKET") {
            Ok(value) => Some(value),
            Err(env::VarError::NotPresent) => None,
            Err(err) => return Err(err).context("reading THUMBNAIL_SERVICE_BUCKET"),
        };
        let Some(bucket) = args.bucket.or(env_bucket).filter(|b| !b.trim().is_empty()) else {
            bail!("no bucket configured: set THUMBNAIL_SERVICE_BUCKET or pass --bucket");
        };

        let host = match args.host {
            Some(host) => host,
            None => text("THUMBNAIL_SERVICE_HOST", "0.0.0.0")?,
        };
        let port = match args.port {
            Some(port) => port,
            None => parse_env(&lookup, "THUMBNAIL_SERVICE_PORT", 3000)?,
        };
        let storage_dir = match args.storage_dir {
            Some(dir) => dir,
            None => text("THUMBNAIL_SERVICE_STORAGE_DIR", "./data/objects")?,
        };
        let database_url = match args.database_url {
            Some(url) => url,
            None => text(
                "THUMBNAIL_SERVICE_DATABASE_URL",
                "sqlite://./data/meta/thumbnail_service.db",
            )?,
        };
        let thumbnail_width = match args.thumbnail_width {
            Some(width) => width,
            None => parse_env(&lookup, "THUMBNAIL_SERVICE_THUMBNAIL_WIDTH", 150)?,
        };
        let thumbnail_folder = match args.thumbnail_folder {
            Some(folder) => folder,
            None => text("THUMBNAIL_SERVICE_THUMBNAIL_FOLDER", "thumbnails")?,
        };
        let job_interval_secs = match args.job_interval_secs {
            Some(secs) => secs,
            None => parse_env(&lookup, "THUMBNAIL_SERVICE_JOB_INTERVAL_SECS", 60)?,
        };
        let public_base_url = match args.public_base_url {
            Some(url) => url,
            None => text(
                "THUMBNAIL_SERVICE_PUBLIC_BASE_URL",
                "https://storage.googleapis.com",
            )?,
        };

        if thumbnail_width == 0 {
            bail!("thumbnail width must be greater than zero");
        }
        if job_interval_secs == 0 {
            bail!("job interval must be at least one second");
        }
        let thumbnail_folder = thumbnail_folder.trim_matches('/').to_string();
        if thumbnail_folder.is_empty() || thumbnail_folder.contains('/') {
            bail!(
                "thumbnail folder `{}` must be a single non-empty path segment",
                thumbnail_folder
            );
        }

        Ok(Self {
            host,
            port,
            storage_dir,
            database_url,
            bucket,
            thumbnail_width,
            thumbnail_folder,
            job_interval: Duration::from_secs(job_interval_secs),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(
    lookup: &impl Fn(&str) -> Result<String, env::VarError>,
    key: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
