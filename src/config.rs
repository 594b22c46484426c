use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

use crate::raster::reader::MAX_LOAD_SHAPE;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Largest side of the validity mask sampled for footprints.
    pub max_mask_size: usize,
    /// Search page size when a request gives no `limit`.
    pub default_limit: Option<u32>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Raster metadata catalog and spatial search API")]
pub struct Args {
    /// Host to bind to (overrides RASTER_CATALOG_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides RASTER_CATALOG_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides RASTER_CATALOG_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Mask sampling cap in pixels per side (overrides RASTER_CATALOG_MAX_MASK_SIZE)
    #[arg(long)]
    pub max_mask_size: Option<usize>,

    /// Default search limit (overrides RASTER_CATALOG_DEFAULT_LIMIT)
    #[arg(long)]
    pub default_limit: Option<u32>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let cfg = Self::merge(
            args.host,
            args.port,
            args.database_url,
            args.max_mask_size,
            args.default_limit,
        )?;
        Ok((cfg, args.migrate))
    }

    fn merge(
        host: Option<String>,
        port: Option<u16>,
        database_url: Option<String>,
        max_mask_size: Option<usize>,
        default_limit: Option<u32>,
    ) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("RASTER_CATALOG_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("RASTER_CATALOG_PORT")?.unwrap_or(3000);
        let env_db = env::var("RASTER_CATALOG_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/catalog.db".into());
        let env_mask = env_parse("RASTER_CATALOG_MAX_MASK_SIZE")?.unwrap_or(MAX_LOAD_SHAPE.0);
        let env_limit = env_parse("RASTER_CATALOG_DEFAULT_LIMIT")?;

        // --- Merge ---
        let cfg = Self {
            host: host.unwrap_or(env_host),
            port: port.unwrap_or(env_port),
            database_url: database_url.unwrap_or(env_db),
            max_mask_size: max_mask_size.unwrap_or(env_mask),
            default_limit: default_limit.or(env_limit),
        };
        if cfg.max_mask_size == 0 {
            anyhow::bail!("max mask size must be at least 1");
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an optional environment variable.
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
