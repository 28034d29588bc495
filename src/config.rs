use anyhow::{Context, Result, bail};
use axum::http::HeaderName;
use clap::Parser;
use std::{env, path::PathBuf};

use crate::state::EdgeHeaders;

pub const DEFAULT_OBJECT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub objects: ObjectBackendConfig,
    pub country_header: HeaderName,
    pub region_header: HeaderName,
}

/// Where downloadable objects live.
#[derive(Clone)]
pub enum ObjectBackendConfig {
    Local {
        dir: PathBuf,
    },
    Http {
        endpoint: String,
        bucket: String,
        token: Option<String>,
    },
}

impl std::fmt::Debug for ObjectBackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local { dir } => f.debug_struct("Local").field("dir", dir).finish(),
            Self::Http {
                endpoint,
                bucket,
                token,
            } => f
                .debug_struct("Http")
                .field("endpoint", endpoint)
                .field("bucket", bucket)
                .field("token", &token.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Single-use download gate")]
pub struct Args {
    /// Host to bind to (overrides DOWNLOAD_GATE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Grant database URL (overrides DOWNLOAD_GATE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket holding the downloadable objects (overrides BUCKET_NAME)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Base URL of the HTTP object endpoint (overrides DOWNLOAD_GATE_OBJECT_ENDPOINT)
    #[arg(long)]
    pub object_endpoint: Option<String>,

    /// Bearer token sent to the object endpoint (overrides DOWNLOAD_GATE_OBJECT_TOKEN)
    #[arg(long)]
    pub object_token: Option<String>,

    /// Serve objects from this directory instead of a bucket (overrides DOWNLOAD_GATE_OBJECT_DIR)
    #[arg(long)]
    pub object_dir: Option<PathBuf>,

    /// Header carrying the caller's country (overrides DOWNLOAD_GATE_COUNTRY_HEADER)
    #[arg(long)]
    pub country_header: Option<String>,

    /// Header carrying the caller's region (overrides DOWNLOAD_GATE_REGION_HEADER)
    #[arg(long)]
    pub region_header: Option<String>,

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
        let cfg = Self::resolve(args, |key| env::var(key))?;
        Ok((cfg, migrate))
    }

    /// Merge `args` over the variables returned by `lookup`.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let var = |key: &str| -> Result<Option<String>> {
            match lookup(key) {
                Ok(value) if value.is_empty() => Ok(None),
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {}", key)),
            }
        };

        // --- Environment fallback ---
        let env_host = var("DOWNLOAD_GATE_HOST")?.unwrap_or_else(|| "0.0.0.0".into());
        let env_port = match var("PORT")? {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing PORT value `{}`", value))?,
            None => 8080,
        };
        let env_db = var("DOWNLOAD_GATE_DATABASE_URL")?
            .unwrap_or_else(|| "sqlite://./data/grants.db".into());

        let object_dir = match args.object_dir {
            Some(dir) => Some(dir),
            None => var("DOWNLOAD_GATE_OBJECT_DIR")?.map(PathBuf::from),
        };
        let objects = match object_dir {
            Some(dir) => ObjectBackendConfig::Local { dir },
            None => {
                let bucket = match args.bucket {
                    Some(bucket) => bucket,
                    None => match var("BUCKET_NAME")? {
                        Some(bucket) => bucket,
                        None => bail!("BUCKET_NAME (or --bucket) is required unless an object directory is set"),
                    },
                };
                let endpoint = match args.object_endpoint {
                    Some(endpoint) => endpoint,
                    None => var("DOWNLOAD_GATE_OBJECT_ENDPOINT")?
                        .unwrap_or_else(|| DEFAULT_OBJECT_ENDPOINT.into()),
                };
                let token = match args.object_token {
                    Some(token) => Some(token),
                    None => var("DOWNLOAD_GATE_OBJECT_TOKEN")?,
                };
                ObjectBackendConfig::Http {
                    endpoint,
                    bucket,
                    token,
                }
            }
        };

        let defaults = EdgeHeaders::default();
        let country_header = match args.country_header {
            Some(name) => Some(name),
            None => var("DOWNLOAD_GATE_COUNTRY_HEADER")?,
        }
        .map(|name| parse_header_name(&name))
        .transpose()?
        .unwrap_or(defaults.country);
        let region_header = match args.region_header {
            Some(name) => Some(name),
            None => var("DOWNLOAD_GATE_REGION_HEADER")?,
        }
        .map(|name| parse_header_name(&name))
        .transpose()?
        .unwrap_or(defaults.region);

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            objects,
            country_header,
            region_header,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn edge_headers(&self) -> EdgeHeaders {
        EdgeHeaders {
            country: self.country_header.clone(),
            region: self.region_header.clone(),
        }
    }
}

fn parse_header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.trim().to_ascii_lowercase().as_bytes())
        .with_context(|| format!("`{}` is not a valid header name", name))
}
