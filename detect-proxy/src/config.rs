//! Application configuration management.
//!
//! Configuration is loaded from an optional YAML file with environment variable overrides. The
//! configuration file path defaults to `config.yaml` but can be specified via `-f` flag or the
//! `DETECT_PROXY_CONFIG` environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`, may be absent)
//! 2. **Environment variables** - Variables prefixed with `DETECT_PROXY_` override YAML values
//! 3. **VITE_API_URL** - Special case: overrides `backend_url` if set. This is the variable the
//!    browser client and its deployments already use for the classification service.
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `DETECT_PROXY_LIMITS__MAX_UPLOAD_SIZE=1048576` sets the `limits.max_upload_size` field.
//!
//! ## Example
//!
//! ```yaml
//! host: 0.0.0.0
//! port: 3000
//! backend_url: https://banana-deploy.onrender.com
//! request_timeout: 30s
//! limits:
//!   max_upload_size: 209715200
//! cors:
//!   allowed_origins:
//!     - http://localhost:5173
//! ```
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Point the proxy at a local classification server
//! VITE_API_URL=http://localhost:8000
//!
//! # Shorter downstream timeout
//! DETECT_PROXY_REQUEST_TIMEOUT=10s
//!
//! # Keep spooled uploads on a dedicated volume
//! DETECT_PROXY_UPLOAD_DIR=/var/tmp/detect-proxy
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

/// Classification service used when no backend URL is configured.
pub const DEFAULT_BACKEND_URL: &str = "https://banana-deploy.onrender.com";

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "DETECT_PROXY_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// Loaded once at startup and shared read-only with every request through
/// [`AppState`](crate::AppState). All fields have defaults, see the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Base URL of the image-classification service. Uploads are forwarded to `{backend_url}/detect`.
    pub backend_url: Url,
    /// Upper bound for the whole downstream call. Exceeding it fails the request, it is never retried.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Directory for spooled uploads. Defaults to the OS temp directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_dir: Option<PathBuf>,
    /// Request size limits
    pub limits: LimitsConfig,
    /// CORS settings for the browser client
    pub cors: CorsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum accepted request body size in bytes. Larger uploads fail as form parsing errors.
    pub max_upload_size: usize,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// Allowed CORS origin.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://market.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            backend_url: Url::parse(DEFAULT_BACKEND_URL).expect("default backend URL is valid"),
            request_timeout: Duration::from_secs(30),
            upload_dir: None,
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: true,
            enable_otel_export: false,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 200 * 1024 * 1024, // 200 MiB
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                CorsOrigin::Url(Url::parse("http://localhost:5173").expect("default origin is valid")), // Vite dev server
            ],
            allow_credentials: false,
            max_age: Some(3600),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.backend_url.scheme(), "http" | "https") {
            anyhow::bail!(
                "Config validation: backend_url must use http or https, got '{}'",
                self.backend_url.scheme()
            );
        }

        if self.request_timeout.is_zero() {
            anyhow::bail!("Config validation: request_timeout must be greater than 0");
        }

        if self.limits.max_upload_size == 0 {
            anyhow::bail!("Config validation: limits.max_upload_size cannot be 0");
        }

        let has_wildcard = self.cors.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if has_wildcard && self.cors.allow_credentials {
            anyhow::bail!(
                "Config validation: CORS cannot use wildcard origin '*' with allow_credentials=true. Specify explicit origins."
            );
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // DETECT_PROXY_CONFIG names the file itself, it is not a config key
            .merge(Env::prefixed("DETECT_PROXY_").ignore(&["CONFIG"]).split("__"))
            .merge(Env::raw().only(&["VITE_API_URL"]).map(|_| "backend_url".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Directory where uploads are spooled while they are forwarded.
    pub fn upload_dir(&self) -> PathBuf {
        self.upload_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
