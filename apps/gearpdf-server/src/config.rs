//! Configuration management for the GearPDF server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::compress::CompressionProfile;

/// Default listening port when `PORT` is unset
pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub compression: CompressionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompressionConfig {
    /// Explicit Ghostscript binary; probed from the usual names when `None`
    pub gs_binary: Option<String>,
    /// Upper bound for a single external process run
    pub timeout_secs: u64,
    /// Largest accepted upload in bytes
    pub max_upload_bytes: usize,
    /// Number of Ghostscript processes allowed to run at once
    pub max_concurrent_jobs: usize,
    /// Root directory for per-request workspaces
    pub temp_dir: PathBuf,
    /// Profile used when the request does not name one
    pub default_profile: CompressionProfile,
    /// Run the in-process lopdf pass after Ghostscript and in its absence
    pub native_pass: bool,
}

/// Error raised when an environment variable holds an unusable value
#[derive(Debug, thiserror::Error)]
#[error("Invalid value for {var}: {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl CompressionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: DEFAULT_PORT,
            },
            compression: CompressionConfig {
                gs_binary: None,
                timeout_secs: 120,
                max_upload_bytes: 100 * 1024 * 1024,
                max_concurrent_jobs: default_concurrency(),
                temp_dir: env::temp_dir(),
                default_profile: CompressionProfile::Ebook,
                native_pass: true,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or(defaults.server.host),
                port: parse_var("PORT")?.unwrap_or(defaults.server.port),
            },
            compression: CompressionConfig {
                gs_binary: env::var("GS_BINARY").ok().filter(|s| !s.trim().is_empty()),
                timeout_secs: parse_var("COMPRESS_TIMEOUT_SECS")?
                    .unwrap_or(defaults.compression.timeout_secs),
                max_upload_bytes: parse_var::<usize>("MAX_UPLOAD_MB")?
                    .map(|mb| mb * 1024 * 1024)
                    .unwrap_or(defaults.compression.max_upload_bytes),
                max_concurrent_jobs: parse_var::<usize>("MAX_CONCURRENT_JOBS")?
                    .map(|n| n.max(1))
                    .unwrap_or(defaults.compression.max_concurrent_jobs),
                temp_dir: env::var("GEARPDF_TEMP_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.compression.temp_dir),
                default_profile: parse_var("DEFAULT_PROFILE")?
                    .unwrap_or(defaults.compression.default_profile),
                native_pass: parse_var("NATIVE_PASS")?.unwrap_or(defaults.compression.native_pass),
            },
        })
    }
}

/// Read and parse an optional variable; unset means `None`, garbage is an error.
fn parse_var<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { var, value }),
        Err(_) => Ok(None),
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
