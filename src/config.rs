use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

pub const DEFAULT_PORT: u16 = 3344;
pub const DEFAULT_DB_PATH: &str = "my.db";
pub const DEFAULT_FILE_MODE: u32 = 0o600;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;
pub const DEFAULT_MAX_INFLIGHT: usize = 100;

pub const ENV_PORT: &str = "BUCKET_STORE_PORT";
pub const ENV_DB_PATH: &str = "BUCKET_STORE_DB";
pub const ENV_FILE_MODE: &str = "BUCKET_STORE_MODE";
pub const ENV_TIMEOUT_SECS: &str = "BUCKET_STORE_TIMEOUT_SECS";
pub const ENV_MAX_BODY: &str = "BUCKET_STORE_MAX_BODY";

/// Settings for the `bucket-stored` daemon, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Permission bits for a newly created store file.
    pub file_mode: u32,
    /// Upper bound on the time one request may spend waiting for and running its transaction.
    pub request_timeout: Duration,
    /// Largest accepted `PUT` body.
    pub max_body_bytes: usize,
    /// Maximum number of store operations running at once.
    pub max_inflight: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            file_mode: DEFAULT_FILE_MODE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_inflight: DEFAULT_MAX_INFLIGHT,
        }
    }
}

/// Raw, unvalidated settings as given on the command line or in the environment.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub port: Option<String>,
    pub db_path: Option<String>,
    pub file_mode: Option<String>,
    pub timeout_secs: Option<String>,
    pub max_body_bytes: Option<String>,
}

impl ConfigOverrides {
    /// Reads the `BUCKET_STORE_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            port: env::var(ENV_PORT).ok(),
            db_path: env::var(ENV_DB_PATH).ok(),
            file_mode: env::var(ENV_FILE_MODE).ok(),
            timeout_secs: env::var(ENV_TIMEOUT_SECS).ok(),
            max_body_bytes: env::var(ENV_MAX_BODY).ok(),
        }
    }

    /// Fills every unset field from `fallback`.
    pub fn or(self, fallback: ConfigOverrides) -> Self {
        Self {
            port: self.port.or(fallback.port),
            db_path: self.db_path.or(fallback.db_path),
            file_mode: self.file_mode.or(fallback.file_mode),
            timeout_secs: self.timeout_secs.or(fallback.timeout_secs),
            max_body_bytes: self.max_body_bytes.or(fallback.max_body_bytes),
        }
    }
}

impl ServerConfig {
    /// Validates `overrides` and applies them over the defaults.
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self> {
        let mut config = ServerConfig::default();

        if let Some(port) = overrides.port {
            config.port = parse_number(ENV_PORT, &port)?;
        }
        if let Some(path) = overrides.db_path {
            if path.is_empty() {
                return Err(invalid(ENV_DB_PATH, &path));
            }
            config.db_path = PathBuf::from(path);
        }
        if let Some(mode) = overrides.file_mode {
            config.file_mode = parse_file_mode(&mode)?;
        }
        if let Some(secs) = overrides.timeout_secs {
            let secs: u64 = parse_number(ENV_TIMEOUT_SECS, &secs)?;
            if secs == 0 {
                return Err(invalid(ENV_TIMEOUT_SECS, "0"));
            }
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = overrides.max_body_bytes {
            config.max_body_bytes = parse_number(ENV_MAX_BODY, &max)?;
        }

        Ok(config)
    }
}

/// Parses octal permission bits such as `0600`, `600` or `0o644`.
pub fn parse_file_mode(raw: &str) -> Result<u32> {
    let digits = raw.trim().trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8).map_err(|_| invalid(ENV_FILE_MODE, raw))?;
    if mode > 0o7777 {
        return Err(invalid(ENV_FILE_MODE, raw));
    }
    Ok(mode)
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| invalid(name, raw))
}

fn invalid(name: &str, raw: &str) -> Error {
    Error::Config(format!("{}={:?}", name, raw))
}
