//! Configuration management
//!
//! Settings load from defaults, a TOML file, or `MODELPIPE_*` environment
//! variables (file and environment both exist so containerized and bare
//! deployments stay ergonomic). Validation runs on every load path.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub shm: ShmConfig,
    pub logging: LoggingConfig,
}

/// Listen address settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Row-result cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub file: PathBuf,
}

/// Shared-memory transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShmConfig {
    pub enabled: bool,
    pub socket: PathBuf,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, or error
    pub level: String,
    /// pretty or json
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 9000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: PathBuf::from("cache.db"),
        }
    }
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            socket: PathBuf::from("/tmp/modelpipe.sock"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "pretty".to_owned(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("MODELPIPE_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("MODELPIPE_PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| Error::config("invalid port number"))?;
        }
        if let Ok(cache) = std::env::var("MODELPIPE_CACHE") {
            config.cache.enabled = matches!(cache.to_lowercase().as_str(), "1" | "true");
        }
        if let Ok(file) = std::env::var("MODELPIPE_CACHE_FILE") {
            config.cache.file = PathBuf::from(file);
        }
        if let Ok(socket) = std::env::var("MODELPIPE_SHM_SOCKET") {
            config.shm.enabled = true;
            config.shm.socket = PathBuf::from(socket);
        }
        if let Ok(level) = std::env::var("MODELPIPE_LOG_LEVEL") {
            config.logging.level = level;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read config file: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::config(format!("failed to parse config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::config("server port cannot be 0"));
        }
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(Error::config(
                "log level must be one of: trace, debug, info, warn, error",
            ));
        }
        if !["pretty", "json"].contains(&self.logging.format.as_str()) {
            return Err(Error::config("log format must be one of: pretty, json"));
        }
        Ok(())
    }

    /// The `host:port` pair to bind
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
