//! Configuration module for mini-fileserver.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the file server
#[derive(Parser, Debug)]
#[command(name = "mini-fileserver")]
#[command(author = "mini-fileserver authors")]
#[command(version = "0.1.0")]
#[command(about = "A small file-serving daemon with a control console", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host name or address to bind to
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory that request paths are resolved against
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Maximum size of a request header block in bytes (also caps POST bodies)
    #[arg(long)]
    pub max_header_size: Option<usize>,

    /// Requests admitted per host within one rate window
    #[arg(long)]
    pub requests_per_window: Option<u32>,

    /// Length of the rate window in seconds
    #[arg(long)]
    pub window_secs: Option<u64>,

    /// Timeout for each read while framing the header block, in milliseconds
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Maximum number of concurrently served connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Start listening immediately instead of waiting for `start`
    #[arg(long)]
    pub autostart: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub autostart: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            autostart: false,
        }
    }
}

/// Request and rate limits
#[derive(Debug, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_header_size: default_max_header_size(),
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

/// File store configuration
#[derive(Debug, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    2402
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_header_size() -> usize {
    1000
}

fn default_requests_per_window() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    60
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Address the listener binds to. Only mutable while the server is stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// `host:port` form accepted by the resolver.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Per-request limits applied by the connection handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    /// Header block ceiling; a POST body must be strictly smaller.
    pub max_header_size: usize,
    pub read_timeout: Duration,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_header_size: default_max_header_size(),
            read_timeout: Duration::from_millis(default_read_timeout_ms()),
        }
    }
}

/// Fixed-window rate limit settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window: Duration::from_secs(default_window_secs()),
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: RequestLimits,
    pub rate_limit: RateLimitConfig,
    pub root: PathBuf,
    pub max_connections: usize,
    pub autostart: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    fn merge(cli: CliArgs, file: TomlConfig) -> Result<Self, ConfigError> {
        let config = Config {
            server: ServerConfig {
                host: cli.host.unwrap_or(file.server.host),
                port: cli.port.unwrap_or(file.server.port),
            },
            limits: RequestLimits {
                max_header_size: cli
                    .max_header_size
                    .unwrap_or(file.limits.max_header_size),
                read_timeout: Duration::from_millis(
                    cli.read_timeout_ms.unwrap_or(file.limits.read_timeout_ms),
                ),
            },
            rate_limit: RateLimitConfig {
                requests_per_window: cli
                    .requests_per_window
                    .unwrap_or(file.limits.requests_per_window),
                window: Duration::from_secs(cli.window_secs.unwrap_or(file.limits.window_secs)),
            },
            root: cli.root.unwrap_or(file.storage.root),
            max_connections: cli.max_connections.unwrap_or(file.server.max_connections),
            autostart: cli.autostart || file.server.autostart,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                file.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_header_size < 4 {
            return Err(ConfigError::Invalid(
                "max_header_size must be at least 4 bytes",
            ));
        }
        if self.limits.read_timeout.is_zero() {
            return Err(ConfigError::Invalid("read_timeout_ms must be non-zero"));
        }
        if self.rate_limit.window.is_zero() {
            return Err(ConfigError::Invalid("window_secs must be non-zero"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be non-zero"));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
