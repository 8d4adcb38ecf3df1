//! Configuration for the tagwire binaries.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:6666"
//! max_connections = 10000
//! startup_delay_secs = 0
//!
//! [connection]
//! queue_capacity = 0
//! max_payload_size = 16777216
//! idle_timeout_secs = 300
//! termination_tag = 2
//! termination_enabled = true
//!
//! [logging]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::connection::{ConnectionConfig, TerminationPolicy, DEFAULT_TERMINATION_TAG};
use crate::endpoint::{EndpointConfig, DEFAULT_MAX_CONNECTIONS};
use crate::protocol::{Tag, DEFAULT_MAX_PAYLOAD_SIZE};

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "tagwire-server")]
#[command(version)]
#[command(about = "Tagged message server speaking the echo/online/offline/login protocol", long_about = None)]
pub struct ServerArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:6666)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum simultaneously open connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Outbound queue capacity per connection (0 = unbuffered)
    #[arg(short = 'q', long)]
    pub queue_capacity: Option<usize>,

    /// Close connections idle for this many seconds
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,

    /// Seconds to stay in maintenance before reporting running
    #[arg(long)]
    pub startup_delay_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    /// Listener and server behaviour.
    #[serde(default)]
    pub server: ServerSection,
    /// Settings applied to every accepted connection.
    #[serde(default)]
    pub connection: ConnectionSection,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[server]` table
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Open connections allowed at once.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds to report maintenance before running.
    #[serde(default)]
    pub startup_delay_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            startup_delay_secs: 0,
        }
    }
}

/// `[connection]` table
#[derive(Debug, Deserialize)]
pub struct ConnectionSection {
    /// Outbound queue capacity; 0 is unbuffered.
    #[serde(default)]
    pub queue_capacity: usize,
    /// Largest inbound payload in bytes.
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: u32,
    /// Close connections idle for this many seconds.
    pub idle_timeout_secs: Option<u64>,
    /// Tag that closes the connection instead of being dispatched.
    #[serde(default = "default_termination_tag")]
    pub termination_tag: Tag,
    /// When false, the termination tag is dispatched like any other.
    #[serde(default = "default_true")]
    pub termination_enabled: bool,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            queue_capacity: 0,
            max_payload_size: default_max_payload_size(),
            idle_timeout_secs: None,
            termination_tag: default_termination_tag(),
            termination_enabled: true,
        }
    }
}

impl ConnectionSection {
    /// Build the runtime connection settings.
    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            queue_capacity: self.queue_capacity,
            max_payload_size: self.max_payload_size,
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
            termination: if self.termination_enabled {
                TerminationPolicy::Tag(self.termination_tag)
            } else {
                TerminationPolicy::Disabled
            },
        }
    }
}

/// `[logging]` table
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset.
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

fn default_listen() -> String {
    "127.0.0.1:6666".to_string()
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_max_payload_size() -> u32 {
    DEFAULT_MAX_PAYLOAD_SIZE
}

fn default_termination_tag() -> Tag {
    DEFAULT_TERMINATION_TAG
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Read and parse a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
        toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to listen on.
    pub listen: String,
    /// Endpoint and per-connection settings.
    pub endpoint: EndpointConfig,
    /// Time spent in maintenance after startup.
    pub startup_delay: Duration,
    /// Default log filter.
    pub log_level: String,
}

impl Config {
    /// Load configuration from process arguments and the optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ServerArgs::parse())
    }

    /// Merge parsed arguments over the TOML file they point to, if any.
    pub fn from_args(cli: ServerArgs) -> Result<Self, ConfigError> {
        let toml_config = match cli.config {
            Some(ref path) => TomlConfig::from_file(path)?,
            None => TomlConfig::default(),
        };
        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn merge(cli: ServerArgs, file: TomlConfig) -> Result<Self, ConfigError> {
        let mut connection = file.connection.to_connection_config();
        if let Some(capacity) = cli.queue_capacity {
            connection.queue_capacity = capacity;
        }
        if let Some(secs) = cli.idle_timeout_secs {
            connection.idle_timeout = Some(Duration::from_secs(secs));
        }
        if connection.idle_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid("idle timeout must be positive".into()));
        }

        let max_connections = cli.max_connections.unwrap_or(file.server.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1".into()));
        }

        Ok(Config {
            listen: cli.listen.unwrap_or(file.server.listen),
            endpoint: EndpointConfig {
                connection,
                max_connections,
            },
            startup_delay: Duration::from_secs(
                cli.startup_delay_secs.unwrap_or(file.server.startup_delay_secs),
            ),
            log_level: cli.log_level.unwrap_or(file.logging.level),
        })
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `level` when set.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:6666");
        assert_eq!(config.server.max_connections, 10_000);
        assert_eq!(config.connection.queue_capacity, 0);
        assert_eq!(config.connection.max_payload_size, 16 * 1024 * 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:7000"
            max_connections = 64
            startup_delay_secs = 5

            [connection]
            queue_capacity = 32
            idle_timeout_secs = 120
            termination_enabled = false

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:7000");
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.server.startup_delay_secs, 5);
        assert_eq!(config.connection.queue_capacity, 32);
        assert_eq!(config.logging.level, "debug");

        let conn = config.connection.to_connection_config();
        assert_eq!(conn.idle_timeout, Some(Duration::from_secs(120)));
        assert_eq!(conn.termination, TerminationPolicy::Disabled);
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:7000"

            [connection]
            queue_capacity = 32
            termination_tag = 9
            "#,
        )
        .unwrap();
        let cli = ServerArgs {
            listen: Some("127.0.0.1:0".into()),
            queue_capacity: Some(0),
            log_level: Some("warn".into()),
            ..Default::default()
        };

        let config = Config::merge(cli, file).unwrap();
        assert_eq!(config.listen, "127.0.0.1:0");
        assert_eq!(config.endpoint.connection.queue_capacity, 0);
        assert_eq!(config.endpoint.connection.termination, TerminationPolicy::Tag(9));
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.startup_delay, Duration::ZERO);
    }

    #[test]
    fn test_zero_max_connections_rejected() {
        let cli = ServerArgs {
            max_connections: Some(0),
            ..Default::default()
        };

        let result = Config::merge(cli, TomlConfig::default());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = TomlConfig::from_file(Path::new("/nonexistent/tagwire.toml"));
        assert!(matches!(result, Err(ConfigError::FileRead { .. })));
    }

    #[test]
    fn test_cli_parsing() {
        let args = ServerArgs::try_parse_from(["tagwire-server", "-l", "0.0.0.0:1", "--startup-delay-secs", "3"])
            .unwrap();
        assert_eq!(args.listen.as_deref(), Some("0.0.0.0:1"));
        assert_eq!(args.startup_delay_secs, Some(3));
        assert!(args.config.is_none());
    }
}
