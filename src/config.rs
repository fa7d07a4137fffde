//! Endpoint configuration.
//!
//! Loaded from YAML files and `PINBUS`-prefixed environment variables, later
//! sources overriding earlier ones.

use std::time::Duration;

use serde::Deserialize;

use crate::executor::DispatchMode;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "PINBUS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "PINBUS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "PINBUS_LOG";

/// Main endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// This endpoint's inbound identity; names its queue and routing key.
    pub endpoint_id: String,
    /// Inbound dispatch execution mode.
    pub dispatch: DispatchMode,
    /// Broker connection settings.
    pub amqp: AmqpConfig,
    /// HTTP ingress settings.
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint_id: "endpoint".to_string(),
            dispatch: DispatchMode::default(),
            amqp: AmqpConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

/// Broker connection and topology settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmqpConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Topic exchange name.
    pub exchange: String,
    /// Exchange kind; anything other than the default is for test brokers.
    pub exchange_kind: String,
    /// Delay before reconnecting after an unexpected close, in seconds.
    pub reconnect_delay_secs: u64,
    /// Publish tick interval, in milliseconds.
    pub publish_interval_ms: u64,
    /// Outbound queue capacity.
    pub queue_capacity: usize,
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672/%2f".to_string(),
            exchange: "message".to_string(),
            exchange_kind: "topic".to_string(),
            reconnect_delay_secs: 5,
            publish_interval_ms: 100,
            queue_capacity: 1024,
        }
    }
}

impl AmqpConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

/// HTTP ingress settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whether to serve the ingress bridge at all.
    pub enabled: bool,
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8081,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `PINBUS_CONFIG` environment variable (if set)
    /// 4. Environment variables with `PINBUS` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.endpoint_id, "endpoint");
        assert_eq!(config.dispatch, DispatchMode::Inline);
        assert_eq!(config.amqp.exchange, "message");
        assert_eq!(config.amqp.exchange_kind, "topic");
        assert_eq!(config.amqp.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.amqp.publish_interval(), Duration::from_millis(100));
        assert_eq!(config.amqp.queue_capacity, 1024);
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8081);
    }

    #[test]
    #[serial_test::serial]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(
            file,
            "endpoint_id: node-a\ndispatch: worker\namqp:\n  exchange: events\n  publish_interval_ms: 50\nhttp:\n  port: 9000"
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.endpoint_id, "node-a");
        assert_eq!(config.dispatch, DispatchMode::Worker);
        assert_eq!(config.amqp.exchange, "events");
        assert_eq!(config.amqp.publish_interval(), Duration::from_millis(50));
        assert_eq!(config.http.port, 9000);
        // Untouched fields keep their defaults
        assert_eq!(config.amqp.reconnect_delay_secs, 5);
    }

    #[test]
    #[serial_test::serial]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "endpoint_id: node-a\namqp:\n  exchange: events").unwrap();

        std::env::set_var("PINBUS__AMQP__EXCHANGE", "overridden");
        let config = Config::load(file.path().to_str()).unwrap();
        std::env::remove_var("PINBUS__AMQP__EXCHANGE");

        assert_eq!(config.endpoint_id, "node-a");
        assert_eq!(config.amqp.exchange, "overridden");
    }
}
