//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// MQTT subscriber settings.
    pub mqtt: MqttConfig,
    /// Realtime cache settings.
    pub realtime: RealtimeConfig,
    /// Budget feedback publisher settings.
    pub feedback: FeedbackConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Apply broker overrides from the process environment.
    ///
    /// See [`Config::apply_env_with`] for the variables read.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply broker overrides using `lookup` to read variables.
    ///
    /// - `BROKER_ADDRESS` and `BROKER_PORT` replace the host and port of `mqtt.broker`
    /// - `MOSQUITTO_USER` sets `mqtt.username`
    /// - `MOSQUITTO_PASS` sets `mqtt.password`
    ///
    /// Empty values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let address = get("BROKER_ADDRESS");
        let port = get("BROKER_PORT");
        if address.is_some() || port.is_some() {
            let scheme = if self.mqtt.broker.starts_with("mqtts://") {
                "mqtts"
            } else {
                "mqtt"
            };
            let (current_host, current_port) = match parse_broker_url(&self.mqtt.broker) {
                Ok(endpoint) => (endpoint.host, endpoint.port.to_string()),
                Err(_) => ("localhost".to_string(), "1883".to_string()),
            };
            let host = address.unwrap_or(current_host);
            let port = port.unwrap_or(current_port);
            self.mqtt.broker = format!("{scheme}://{host}:{port}");
        }

        if let Some(user) = get("MOSQUITTO_USER") {
            self.mqtt.username = Some(user);
        }
        if let Some(pass) = get("MOSQUITTO_PASS") {
            self.mqtt.password = Some(pass);
        }
    }

    /// Validate the configuration and return any errors.
    ///
    /// # Example
    ///
    /// ```
    /// use deepwatt_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.mqtt.validate());
        errors.extend(self.realtime.validate());
        errors.extend(self.feedback.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:5501").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5501".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            )),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!("invalid port '{}': must be a number 1-65535", port),
                )),
                Ok(_) => {}
            },
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: deepwatt_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }
        errors
    }
}

/// MQTT subscriber configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker URL (`mqtt://host:port` or `mqtts://host:port`).
    pub broker: String,
    /// Client ID. Fixed per process.
    pub client_id: String,
    /// Optional username.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Devices publish to `{topic_prefix}/{device_id}`.
    pub topic_prefix: String,
    /// Keep-alive interval in seconds.
    pub keep_alive: u64,
    /// Capacity of the queue between the event loop and the ingestion worker.
    pub queue_capacity: usize,
    /// Seconds to wait for the first connection before giving up.
    pub connect_timeout: u64,
    /// First reconnect delay in milliseconds.
    pub reconnect_initial_delay_ms: u64,
    /// Upper bound on the reconnect delay in milliseconds.
    pub reconnect_max_delay_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "mqtt://localhost:1883".to_string(),
            client_id: "deepwatt_subscriber".to_string(),
            username: None,
            password: None,
            topic_prefix: "deepwatt".to_string(),
            keep_alive: 30,
            queue_capacity: 1024,
            connect_timeout: 10,
            reconnect_initial_delay_ms: 1000,
            reconnect_max_delay_ms: 60_000,
        }
    }
}

impl MqttConfig {
    /// Validate MQTT configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(e) = parse_broker_url(&self.broker) {
            errors.push(ValidationError::new(
                "mqtt.broker",
                format!("invalid broker URL '{}': {}", self.broker, e),
            ));
        }

        if self.client_id.is_empty() {
            errors.push(ValidationError::new(
                "mqtt.client_id",
                "client id cannot be empty",
            ));
        }

        errors.extend(validate_topic_prefix("mqtt.topic_prefix", &self.topic_prefix));

        if self.queue_capacity == 0 {
            errors.push(ValidationError::new(
                "mqtt.queue_capacity",
                "queue capacity must be at least 1",
            ));
        }

        if self.connect_timeout == 0 {
            errors.push(ValidationError::new(
                "mqtt.connect_timeout",
                "connect timeout must be at least 1 second",
            ));
        }

        if self.reconnect_initial_delay_ms == 0 {
            errors.push(ValidationError::new(
                "mqtt.reconnect_initial_delay_ms",
                "initial reconnect delay must be greater than 0",
            ));
        } else if self.reconnect_max_delay_ms < self.reconnect_initial_delay_ms {
            errors.push(ValidationError::new(
                "mqtt.reconnect_max_delay_ms",
                "max reconnect delay must be >= initial reconnect delay",
            ));
        }

        errors
    }

    /// Reconnect backoff derived from this configuration.
    pub fn reconnect_options(&self) -> ReconnectOptions {
        ReconnectOptions {
            initial_delay: Duration::from_millis(self.reconnect_initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            ..ReconnectOptions::default()
        }
    }
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectOptions {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied per failed attempt.
    pub backoff_multiplier: f64,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectOptions {
    /// Calculate delay for a given attempt number (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;
        Duration::from_millis(delay_ms.min(max_ms) as u64)
    }
}

/// Realtime cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Seconds after the device timestamp during which a sample is served.
    pub ttl: i64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ttl: deepwatt_types::DEFAULT_TTL_SECS,
        }
    }
}

impl RealtimeConfig {
    /// Validate realtime configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.ttl <= 0 {
            errors.push(ValidationError::new(
                "realtime.ttl",
                "ttl must be at least 1 second",
            ));
        }
        errors
    }
}

/// Budget feedback publisher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Whether budget usage is published back to feedback devices.
    pub enabled: bool,
    /// Publish interval in seconds.
    pub interval: u64,
    /// Usage is published to `{topic_prefix}/{feedback_device_id}`.
    pub topic_prefix: String,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 60,
            topic_prefix: "budget".to_string(),
        }
    }
}

impl FeedbackConfig {
    /// Validate feedback configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.interval == 0 {
            errors.push(ValidationError::new(
                "feedback.interval",
                "interval must be at least 1 second",
            ));
        }
        errors.extend(validate_topic_prefix(
            "feedback.topic_prefix",
            &self.topic_prefix,
        ));
        errors
    }
}

fn validate_topic_prefix(field: &str, prefix: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if prefix.is_empty() {
        errors.push(ValidationError::new(field, "topic prefix cannot be empty"));
    } else if prefix.contains(['#', '+']) {
        errors.push(ValidationError::new(
            field,
            format!("topic prefix '{}' cannot contain MQTT wildcards", prefix),
        ));
    } else if prefix.ends_with('/') {
        errors.push(ValidationError::new(
            field,
            format!("topic prefix '{}' must not end with '/'", prefix),
        ));
    }
    errors
}

/// Host, port and transport parsed from a broker URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Parse an MQTT broker URL.
///
/// Accepts `mqtt://host[:port]` (default port 1883) and `mqtts://host[:port]`
/// (default port 8883).
pub fn parse_broker_url(url: &str) -> Result<BrokerEndpoint, String> {
    let (use_tls, rest) = if let Some(stripped) = url.strip_prefix("mqtt://") {
        (false, stripped)
    } else if let Some(stripped) = url.strip_prefix("mqtts://") {
        (true, stripped)
    } else {
        return Err("URL must start with mqtt:// or mqtts://".to_string());
    };

    let default_port = if use_tls { 8883 } else { 1883 };

    let (host, port) = match rest.rsplit_once(':') {
        Some((h, p)) => {
            let port = p
                .parse::<u16>()
                .map_err(|_| format!("invalid port: {}", p))?;
            (h.to_string(), port)
        }
        None => (rest.to_string(), default_port),
    };

    if host.is_empty() {
        return Err("host cannot be empty".to_string());
    }

    Ok(BrokerEndpoint {
        host,
        port,
        use_tls,
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `mqtt.broker`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("deepwatt")
        .join("server.toml")
}
