//! # Configuration Management
//!
//! Centralized configuration for listeners, clients and the connections they
//! create.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! ## Security Considerations
//! - `max_packet_size` bounds the memory a single peer can make us reserve
//! - Zero-length frames are rejected unless explicitly allowed
//! - There is no read timeout in the core; an idle peer stays connected

use crate::error::{ProtocolError, Result};
use crate::utils::flood::FloodDetector;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default maximum payload size (16 MB)
pub const DEFAULT_MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Default accept backlog
pub const DEFAULT_BACKLOG: u32 = 25;

/// Default listen / connect port
pub const DEFAULT_PORT: u16 = 9090;

/// Default number of frames queued for writing per connection
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 1024;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Listener-specific configuration
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `PACKET_SOCKET_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("PACKET_SOCKET_LISTEN_ADDRESS") {
            self.listener.address = addr;
        }

        if let Some(addr) = lookup("PACKET_SOCKET_CONNECT_ADDRESS") {
            self.client.address = addr;
        }

        if let Some(backlog) = lookup("PACKET_SOCKET_BACKLOG") {
            self.listener.backlog = parse_env("PACKET_SOCKET_BACKLOG", &backlog)?;
        }

        if let Some(size) = lookup("PACKET_SOCKET_MAX_PACKET_SIZE") {
            let size = parse_env("PACKET_SOCKET_MAX_PACKET_SIZE", &size)?;
            self.listener.connection.max_packet_size = size;
            self.client.connection.max_packet_size = size;
        }

        if let Some(allow) = lookup("PACKET_SOCKET_ALLOW_ZERO_LENGTH") {
            let allow = parse_env("PACKET_SOCKET_ALLOW_ZERO_LENGTH", &allow)?;
            self.listener.connection.allow_zero_length = allow;
            self.client.connection.allow_zero_length = allow;
        }

        if let Some(capacity) = lookup("PACKET_SOCKET_SEND_QUEUE_CAPACITY") {
            let capacity = parse_env("PACKET_SOCKET_SEND_QUEUE_CAPACITY", &capacity)?;
            self.listener.connection.send_queue_capacity = capacity;
            self.client.connection.send_queue_capacity = capacity;
        }

        if let Some(receives) = lookup("PACKET_SOCKET_FLOOD_MAX_RECEIVES") {
            self.listener.connection.flood.max_receives =
                parse_env("PACKET_SOCKET_FLOOD_MAX_RECEIVES", &receives)?;
            self.listener.connection.flood.enabled = true;
        }

        if let Some(window) = lookup("PACKET_SOCKET_FLOOD_WINDOW_MS") {
            let millis: u64 = parse_env("PACKET_SOCKET_FLOOD_WINDOW_MS", &window)?;
            self.listener.connection.flood.window = Duration::from_millis(millis);
        }

        Ok(())
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.listener.validate());
        errors.extend(self.client.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {key}: '{value}'")))
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:9090"); port 0 picks a free port
    pub address: String,

    /// Accept backlog suggested to callers of `Listener::start`
    pub backlog: u32,

    /// Settings applied to every accepted connection
    pub connection: ConnectionConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_PORT}"),
            backlog: DEFAULT_BACKLOG,
            connection: ConnectionConfig::default(),
        }
    }
}

impl ListenerConfig {
    /// Listener bound to `address` with default connection settings
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Listener address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid listener address format: '{}' (expected format: '0.0.0.0:9090')",
                self.address
            ));
        }

        if self.backlog == 0 {
            errors.push("Backlog must be greater than 0".to_string());
        } else if self.backlog > 65_535 {
            errors.push(format!("Backlog too large: {} (maximum: 65535)", self.backlog));
        }

        errors.extend(self.connection.validate());
        errors
    }
}

/// Client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Target address (host:port)
    pub address: String,

    /// Settings for the outbound connection
    pub connection: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{DEFAULT_PORT}"),
            connection: ConnectionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Client targeting `address` with default connection settings
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // Host names are resolved at connect time, so only the port is checked
        match self.address.rsplit_once(':') {
            _ if self.address.is_empty() => {
                errors.push("Client address cannot be empty".to_string());
            }
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => errors.push(format!(
                "Invalid client address format: '{}' (expected format: 'example.com:9090')",
                self.address
            )),
        }

        errors.extend(self.connection.validate());
        errors
    }
}

/// Per-connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Maximum accepted payload size in bytes
    pub max_packet_size: usize,

    /// Deliver zero-length frames (keep-alives) instead of rejecting them
    pub allow_zero_length: bool,

    /// Set TCP_NODELAY on the socket
    pub nodelay: bool,

    /// Emit receive/send progress events
    pub report_progress: bool,

    /// Frames that may wait in the outbound queue; a peer that lets the
    /// queue fill up is disconnected
    pub send_queue_capacity: usize,

    /// Receive-rate flood detection
    pub flood: FloodConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            allow_zero_length: false,
            nodelay: true,
            report_progress: false,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            flood: FloodConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    pub fn with_zero_length_frames(mut self, allow: bool) -> Self {
        self.allow_zero_length = allow;
        self
    }

    pub fn with_progress(mut self, report: bool) -> Self {
        self.report_progress = report;
        self
    }

    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity;
        self
    }

    pub fn with_flood_detection(mut self, max_receives: u32, window: Duration) -> Self {
        self.flood = FloodConfig {
            enabled: true,
            max_receives,
            window,
        };
        self
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_packet_size == 0 {
            errors.push("Max packet size cannot be 0".to_string());
        } else if self.max_packet_size > u32::MAX as usize {
            errors.push(format!(
                "Max packet size too large: {} bytes (wire limit: {} bytes)",
                self.max_packet_size,
                u32::MAX
            ));
        }

        if self.send_queue_capacity == 0 {
            errors.push("Send queue capacity must be greater than 0".to_string());
        }

        errors.extend(self.flood.validate());
        errors
    }
}

/// Fixed-window receive-rate limits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FloodConfig {
    /// Whether connections get a flood detector
    pub enabled: bool,

    /// Frames tolerated per window before a flood is signaled
    pub max_receives: u32,

    /// Window length
    #[serde(rename = "window_ms", with = "duration_serde")]
    pub window: Duration,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_receives: 100,
            window: Duration::from_secs(1),
        }
    }
}

impl FloodConfig {
    /// Build a detector when detection is enabled
    pub fn detector(&self) -> Option<FloodDetector> {
        self.enabled
            .then(|| FloodDetector::new(self.max_receives, self.window))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.enabled {
            if self.max_receives == 0 {
                errors.push("Flood max_receives must be greater than 0".to_string());
            }
            if self.window.as_millis() < 10 {
                errors.push("Flood window too short (minimum: 10ms)".to_string());
            } else if self.window.as_secs() > 3600 {
                errors.push("Flood window too long (maximum: 1 hour)".to_string());
            }
        }
        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("packet-socket"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization (milliseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
