//! Configuration for the OPC DA connector.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tagbridge_common::{Format, LoggingConfig, ZenohConfig};
use tagbridge_framework::{GatewayConfig, GatewayError};

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcDaBridgeConfig {
    /// Zenoh connection settings of the storage session
    pub zenoh: ZenohConfig,

    /// OPC DA connector settings
    pub opcda: OpcDaConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Record encoding ("json" or "cbor")
    #[serde(default)]
    pub serialization: Format,
}

impl GatewayConfig for OpcDaBridgeConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn key_prefix(&self) -> &str {
        &self.opcda.key_prefix
    }

    fn serialization(&self) -> Format {
        self.serialization
    }

    fn validate(&self) -> tagbridge_framework::Result<()> {
        self.opcda.validate()
    }
}

/// How the connector treats endpoints that fail to connect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectMode {
    /// Every endpoint is tried on its own, with retries. The connector is
    /// connected as long as one endpoint is live.
    #[default]
    Independent,
    /// The first failing endpoint aborts the whole batch and every handle
    /// opened so far is closed.
    AllOrNothing,
}

/// OPC DA connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpcDaConfig {
    /// Connector name. A random "OPC-DA connector xxxxx" name is used when absent.
    #[serde(default)]
    pub name: Option<String>,

    /// Key expression prefix (default: "tagbridge/opcda")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default)]
    pub connect_mode: ConnectMode,

    /// Timeout of one batched read, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Timeout of one proxy connect attempt, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Consecutive read failures after which a server's polling stops the connector
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    #[serde(default)]
    pub retry: RetryConfig,

    /// OPC servers to poll
    pub opc_server_list: Vec<ServerEndpoint>,

    /// Devices bound to the servers. Required by the connector, but its
    /// absence is reported when the connector starts, not at load time.
    #[serde(default)]
    pub devices: Option<Vec<DeviceConfig>>,
}

fn default_key_prefix() -> String {
    "tagbridge/opcda".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_consecutive_failures() -> u32 {
    5
}

impl OpcDaConfig {
    /// Read timeout as a duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Look up a server endpoint by id.
    pub fn server(&self, server_id: &str) -> Option<&ServerEndpoint> {
        self.opc_server_list
            .iter()
            .find(|s| s.server_id == server_id)
    }

    /// Validate the connector settings.
    pub fn validate(&self) -> tagbridge_framework::Result<()> {
        if self.opc_server_list.is_empty() {
            return Err(GatewayError::validation(
                "opcServerList must contain at least one server",
            ));
        }

        let mut seen = HashSet::new();
        for server in &self.opc_server_list {
            if server.server_id.is_empty() {
                return Err(GatewayError::validation("serverId cannot be empty"));
            }
            if !seen.insert(server.server_id.as_str()) {
                return Err(GatewayError::validation(format!(
                    "Duplicate serverId '{}'",
                    server.server_id
                )));
            }
            if server.collect_interval == 0 {
                return Err(GatewayError::validation(format!(
                    "Server '{}': collectInterval must be greater than 0",
                    server.server_id
                )));
            }
            if server.opc_proxy_port == 0 {
                return Err(GatewayError::validation(format!(
                    "Server '{}': opcProxyPort must be greater than 0",
                    server.server_id
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(GatewayError::validation(
                "retry.maxAttempts must be at least 1",
            ));
        }
        if self.read_timeout_ms == 0 {
            return Err(GatewayError::validation("readTimeoutMs must be greater than 0"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(GatewayError::validation(
                "connectTimeoutMs must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// One OPC server reached through a proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEndpoint {
    pub server_id: String,
    pub opc_proxy_ip: String,
    pub opc_proxy_port: u16,
    /// Name of the OPC server behind the proxy, e.g. "Matrikon.OPC.Simulation.1"
    pub opc_server: String,
    /// Poll interval in seconds
    pub collect_interval: u64,
}

impl ServerEndpoint {
    /// `host:port` of the proxy.
    pub fn proxy_address(&self) -> String {
        format!("{}:{}", self.opc_proxy_ip, self.opc_proxy_port)
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval)
    }
}

/// Maps one OPC tag path of a device to a record key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMapping {
    /// Tag path relative to the device, e.g. "temp" for tag "DeviceA.temp"
    pub path: String,
    /// Key emitted in the record
    pub key: String,
}

impl TagMapping {
    pub fn new(path: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }
}

/// A logical device whose tags live on one OPC server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Device name, unique per connector; also the tag prefix
    pub name: String,

    #[serde(default = "default_device_type")]
    pub device_type: String,

    /// Server the device's tags are read from
    pub server_id: String,

    /// Converter name; the default OPC DA converter when absent
    #[serde(default)]
    pub converter: Option<String>,

    #[serde(default)]
    pub attributes: Vec<TagMapping>,

    #[serde(default)]
    pub telemetry: Vec<TagMapping>,
}

fn default_device_type() -> String {
    "default".to_string()
}

impl DeviceConfig {
    /// Create a device with no mappings and the default type.
    pub fn new(name: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_type: default_device_type(),
            server_id: server_id.into(),
            converter: None,
            attributes: Vec::new(),
            telemetry: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, path: &str, key: &str) -> Self {
        self.attributes.push(TagMapping::new(path, key));
        self
    }

    pub fn with_telemetry(mut self, path: &str, key: &str) -> Self {
        self.telemetry.push(TagMapping::new(path, key));
        self
    }

    /// Full tag names of the device: attributes first, then telemetry.
    ///
    /// A path mapped more than once is listed once, at its first position.
    pub fn tags(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.attributes
            .iter()
            .chain(self.telemetry.iter())
            .filter(|m| seen.insert(m.path.as_str()))
            .map(|m| tagbridge_common::tag_name(&self.name, &m.path))
            .collect()
    }
}

/// Connect retry policy, per endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following the `failures`-th consecutive failure.
    ///
    /// Doubles from `initialBackoffMs` and saturates at `maxBackoffMs`.
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(failures - 1).unwrap_or(u64::MAX);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}
