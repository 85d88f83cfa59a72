//! Error types for the gateway framework.

use thiserror::Error;

/// Result type alias using [`GatewayError`].
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors raised by the host gateway and its sinks.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Zenoh connection error.
    #[error("Zenoh connection error: {0}")]
    ZenohConnection(String),

    /// Zenoh session error.
    #[error("Zenoh session error: {0}")]
    ZenohSession(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A record could not be handed to storage.
    #[error("Failed to store record of {device} to {key}: {message}")]
    Storage {
        key: String,
        device: String,
        message: String,
    },

    /// The storage sink is gone (receiver dropped, session closed).
    #[error("Storage sink closed")]
    SinkClosed,

    /// A connector reported a failure through the capability interface.
    #[error("Connector '{connector}': {message}")]
    Connector { connector: String, message: String },

    /// Malformed control request (attribute update or RPC).
    #[error("Invalid control request on {key}: {message}")]
    ControlRequest { key: String, message: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create a connector error.
    pub fn connector(connector: impl Into<String>, msg: impl std::fmt::Display) -> Self {
        Self::Connector {
            connector: connector.into(),
            message: msg.to_string(),
        }
    }
}

impl From<zenoh::Error> for GatewayError {
    fn from(err: zenoh::Error) -> Self {
        Self::ZenohSession(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tagbridge_common::Error> for GatewayError {
    fn from(err: tagbridge_common::Error) -> Self {
        match err {
            tagbridge_common::Error::Config(msg) => Self::ConfigParse(msg),
            tagbridge_common::Error::Zenoh(e) => Self::ZenohSession(e.to_string()),
            tagbridge_common::Error::Io(e) => Self::Io(e),
            other => Self::Serialization(other.to_string()),
        }
    }
}
