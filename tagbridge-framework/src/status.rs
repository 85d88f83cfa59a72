//! Gateway status reporting.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::sink::ZenohSink;

/// State of one hosted connector, as published in the gateway status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorState {
    pub name: String,
    pub connected: bool,
    /// Connector-specific details (servers, devices).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

/// Gateway status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatus {
    /// Gateway name (e.g., "opcda").
    pub gateway: String,
    /// Gateway version.
    pub version: String,
    /// Current status ("running", "offline", "error").
    pub status: String,
    /// Hosted connectors.
    #[serde(default)]
    pub connectors: Vec<ConnectorState>,
    /// Free-form error message for the "error" status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GatewayStatus {
    fn with_state(gateway: &str, version: &str, status: &str) -> Self {
        Self {
            gateway: gateway.to_string(),
            version: version.to_string(),
            status: status.to_string(),
            connectors: Vec::new(),
            error: None,
        }
    }

    /// Create a new status with "running" state.
    pub fn running(gateway: &str, version: &str) -> Self {
        Self::with_state(gateway, version, "running")
    }

    /// Create a status with "offline" state.
    pub fn offline(gateway: &str, version: &str) -> Self {
        Self::with_state(gateway, version, "offline")
    }

    /// Create a status with "error" state.
    pub fn error(gateway: &str, version: &str, error: impl Into<String>) -> Self {
        let mut status = Self::with_state(gateway, version, "error");
        status.error = Some(error.into());
        status
    }

    /// Attach connector states.
    pub fn with_connectors(mut self, connectors: Vec<ConnectorState>) -> Self {
        self.connectors = connectors;
        self
    }

    /// Number of connectors reporting a live connection.
    pub fn connected_count(&self) -> usize {
        self.connectors.iter().filter(|c| c.connected).count()
    }

    /// Publish this status to `<prefix>/@/status`.
    pub async fn publish(&self, sink: &ZenohSink) -> Result<()> {
        sink.publish_json(&sink.keys().status(), self).await
    }
}
