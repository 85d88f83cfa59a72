//! The capability set every connector exposes to the host gateway.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Attribute update pushed by the platform for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeUpdate {
    /// Target device name.
    pub device: String,
    /// Updated attributes, by name.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Server-side RPC request routed to one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Target device name.
    pub device: String,
    pub data: RpcCall,
}

/// Method call carried by an [`RpcRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCall {
    /// Request id assigned by the platform, echoed in the response.
    #[serde(default)]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A connector hosted by the gateway.
///
/// The runner drives the lifecycle (`open` on start, `close` on shutdown),
/// watches `is_connected` to report dropped connectors, and dispatches
/// control requests from the platform.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Logical name, used as the record source in storage.
    fn name(&self) -> &str;

    /// Start the connector's polling work.
    async fn open(&self) -> Result<()>;

    /// Stop polling and release every device connection.
    ///
    /// Must not fail: faults while closing are logged by the connector.
    async fn close(&self);

    /// Whether the connector currently holds at least one live connection.
    fn is_connected(&self) -> bool;

    /// Handle an attribute update for one of the connector's devices.
    async fn on_attributes_update(&self, update: AttributeUpdate) -> Result<()>;

    /// Handle a server-side RPC request for one of the connector's devices.
    async fn server_side_rpc_handler(&self, request: RpcRequest) -> Result<()>;

    /// Extra fields published with the gateway status.
    fn status_metadata(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}
