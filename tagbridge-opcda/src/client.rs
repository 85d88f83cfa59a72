//! The OPC client contract the connector polls through.
//!
//! Implemented by [`ProxyClient`](crate::proxy::ProxyClient) for real
//! deployments and by in-memory fakes in tests.

use async_trait::async_trait;
use tagbridge_common::Reading;
use thiserror::Error;

use crate::config::ServerEndpoint;

/// Faults raised by an OPC client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OpcError {
    /// The proxy or the OPC server could not be reached.
    #[error("Connection to {address} failed: {message}")]
    Connection { address: String, message: String },

    /// The OPC server reported a fault for the request.
    #[error("OPC server fault: {0}")]
    Server(String),

    /// No answer within the allotted time.
    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: &'static str, millis: u64 },

    /// The proxy answered with something that is not the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The client was closed and cannot be used anymore.
    #[error("Client is closed")]
    Closed,

    /// Transport failure on an established connection.
    #[error("I/O error: {0}")]
    Io(String),
}

impl OpcError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OpcError::Connection { .. }
                | OpcError::Server(_)
                | OpcError::Timeout { .. }
                | OpcError::Io(_)
        )
    }
}

impl From<std::io::Error> for OpcError {
    fn from(e: std::io::Error) -> Self {
        OpcError::Io(e.to_string())
    }
}

/// A live connection to one OPC server.
#[async_trait]
pub trait OpcClient: Send + Sync {
    /// Read a batch of tags in one request.
    ///
    /// Readings come back in server order; tags the server does not know
    /// are typically returned with an `Error` quality.
    async fn read(&self, tags: &[String]) -> Result<Vec<Reading>, OpcError>;

    /// Check that the server still answers.
    async fn ping(&self) -> Result<bool, OpcError>;

    /// Release the connection. Further calls fail with [`OpcError::Closed`].
    async fn close(&self) -> Result<(), OpcError>;
}

/// Opens [`OpcClient`]s for configured endpoints.
#[async_trait]
pub trait OpcClientFactory: Send + Sync {
    async fn connect(&self, endpoint: &ServerEndpoint) -> Result<Box<dyn OpcClient>, OpcError>;
}
