//! Control requests from the platform: attribute updates and RPC.
//!
//! Requests arrive as JSON on `<prefix>/@/attributes/<connector>` and
//! `<prefix>/@/rpc/<connector>` and are dispatched to the connector's
//! handlers.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connector::{AttributeUpdate, Connector, RpcRequest};
use crate::error::{GatewayError, Result};
use crate::sink::ZenohSink;

/// Kind of control channel a payload arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Attributes,
    Rpc,
}

impl ControlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlKind::Attributes => "attributes",
            ControlKind::Rpc => "rpc",
        }
    }
}

/// A decoded control request.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    Attributes(AttributeUpdate),
    Rpc(RpcRequest),
}

impl ControlRequest {
    /// Decode a JSON payload received on `key`.
    pub fn decode(kind: ControlKind, key: &str, payload: &[u8]) -> Result<Self> {
        let invalid = |e: serde_json::Error| GatewayError::ControlRequest {
            key: key.to_string(),
            message: e.to_string(),
        };

        match kind {
            ControlKind::Attributes => serde_json::from_slice(payload)
                .map(ControlRequest::Attributes)
                .map_err(invalid),
            ControlKind::Rpc => serde_json::from_slice(payload)
                .map(ControlRequest::Rpc)
                .map_err(invalid),
        }
    }

    /// Hand the request to the matching connector handler.
    pub async fn dispatch(self, connector: &dyn Connector) -> Result<()> {
        match self {
            ControlRequest::Attributes(update) => connector.on_attributes_update(update).await,
            ControlRequest::Rpc(request) => connector.server_side_rpc_handler(request).await,
        }
    }
}

/// Subscribe to one control channel of a connector until shutdown.
pub(crate) async fn listen(
    sink: ZenohSink,
    connector: Arc<dyn Connector>,
    kind: ControlKind,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let key = match kind {
        ControlKind::Attributes => sink.keys().attributes(connector.name()),
        ControlKind::Rpc => sink.keys().rpc(connector.name()),
    };

    let subscriber = sink.session().declare_subscriber(&key).await?;
    info!(connector = %connector.name(), key = %key, "Listening for {} requests", kind.as_str());

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }

            sample = subscriber.recv_async() => {
                let sample = match sample {
                    Ok(sample) => sample,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Control subscriber closed");
                        break;
                    }
                };

                let payload = sample.payload().to_bytes();
                let request = match ControlRequest::decode(kind, &key, &payload) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(error = %e, "Dropping control request");
                        continue;
                    }
                };

                debug!(connector = %connector.name(), ?request, "Dispatching control request");
                if let Err(e) = request.dispatch(connector.as_ref()).await {
                    warn!(connector = %connector.name(), error = %e, "Control request failed");
                }
            }
        }
    }

    subscriber.undeclare().await?;
    Ok(())
}
