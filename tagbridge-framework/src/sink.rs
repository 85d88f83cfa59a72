//! Storage sinks: where connectors hand their converted records.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use tagbridge_common::{ConversionResult, Format, StorageKeys, encode};

use crate::error::{GatewayError, Result};

/// Ingestion point of the host gateway.
#[async_trait]
pub trait StorageSink: Send + Sync {
    /// Store one converted record produced by `connector_name`.
    async fn send_to_storage(&self, connector_name: &str, record: &ConversionResult)
    -> Result<()>;
}

/// Sink publishing records to Zenoh under `<prefix>/<connector>/<device>`.
#[derive(Clone, Debug)]
pub struct ZenohSink {
    session: Arc<zenoh::Session>,
    keys: StorageKeys,
    format: Format,
}

impl ZenohSink {
    /// Create a new sink.
    pub fn new(session: Arc<zenoh::Session>, key_prefix: impl Into<String>, format: Format) -> Self {
        Self {
            session,
            keys: StorageKeys::new(key_prefix),
            format,
        }
    }

    /// Get the key builder.
    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Get the serialization format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Get a reference to the Zenoh session.
    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Publish a JSON value to a key (status and health messages).
    pub async fn publish_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.session
            .put(key, payload)
            .await
            .map_err(|e| GatewayError::Storage {
                key: key.to_string(),
                device: "-".to_string(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl StorageSink for ZenohSink {
    async fn send_to_storage(
        &self,
        connector_name: &str,
        record: &ConversionResult,
    ) -> Result<()> {
        let key = self.keys.record(connector_name, &record.device_name);
        let payload = encode(record, self.format)?;

        self.session
            .put(&key, payload)
            .await
            .map_err(|e| GatewayError::Storage {
                key: key.clone(),
                device: record.device_name.clone(),
                message: e.to_string(),
            })?;

        tracing::trace!(key = %key, points = record.len(), "Record stored");
        Ok(())
    }
}

/// A record received by a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub connector: String,
    pub record: ConversionResult,
}

/// Sink forwarding records into a bounded tokio channel.
///
/// Used to embed a connector in another process, and by tests.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<StoredRecord>,
}

impl ChannelSink {
    /// Create a sink and the receiver its records arrive on.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<StoredRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl StorageSink for ChannelSink {
    async fn send_to_storage(
        &self,
        connector_name: &str,
        record: &ConversionResult,
    ) -> Result<()> {
        self.tx
            .send(StoredRecord {
                connector: connector_name.to_string(),
                record: record.clone(),
            })
            .await
            .map_err(|_| GatewayError::SinkClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagbridge_common::DataPoint;

    #[test]
    fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new(8);

        tokio_test::block_on(async {
            for device in ["a", "b", "c"] {
                let mut record = ConversionResult::new(device, "default");
                record.telemetry.push(DataPoint::new("v", 1i64));
                sink.send_to_storage("plant", &record).await.unwrap();
            }
        });

        let received: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|stored| {
                assert_eq!(stored.connector, "plant");
                stored.record.device_name
            })
            .collect();
        assert_eq!(received, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_channel_sink_closed() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);

        let record = ConversionResult::new("a", "default");
        let result = tokio_test::block_on(sink.send_to_storage("plant", &record));
        assert!(matches!(result, Err(GatewayError::SinkClosed)));
    }
}
