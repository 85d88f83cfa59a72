//! The OPC DA connector: lifecycle of device bindings, server connections
//! and polling tasks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tagbridge_framework::{
    AttributeUpdate, Connector, GatewayError, PollHealth, RpcRequest, StorageSink, ZenohSink,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::client::OpcClientFactory;
use crate::config::OpcDaConfig;
use crate::converter::ConverterRegistry;
use crate::poller::{PollContext, PollExit, PollSettings, ServerPoller};
use crate::pool::{ConnectReport, ServerPool};
use crate::registry::{DeviceRegistry, RegistryError};
use crate::state::{LifecycleState, Statistics, StatisticsSnapshot};

/// Connector-level faults.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Device configuration that prevents the connector from starting.
    #[error("Connector '{connector}': configuration fault: {source}")]
    Configuration {
        connector: String,
        #[source]
        source: RegistryError,
    },

    /// Connector settings rejected by validation.
    #[error("Connector '{connector}': invalid configuration: {message}")]
    InvalidConfig { connector: String, message: String },

    #[error("Connector '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Connector '{0}' has no live OPC server")]
    NotConnected(String),
}

impl ConnectorError {
    /// Name of the connector the fault belongs to.
    pub fn connector(&self) -> &str {
        match self {
            ConnectorError::Configuration { connector, .. }
            | ConnectorError::InvalidConfig { connector, .. } => connector,
            ConnectorError::AlreadyRunning(name) | ConnectorError::NotConnected(name) => name,
        }
    }
}

impl From<ConnectorError> for GatewayError {
    fn from(e: ConnectorError) -> Self {
        GatewayError::connector(e.connector().to_string(), e.to_string())
    }
}

/// Generate the fallback connector name, "OPC-DA connector " plus five
/// random lowercase letters.
pub fn random_name() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..5)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect();
    format!("OPC-DA connector {}", suffix)
}

struct Inner {
    name: String,
    config: OpcDaConfig,
    devices: Arc<DeviceRegistry>,
    pool: ServerPool,
    factory: Arc<dyn OpcClientFactory>,
    sink: Arc<dyn StorageSink>,
    health: Arc<PollHealth>,
    statistics: Arc<Statistics>,
    state: Arc<LifecycleState>,
    health_sink: Option<ZenohSink>,
}

impl Inner {
    fn poll_context(&self) -> PollContext {
        PollContext {
            connector: self.name.clone(),
            devices: self.devices.clone(),
            sink: self.sink.clone(),
            health: self.health.clone(),
            statistics: self.statistics.clone(),
            state: self.state.clone(),
            settings: PollSettings::from(&self.config),
        }
    }

    /// Stop signal, then release every connection.
    async fn release(&self) {
        self.state.stop();
        let closed = self.pool.close_all(self.config.read_timeout()).await;
        if closed > 0 {
            info!(connector = %self.name, servers = closed, "OPC connections released");
        }
    }

    async fn publish_health(&self) {
        if let Some(sink) = &self.health_sink {
            if let Err(e) = self.health.publish(sink).await {
                debug!(connector = %self.name, error = %e, "Failed to publish health");
            }
        }
    }
}

/// Runs one polling task per live server and tears everything down when a
/// task ends on a fatal fault.
async fn supervise(inner: Arc<Inner>) {
    let stop = inner.state.subscribe();
    let mut tasks = JoinSet::new();
    for handle in inner.pool.snapshot().await {
        let poller = ServerPoller::new(handle, inner.poll_context());
        tasks.spawn(poller.run(stop.clone()));
    }

    if tasks.is_empty() {
        warn!(connector = %inner.name, "No live OPC server to poll");
    }

    let health_every = inner
        .config
        .opc_server_list
        .iter()
        .map(|s| s.collect_interval())
        .min()
        .unwrap_or(Duration::from_secs(10));
    let mut health_tick = tokio::time::interval(health_every);

    let mut fatal = false;
    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                None => break,
                Some(Ok(PollExit::Stopped)) => {}
                Some(Ok(PollExit::Fatal { server, error })) => {
                    error!(
                        connector = %inner.name,
                        server = %server,
                        error = %error,
                        "Polling failed; connector has been stopped"
                    );
                    fatal = true;
                    break;
                }
                Some(Err(e)) => {
                    error!(connector = %inner.name, error = %e, "Polling task aborted");
                    fatal = true;
                    break;
                }
            },
            _ = health_tick.tick(), if inner.health_sink.is_some() => {
                inner.publish_health().await;
            }
        }
    }

    if fatal {
        inner.state.stop();
        while tasks.join_next().await.is_some() {}
        inner.release().await;
    }

    inner.publish_health().await;
    inner.state.finish();
    debug!(connector = %inner.name, "Polling supervisor exited");
}

/// Connector polling OPC DA servers through OPC proxies.
pub struct OpcDaConnector {
    inner: Arc<Inner>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl OpcDaConnector {
    /// Bind the configured devices to their converters.
    ///
    /// A missing `devices` section stops the connector before it starts.
    /// Other binding faults are logged and leave a partially bound registry.
    pub fn new(
        config: OpcDaConfig,
        factory: Arc<dyn OpcClientFactory>,
        converters: &ConverterRegistry,
        sink: Arc<dyn StorageSink>,
    ) -> Result<Self, ConnectorError> {
        let name = config.name.clone().unwrap_or_else(random_name);
        info!(connector = %name, "Starting OPC-DA connector");

        if let Err(e) = config.validate() {
            error!(connector = %name, error = %e, "Invalid configuration; connector has been stopped");
            return Err(ConnectorError::InvalidConfig {
                connector: name,
                message: e.to_string(),
            });
        }

        let devices = match DeviceRegistry::bind_all(
            config.devices.as_deref(),
            converters,
            &config.opc_server_list,
        ) {
            Ok(devices) => devices,
            Err(e) => {
                error!(
                    connector = %name,
                    error = %e,
                    "Section \"devices\" not found in the configuration; connector has been stopped"
                );
                return Err(ConnectorError::Configuration {
                    connector: name,
                    source: e,
                });
            }
        };

        let names: Vec<&str> = devices.iter().map(|d| d.name()).collect();
        info!(connector = %name, devices = ?names, "Devices found in configuration");

        let health = Arc::new(PollHealth::new(name.clone()));
        health.set_servers_total(config.opc_server_list.len() as u64);

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                config,
                devices: Arc::new(devices),
                pool: ServerPool::new(),
                factory,
                sink,
                health,
                statistics: Arc::new(Statistics::default()),
                state: Arc::new(LifecycleState::new()),
                health_sink: None,
            }),
            supervisor: Mutex::new(None),
        })
    }

    /// Publish the health snapshot to `<prefix>/@/health` while polling.
    ///
    /// Must be called before the connector is shared.
    pub fn with_health_publishing(mut self, sink: ZenohSink) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.health_sink = Some(sink);
        }
        self
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.inner.devices
    }

    pub fn health(&self) -> &PollHealth {
        &self.inner.health
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.inner.statistics.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.is_running()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.is_stopped()
    }

    /// Connect every configured server according to the connect mode.
    ///
    /// The connector is connected afterwards iff at least one server is live.
    pub async fn connect(&self) -> ConnectReport {
        let inner = &self.inner;
        let report = inner
            .pool
            .connect_all(
                &inner.config.opc_server_list,
                inner.factory.as_ref(),
                inner.config.connect_mode,
                &inner.config.retry,
            )
            .await;

        inner.state.set_connected(report.is_connected());

        let failed: Vec<&str> = report.failed.iter().map(|(id, _)| id.as_str()).collect();
        if report.is_connected() {
            info!(
                connector = %inner.name,
                connected = ?report.connected,
                failed = ?failed,
                "OPC servers connected"
            );
        } else {
            error!(
                connector = %inner.name,
                failed = ?failed,
                aborted = report.aborted,
                "No OPC server connected"
            );
        }
        report
    }

    async fn start(&self) -> Result<(), ConnectorError> {
        let inner = &self.inner;
        let mut supervisor = self.supervisor.lock().await;

        if !inner.state.start() {
            warn!(connector = %inner.name, "Connector is already running");
            return Err(ConnectorError::AlreadyRunning(inner.name.clone()));
        }

        if inner.pool.is_empty().await {
            self.connect().await;
        } else {
            inner.state.set_connected(true);
        }

        if !inner.state.is_connected() {
            inner.state.stop();
            inner.state.finish();
            return Err(ConnectorError::NotConnected(inner.name.clone()));
        }

        *supervisor = Some(tokio::spawn(supervise(inner.clone())));
        info!(connector = %inner.name, "Connector opened");
        Ok(())
    }

    /// Stop polling and release every server connection.
    ///
    /// Waits for the polling tasks to observe the stop signal, then pings
    /// and closes each handle. Faults are logged; safe to call repeatedly.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.state.stop();

        let supervisor = self.supervisor.lock().await.take();
        if let Some(supervisor) = supervisor {
            if let Err(e) = supervisor.await {
                warn!(connector = %inner.name, error = %e, "Polling supervisor ended abnormally");
            }
        }

        inner.release().await;
        inner.state.finish();
        debug!(connector = %inner.name, "Connector closed");
    }
}

#[async_trait]
impl Connector for OpcDaConnector {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn open(&self) -> tagbridge_framework::Result<()> {
        self.start().await.map_err(Into::into)
    }

    async fn close(&self) {
        self.shutdown().await;
    }

    fn is_connected(&self) -> bool {
        self.inner.state.is_connected()
    }

    async fn on_attributes_update(&self, update: AttributeUpdate) -> tagbridge_framework::Result<()> {
        debug!(connector = %self.inner.name, device = %update.device, data = ?update.data, "Attribute update");
        if self.inner.devices.get(&update.device).is_none() {
            warn!(connector = %self.inner.name, device = %update.device, "Attribute update for unknown device");
            return Ok(());
        }
        warn!(
            connector = %self.inner.name,
            device = %update.device,
            "Writing attributes to OPC devices is not supported; update ignored"
        );
        Ok(())
    }

    async fn server_side_rpc_handler(&self, request: RpcRequest) -> tagbridge_framework::Result<()> {
        debug!(
            connector = %self.inner.name,
            device = %request.device,
            method = %request.data.method,
            id = ?request.data.id,
            "RPC request ignored"
        );
        Ok(())
    }

    fn status_metadata(&self) -> serde_json::Value {
        let snapshot = self.inner.health.snapshot();
        serde_json::json!({
            "servers": snapshot.servers,
            "devices": self.inner.devices.len(),
            "statistics": self.statistics(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_name() {
        let name = random_name();
        let suffix = name.strip_prefix("OPC-DA connector ").unwrap();
        assert_eq!(suffix.len(), 5);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn test_error_into_gateway_error() {
        let err: GatewayError = ConnectorError::AlreadyRunning("plant".to_string()).into();
        assert!(matches!(err, GatewayError::Connector { ref connector, .. } if connector == "plant"));

        let err: GatewayError = ConnectorError::Configuration {
            connector: "plant".to_string(),
            source: RegistryError::MissingDevices,
        }
        .into();
        assert!(matches!(err, GatewayError::Connector { ref connector, .. } if connector == "plant"));
    }
}
