//! Gateway runner for lifecycle management.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use tagbridge_common::{connect, init_tracing};

use crate::GatewayArgs;
use crate::config::GatewayConfig;
use crate::connector::Connector;
use crate::control::{self, ControlKind};
use crate::error::{GatewayError, Result};
use crate::sink::ZenohSink;
use crate::status::{ConnectorState, GatewayStatus};

/// How often hosted connectors are checked for a dropped connection.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

/// Host gateway: runs connectors and owns the storage session.
///
/// Handles:
/// - Logging initialization
/// - The Zenoh storage session and sink
/// - Opening and closing hosted connectors
/// - Control request dispatch (attribute updates, RPC)
/// - Status publishing and a watchdog over `is_connected`
/// - Graceful shutdown on Ctrl+C
///
/// # Example
///
/// ```ignore
/// use tagbridge_framework::{GatewayArgs, GatewayConfig, GatewayRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = GatewayArgs::parse_with_default("mygateway.json5");
///     let config = MyGatewayConfig::load(&args.config)?;
///
///     let mut runner = GatewayRunner::new_with_args("mygateway", config, Some(&args)).await?;
///     let connector = MyConnector::new(runner.sink());
///     runner.add_connector(Arc::new(connector));
///
///     runner.run().await
/// }
/// ```
pub struct GatewayRunner<C: GatewayConfig> {
    name: String,
    version: String,
    config: C,
    session: Arc<zenoh::Session>,
    sink: ZenohSink,
    connectors: Vec<Arc<dyn Connector>>,
    publish_status: bool,
}

impl<C: GatewayConfig> GatewayRunner<C> {
    /// Create a new gateway runner.
    pub async fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None).await
    }

    /// Create a new gateway runner with CLI args for log level override.
    ///
    /// Initializes logging, then opens the Zenoh storage session.
    pub async fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&GatewayArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let log_config = match args.and_then(|a| a.log_level.as_deref()) {
            Some(level) => config.logging().with_level(level),
            None => config.logging().clone(),
        };
        init_tracing(&log_config).map_err(|e| GatewayError::config(e.to_string()))?;

        tracing::info!(gateway = %name, version = %version, "Starting gateway");

        let session = Arc::new(
            connect(config.zenoh())
                .await
                .map_err(|e| GatewayError::ZenohConnection(e.to_string()))?,
        );

        let sink = ZenohSink::new(session.clone(), config.key_prefix(), config.serialization());

        Ok(Self {
            name,
            version,
            config,
            session,
            sink,
            connectors: Vec::new(),
            publish_status: false,
        })
    }

    /// Enable status publishing on startup, on watchdog ticks and on shutdown.
    pub fn with_status_publishing(mut self) -> Self {
        self.publish_status = true;
        self
    }

    /// Get the gateway name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get a reference to the Zenoh session.
    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Get a clone of the storage sink.
    pub fn sink(&self) -> ZenohSink {
        self.sink.clone()
    }

    /// Host a connector. It is opened when [`run`](Self::run) starts.
    pub fn add_connector(&mut self, connector: Arc<dyn Connector>) {
        tracing::info!(connector = %connector.name(), "Connector registered");
        self.connectors.push(connector);
    }

    fn status(&self, status: GatewayStatus) -> GatewayStatus {
        status.with_connectors(connector_states(&self.connectors))
    }

    async fn publish(&self, status: GatewayStatus) {
        if !self.publish_status {
            return;
        }
        if let Err(e) = self.status(status).publish(&self.sink).await {
            tracing::warn!(error = %e, "Failed to publish gateway status");
        }
    }

    /// Run the gateway until Ctrl+C is received.
    ///
    /// This will:
    /// 1. Open every hosted connector and start its control listeners
    /// 2. Publish "running" status (if enabled)
    /// 3. Watch connectors until Ctrl+C
    /// 4. Close every connector
    /// 5. Publish "offline" status (if enabled) and close the Zenoh session
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut listeners: Vec<JoinHandle<()>> = Vec::new();

        for connector in &self.connectors {
            if let Err(e) = connector.open().await {
                tracing::error!(connector = %connector.name(), error = %e, "Failed to open connector");
                continue;
            }

            for kind in [ControlKind::Attributes, ControlKind::Rpc] {
                let sink = self.sink.clone();
                let connector = connector.clone();
                let shutdown = shutdown_rx.clone();
                listeners.push(tokio::spawn(async move {
                    let name = connector.name().to_string();
                    if let Err(e) = control::listen(sink, connector, kind, shutdown).await {
                        tracing::error!(connector = %name, error = %e, "Control listener failed");
                    }
                }));
            }
        }

        self.publish(GatewayStatus::running(&self.name, &self.version))
            .await;

        tracing::info!(
            gateway = %self.name,
            connectors = self.connectors.len(),
            "Gateway running. Press Ctrl+C to stop."
        );

        let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
        watchdog.tick().await;
        let mut reported_down: Vec<String> = Vec::new();

        loop {
            tokio::select! {
                result = signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                    }
                    break;
                }

                _ = watchdog.tick() => {
                    let mut changed = false;
                    for connector in &self.connectors {
                        let name = connector.name().to_string();
                        let down = !connector.is_connected();
                        let known = reported_down.contains(&name);
                        if down && !known {
                            tracing::warn!(connector = %name, "Connector is not connected; no readings are delivered");
                            reported_down.push(name);
                            changed = true;
                        } else if !down && known {
                            tracing::info!(connector = %name, "Connector connected again");
                            reported_down.retain(|n| n != &name);
                            changed = true;
                        }
                    }
                    if changed {
                        self.publish(GatewayStatus::running(&self.name, &self.version)).await;
                    }
                }
            }
        }

        tracing::info!(gateway = %self.name, "Received shutdown signal");

        let _ = shutdown_tx.send(true);
        for listener in listeners {
            if let Err(e) = listener.await {
                tracing::warn!(error = %e, "Control listener ended abnormally");
            }
        }

        for connector in &self.connectors {
            connector.close().await;
        }

        self.publish(GatewayStatus::offline(&self.name, &self.version))
            .await;

        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "Error closing Zenoh session");
        }

        tracing::info!(gateway = %self.name, "Goodbye!");

        Ok(())
    }
}

fn connector_states(connectors: &[Arc<dyn Connector>]) -> Vec<ConnectorState> {
    connectors
        .iter()
        .map(|c| ConnectorState {
            name: c.name().to_string(),
            connected: c.is_connected(),
            details: c.status_metadata(),
        })
        .collect()
}

/// Convenience function to run a gateway with minimal boilerplate.
///
/// Parses CLI arguments, loads the configuration, lets `setup` register
/// connectors, then runs until Ctrl+C.
pub async fn run_gateway<C, F, Fut>(
    name: &str,
    default_config: &'static str,
    setup: F,
) -> anyhow::Result<()>
where
    C: GatewayConfig,
    F: FnOnce(GatewayRunner<C>) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<GatewayRunner<C>>>,
{
    let args = GatewayArgs::parse_with_default(default_config);
    let config = C::load(&args.config).map_err(|e| anyhow::anyhow!("{}", e))?;

    let runner = GatewayRunner::new_with_args(name, config, Some(&args))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?
        .with_status_publishing();

    let runner = setup(runner).await?;

    runner.run().await.map_err(|e| anyhow::anyhow!("{}", e))
}
