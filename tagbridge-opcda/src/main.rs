//! TagBridge connector for OPC DA servers.
//!
//! Polls OPC DA servers through OPC proxies and stores device records
//! in Zenoh.

use std::sync::Arc;

use anyhow::Context;
use tagbridge_framework::{GatewayConfig, run_gateway};
use tagbridge_opcda::{ConverterRegistry, OpcDaBridgeConfig, OpcDaConnector, ProxyClientFactory};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_gateway::<OpcDaBridgeConfig, _, _>("opcda", "opcda.json5", |mut runner| async move {
        let config = runner.config().opcda.clone();
        let factory = Arc::new(ProxyClientFactory::new(config.connect_timeout()));
        let sink = runner.sink();

        info!(
            servers = config.opc_server_list.len(),
            key_prefix = %runner.config().key_prefix(),
            "Loaded OPC-DA configuration"
        );

        let connector = OpcDaConnector::new(
            config,
            factory,
            &ConverterRegistry::with_defaults(),
            Arc::new(sink.clone()),
        )
        .context("OPC-DA connector failed to start")?
        .with_health_publishing(sink);

        runner.add_connector(Arc::new(connector));
        Ok(runner)
    })
    .await
}
