//! TagBridge Gateway Framework
//!
//! The host side of a TagBridge connector: everything a connector binary
//! needs around its protocol code.
//!
//! # Overview
//!
//! This framework provides:
//! - [`Connector`] trait, the capability set a connector exposes to the host
//! - [`StorageSink`] with the Zenoh-backed [`ZenohSink`] and the in-process [`ChannelSink`]
//! - [`GatewayConfig`] trait for configuration loading and validation
//! - [`GatewayRunner`] for lifecycle management (logging, session, control requests, shutdown)
//! - [`GatewayArgs`] for common CLI argument parsing
//! - [`GatewayStatus`] and [`PollHealth`] for status and health reporting
//!
//! # Example
//!
//! ```ignore
//! use tagbridge_framework::run_gateway;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     run_gateway::<MyGatewayConfig, _, _>("mygateway", "mygateway.json5", |mut runner| async move {
//!         let connector = MyConnector::new(runner.config(), Arc::new(runner.sink()))?;
//!         runner.add_connector(Arc::new(connector));
//!         Ok(runner)
//!     })
//!     .await
//! }
//! ```

mod args;
mod config;
mod connector;
mod control;
mod error;
pub mod health;
mod runner;
mod sink;
mod status;

pub use args::GatewayArgs;
pub use config::GatewayConfig;
pub use connector::{AttributeUpdate, Connector, RpcCall, RpcRequest};
pub use control::{ControlKind, ControlRequest};
pub use error::{GatewayError, Result};
pub use health::{HealthSnapshot, PollHealth, ServerLiveness, ServerStatus};
pub use runner::{GatewayRunner, run_gateway};
pub use sink::{ChannelSink, StorageSink, StoredRecord, ZenohSink};
pub use status::{ConnectorState, GatewayStatus};

// Re-export commonly used types from tagbridge-common
pub use tagbridge_common::{
    ConversionResult, DataPoint, Format, LoggingConfig, Quality, Reading, TagValue, ZenohConfig,
};
