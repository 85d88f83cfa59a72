//! TagBridge connector for OPC DA servers.
//!
//! The connector polls OPC DA servers through an OPC proxy, converts each
//! device's readings into a record and hands the records to the host
//! gateway's storage sink.
//!
//! # Key Expressions
//!
//! ```text
//! <keyPrefix>/<connector>/<device>
//! ```
//!
//! Where:
//! - `<keyPrefix>` - `opcda.keyPrefix` from configuration (default `tagbridge/opcda`)
//! - `<connector>` - Connector name
//! - `<device>` - Device name from configuration

pub mod client;
pub mod config;
pub mod connector;
pub mod converter;
pub mod poller;
pub mod pool;
pub mod proxy;
pub mod registry;
pub mod state;

pub use client::{OpcClient, OpcClientFactory, OpcError};
pub use config::{ConnectMode, DeviceConfig, OpcDaBridgeConfig, OpcDaConfig, ServerEndpoint};
pub use connector::{ConnectorError, OpcDaConnector};
pub use converter::{ConverterRegistry, OpcDaUplinkConverter, UplinkConverter};
pub use pool::ConnectReport;
pub use proxy::{ProxyClient, ProxyClientFactory};
