//! OPC client talking to an OPC proxy over TCP.
//!
//! The proxy owns the COM side of OPC DA. This client speaks its line
//! protocol: one JSON request per line, one JSON response per line, matched
//! by `id`.
//!
//! ```text
//! -> {"id":1,"op":"connect","server":"Matrikon.OPC.Simulation.1"}
//! <- {"id":1,"ok":true}
//! -> {"id":2,"op":"read","tags":["DeviceA.temp"]}
//! <- {"id":2,"ok":true,"readings":[["DeviceA.temp",21.5,"Good","2024-05-01 10:00:00"]]}
//! -> {"id":3,"op":"ping"}
//! <- {"id":3,"ok":true,"alive":true}
//! ```
//!
//! Failed requests carry `"ok":false`, an `error` message and a `kind`;
//! `"opc"` marks a fault reported by the OPC server itself.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tagbridge_common::{Quality, Reading, TagValue};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::client::{OpcClient, OpcClientFactory, OpcError};
use crate::config::ServerEndpoint;

#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    #[serde(flatten)]
    op: Op<'a>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Op<'a> {
    Connect { server: &'a str },
    Read { tags: &'a [String] },
    Ping,
    Close,
}

impl Op<'_> {
    fn name(&self) -> &'static str {
        match self {
            Op::Connect { .. } => "connect",
            Op::Read { .. } => "read",
            Op::Ping => "ping",
            Op::Close => "close",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_readings")]
    readings: Vec<Reading>,
    #[serde(default)]
    alive: Option<bool>,
}

/// Decode readings one by one. A reading whose value cannot be represented
/// keeps its tag with an `Error` quality; the rest of the batch is unaffected.
fn lenient_readings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Reading>, D::Error> {
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.into_iter().filter_map(decode_reading).collect())
}

fn decode_reading(raw: serde_json::Value) -> Option<Reading> {
    let tag = raw.get(0).and_then(|t| t.as_str()).map(str::to_string);
    match serde_json::from_value::<Reading>(raw) {
        Ok(reading) => Some(reading),
        Err(e) => {
            let Some(tag) = tag else {
                warn!(error = %e, "Dropping malformed reading without a tag name");
                return None;
            };
            warn!(tag = %tag, error = %e, "Unsupported reading value; marked as Error quality");
            Some(Reading::good(tag, TagValue::Empty).with_quality(Quality::Error))
        }
    }
}

impl Response {
    fn into_result(self) -> Result<Self, OpcError> {
        if self.ok {
            return Ok(self);
        }
        let message = self
            .error
            .clone()
            .unwrap_or_else(|| "unspecified proxy error".to_string());
        match self.kind.as_deref() {
            Some("opc") => Err(OpcError::Server(message)),
            _ => Err(OpcError::Io(message)),
        }
    }
}

struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn exchange(&mut self, id: u64, op: Op<'_>) -> Result<Response, OpcError> {
        let mut line = serde_json::to_vec(&Request { id, op })
            .map_err(|e| OpcError::Protocol(e.to_string()))?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;

        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Err(OpcError::Io("proxy closed the connection".to_string()));
            };
            if line.trim().is_empty() {
                continue;
            }

            let response: Response = serde_json::from_str(&line)
                .map_err(|e| OpcError::Protocol(format!("invalid response: {}", e)))?;
            if response.id == id {
                return Ok(response);
            }
            debug!(expected = id, got = response.id, "Skipping stale proxy response");
        }
    }
}

struct State {
    connection: Option<Connection>,
    next_id: u64,
    /// A request was cancelled before its response was consumed.
    in_flight: bool,
    closed: bool,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// [`OpcClient`] bound to one OPC server behind a proxy.
pub struct ProxyClient {
    endpoint: ServerEndpoint,
    connect_timeout: Duration,
    state: Mutex<State>,
}

impl ProxyClient {
    /// Dial the proxy and bind the endpoint's OPC server.
    pub async fn connect(
        endpoint: &ServerEndpoint,
        connect_timeout: Duration,
    ) -> Result<Self, OpcError> {
        let mut state = State {
            connection: None,
            next_id: 0,
            in_flight: false,
            closed: false,
        };
        state.connection = Some(dial(endpoint, connect_timeout, &mut state).await?);

        info!(
            server = %endpoint.server_id,
            proxy = %endpoint.proxy_address(),
            opc_server = %endpoint.opc_server,
            "Connected to OPC server"
        );

        Ok(Self {
            endpoint: endpoint.clone(),
            connect_timeout,
            state: Mutex::new(state),
        })
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    async fn call(&self, op: Op<'_>) -> Result<Response, OpcError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(OpcError::Closed);
        }

        if state.in_flight || state.connection.is_none() {
            debug!(server = %self.endpoint.server_id, "Re-dialing OPC proxy");
            state.connection = None;
            state.in_flight = false;
            let connection = dial(&self.endpoint, self.connect_timeout, &mut state).await?;
            state.connection = Some(connection);
        }

        let id = state.next_id();
        let operation = op.name();
        state.in_flight = true;

        let state = &mut *state;
        let Some(connection) = state.connection.as_mut() else {
            return Err(OpcError::Closed);
        };
        let result = connection.exchange(id, op).await;
        state.in_flight = false;

        match result {
            Ok(response) => response.into_result(),
            Err(e) => {
                debug!(server = %self.endpoint.server_id, operation, error = %e, "Dropping proxy connection");
                state.connection = None;
                Err(e)
            }
        }
    }
}

async fn dial(
    endpoint: &ServerEndpoint,
    connect_timeout: Duration,
    state: &mut State,
) -> Result<Connection, OpcError> {
    let address = endpoint.proxy_address();
    let failed = |message: String| OpcError::Connection {
        address: address.clone(),
        message,
    };

    let stream = timeout(connect_timeout, TcpStream::connect(&address))
        .await
        .map_err(|_| failed("connection timeout".to_string()))?
        .map_err(|e| failed(e.to_string()))?;

    let (reader, writer) = stream.into_split();
    let mut connection = Connection {
        lines: BufReader::new(reader).lines(),
        writer,
    };

    let id = state.next_id();
    let bind = connection.exchange(
        id,
        Op::Connect {
            server: &endpoint.opc_server,
        },
    );
    timeout(connect_timeout, bind)
        .await
        .map_err(|_| failed(format!("no answer binding '{}'", endpoint.opc_server)))?
        .and_then(Response::into_result)
        .map_err(|e| failed(e.to_string()))?;

    Ok(connection)
}

#[async_trait]
impl OpcClient for ProxyClient {
    async fn read(&self, tags: &[String]) -> Result<Vec<Reading>, OpcError> {
        let response = self.call(Op::Read { tags }).await?;
        Ok(response.readings)
    }

    async fn ping(&self) -> Result<bool, OpcError> {
        let response = self.call(Op::Ping).await?;
        Ok(response.alive.unwrap_or(true))
    }

    async fn close(&self) -> Result<(), OpcError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let id = state.next_id();
        let in_flight = state.in_flight;
        let Some(mut connection) = state.connection.take() else {
            return Ok(());
        };
        if in_flight {
            return Ok(());
        }

        let result = connection
            .exchange(id, Op::Close)
            .await
            .and_then(Response::into_result);
        if let Err(e) = connection.writer.shutdown().await {
            debug!(server = %self.endpoint.server_id, error = %e, "Proxy connection shutdown failed");
        }

        info!(server = %self.endpoint.server_id, "Disconnected from OPC server");
        result.map(|_| ())
    }
}

/// Opens a [`ProxyClient`] per endpoint.
#[derive(Debug, Clone)]
pub struct ProxyClientFactory {
    connect_timeout: Duration,
}

impl ProxyClientFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl OpcClientFactory for ProxyClientFactory {
    async fn connect(&self, endpoint: &ServerEndpoint) -> Result<Box<dyn OpcClient>, OpcError> {
        let client = ProxyClient::connect(endpoint, self.connect_timeout).await?;
        Ok(Box::new(client))
    }
}
