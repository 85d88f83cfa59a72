//! `ProxyClient` against an in-process OPC proxy.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tagbridge_common::{Quality, TagValue};
use tagbridge_opcda::{OpcClient, OpcError, ProxyClient, ServerEndpoint};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Minimal proxy. Tags drive its behavior:
/// - `*.slow` delays the answer
/// - `*.fail` answers with an OPC fault
/// - `*.stale` sends a stale response first
/// - `*.arr` answers with an array value, `*.blob` with an object
struct FakeProxy {
    port: u16,
    connections: Arc<AtomicU32>,
    requests: Arc<std::sync::Mutex<Vec<Value>>>,
}

impl FakeProxy {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicU32::new(0));
        let requests = Arc::new(std::sync::Mutex::new(Vec::new()));

        let (count, log) = (connections.clone(), requests.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                count.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, log.clone()));
            }
        });

        Self {
            port,
            connections,
            requests,
        }
    }

    fn endpoint(&self, opc_server: &str) -> ServerEndpoint {
        ServerEndpoint {
            server_id: "S1".to_string(),
            opc_proxy_ip: "127.0.0.1".to_string(),
            opc_proxy_port: self.port,
            opc_server: opc_server.to_string(),
            collect_interval: 1,
        }
    }

    fn ops(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r["op"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

async fn serve(stream: TcpStream, log: Arc<std::sync::Mutex<Vec<Value>>>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let request: Value = serde_json::from_str(&line).unwrap();
        log.lock().unwrap().push(request.clone());
        let id = request["id"].as_u64().unwrap();

        let response = match request["op"].as_str().unwrap() {
            "connect" if request["server"] == "Missing.Server" => {
                json!({ "id": id, "ok": false, "error": "server not found", "kind": "opc" })
            }
            "read" => {
                let tags: Vec<String> = serde_json::from_value(request["tags"].clone()).unwrap();
                if tags.iter().any(|t| t.ends_with(".slow")) {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                }
                if tags.iter().any(|t| t.ends_with(".stale")) {
                    let stale = json!({ "id": id + 1000, "ok": true, "readings": [] });
                    writer
                        .write_all(format!("{}\n", stale).as_bytes())
                        .await
                        .unwrap();
                }
                if tags.iter().any(|t| t.ends_with(".fail")) {
                    json!({ "id": id, "ok": false, "error": "unknown item", "kind": "opc" })
                } else {
                    let readings: Vec<Value> = tags
                        .iter()
                        .map(|t| {
                            let value = if t.ends_with(".arr") {
                                json!([1, 2, 3])
                            } else if t.ends_with(".blob") {
                                json!({ "raw": "0x01" })
                            } else {
                                json!(1.5)
                            };
                            json!([t, value, "Good", "2024-05-01 10:00:00"])
                        })
                        .collect();
                    json!({ "id": id, "ok": true, "readings": readings })
                }
            }
            "ping" => json!({ "id": id, "ok": true, "alive": true }),
            _ => json!({ "id": id, "ok": true }),
        };

        if writer
            .write_all(format!("{}\n", response).as_bytes())
            .await
            .is_err()
        {
            break;
        }
    }
}

fn tags(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[tokio::test]
async fn test_read_ping_close() {
    let proxy = FakeProxy::start().await;
    let client = ProxyClient::connect(&proxy.endpoint("Sim.1"), Duration::from_secs(1))
        .await
        .unwrap();

    let readings = client
        .read(&tags(&["DeviceA.temp", "DeviceA.flow"]))
        .await
        .unwrap();
    assert_eq!(readings.len(), 2);
    assert_eq!(readings[0].tag, "DeviceA.temp");
    assert_eq!(readings[0].value, TagValue::Float(1.5));
    assert_eq!(readings[0].quality, Quality::Good);
    assert_eq!(readings[0].timestamp.as_deref(), Some("2024-05-01 10:00:00"));

    assert!(client.ping().await.unwrap());
    client.close().await.unwrap();

    assert_eq!(proxy.ops(), ["connect", "read", "ping", "close"]);
    assert_eq!(client.read(&tags(&["DeviceA.temp"])).await, Err(OpcError::Closed));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_opc_fault_is_server_error() {
    let proxy = FakeProxy::start().await;
    let client = ProxyClient::connect(&proxy.endpoint("Sim.1"), Duration::from_secs(1))
        .await
        .unwrap();

    let err = client.read(&tags(&["DeviceA.fail"])).await.unwrap_err();
    assert_eq!(err, OpcError::Server("unknown item".to_string()));
    assert!(err.is_transient());

    // the connection stays usable after an OPC fault
    assert_eq!(client.read(&tags(&["DeviceA.temp"])).await.unwrap().len(), 1);
    assert_eq!(proxy.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unusual_values_do_not_fail_the_batch() {
    let proxy = FakeProxy::start().await;
    let client = ProxyClient::connect(&proxy.endpoint("Sim.1"), Duration::from_secs(1))
        .await
        .unwrap();

    let readings = client
        .read(&tags(&["DeviceA.temp", "DeviceA.arr", "DeviceA.blob"]))
        .await
        .unwrap();

    assert_eq!(readings.len(), 3);
    assert_eq!(readings[0].value, TagValue::Float(1.5));
    assert_eq!(
        readings[1].value,
        TagValue::Array(vec![
            TagValue::Integer(1),
            TagValue::Integer(2),
            TagValue::Integer(3)
        ])
    );
    assert_eq!(readings[1].quality, Quality::Good);
    assert_eq!(readings[2].tag, "DeviceA.blob");
    assert_eq!(readings[2].quality, Quality::Error);

    // the client stays usable
    assert!(client.ping().await.unwrap());
}

#[tokio::test]
async fn test_stale_responses_are_skipped() {
    let proxy = FakeProxy::start().await;
    let client = ProxyClient::connect(&proxy.endpoint("Sim.1"), Duration::from_secs(1))
        .await
        .unwrap();

    let readings = client.read(&tags(&["DeviceA.stale"])).await.unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].tag, "DeviceA.stale");
}

#[tokio::test]
async fn test_cancelled_read_redials() {
    let proxy = FakeProxy::start().await;
    let client = ProxyClient::connect(&proxy.endpoint("Sim.1"), Duration::from_secs(1))
        .await
        .unwrap();

    let slow = tags(&["DeviceA.slow"]);
    let cancelled = tokio::time::timeout(Duration::from_millis(50), client.read(&slow)).await;
    assert!(cancelled.is_err());

    let readings = client.read(&tags(&["DeviceA.temp"])).await.unwrap();
    assert_eq!(readings[0].tag, "DeviceA.temp");
    assert_eq!(proxy.connections.load(Ordering::SeqCst), 2);
    assert_eq!(
        proxy.ops(),
        ["connect", "read", "connect", "read"]
    );
}

#[tokio::test]
async fn test_bind_failure_is_connection_fault() {
    let proxy = FakeProxy::start().await;
    let result = ProxyClient::connect(&proxy.endpoint("Missing.Server"), Duration::from_secs(1)).await;

    match result {
        Err(OpcError::Connection { message, .. }) => assert!(message.contains("server not found")),
        Err(other) => panic!("expected connection fault, got {}", other),
        Ok(_) => panic!("expected connection fault"),
    }
}

#[tokio::test]
async fn test_unreachable_proxy() {
    // bind then drop to get a port nothing listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let endpoint = ServerEndpoint {
        server_id: "S9".to_string(),
        opc_proxy_ip: "127.0.0.1".to_string(),
        opc_proxy_port: port,
        opc_server: "Sim.1".to_string(),
        collect_interval: 1,
    };

    let result = ProxyClient::connect(&endpoint, Duration::from_millis(500)).await;
    assert!(matches!(result, Err(OpcError::Connection { .. })));
}
