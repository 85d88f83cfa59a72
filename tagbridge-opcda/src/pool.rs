//! Server pool: the live client handle of every connected OPC server.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::client::{OpcClient, OpcClientFactory, OpcError};
use crate::config::{ConnectMode, RetryConfig, ServerEndpoint};

/// A connected OPC server.
#[derive(Clone)]
pub struct LiveServerHandle {
    pub server_id: String,
    pub client: Arc<dyn OpcClient>,
    pub collect_interval: Duration,
}

impl std::fmt::Debug for LiveServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveServerHandle")
            .field("server_id", &self.server_id)
            .field("collect_interval", &self.collect_interval)
            .finish()
    }
}

/// Outcome of [`ServerPool::connect_all`].
#[derive(Debug, Default)]
pub struct ConnectReport {
    /// Servers that are live after the call, in configuration order.
    pub connected: Vec<String>,
    /// Servers that could not be connected, with the last fault.
    pub failed: Vec<(String, OpcError)>,
    /// An all-or-nothing batch was aborted and its handles discarded.
    pub aborted: bool,
}

impl ConnectReport {
    /// Whether at least one server is live.
    pub fn is_connected(&self) -> bool {
        !self.connected.is_empty()
    }
}

/// Live handles, keyed by server id, in configuration order.
#[derive(Debug, Default)]
pub struct ServerPool {
    handles: RwLock<Vec<LiveServerHandle>>,
}

impl ServerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect every endpoint that is not live yet.
    pub async fn connect_all(
        &self,
        endpoints: &[ServerEndpoint],
        factory: &dyn OpcClientFactory,
        mode: ConnectMode,
        retry: &RetryConfig,
    ) -> ConnectReport {
        let mut report = ConnectReport::default();
        let mut opened: Vec<LiveServerHandle> = Vec::new();
        let live = self.server_ids().await;

        for endpoint in endpoints {
            if live.contains(&endpoint.server_id) {
                debug!(server = %endpoint.server_id, "Server already connected");
                report.connected.push(endpoint.server_id.clone());
                continue;
            }

            let attempt = match mode {
                ConnectMode::Independent => connect_with_retry(factory, endpoint, retry).await,
                ConnectMode::AllOrNothing => factory.connect(endpoint).await,
            };

            match attempt {
                Ok(client) => {
                    info!(
                        server = %endpoint.server_id,
                        opc_server = %endpoint.opc_server,
                        interval_secs = endpoint.collect_interval,
                        "OPC server connected"
                    );
                    opened.push(LiveServerHandle {
                        server_id: endpoint.server_id.clone(),
                        client: Arc::from(client),
                        collect_interval: endpoint.collect_interval(),
                    });
                }
                Err(e) if mode == ConnectMode::AllOrNothing => {
                    error!(
                        server = %endpoint.server_id,
                        error = %e,
                        discarded = opened.len(),
                        "Connect failed; aborting the whole batch"
                    );
                    for handle in opened.drain(..) {
                        if let Err(e) = handle.client.close().await {
                            warn!(server = %handle.server_id, error = %e, "Failed to close discarded handle");
                        }
                    }
                    report.failed.push((endpoint.server_id.clone(), e));
                    report.aborted = true;
                    report.connected.clear();
                    return report;
                }
                Err(e) => {
                    error!(server = %endpoint.server_id, error = %e, "OPC server unreachable");
                    report.failed.push((endpoint.server_id.clone(), e));
                }
            }
        }

        report
            .connected
            .extend(opened.iter().map(|h| h.server_id.clone()));
        self.handles.write().await.extend(opened);

        let order = |id: &String| endpoints.iter().position(|e| &e.server_id == id);
        report.connected.sort_by_key(order);
        report
    }

    /// Add an already connected handle.
    pub async fn insert(&self, handle: LiveServerHandle) {
        let mut handles = self.handles.write().await;
        handles.retain(|h| h.server_id != handle.server_id);
        handles.push(handle);
    }

    /// Clones of the live handles.
    pub async fn snapshot(&self) -> Vec<LiveServerHandle> {
        self.handles.read().await.clone()
    }

    pub async fn server_ids(&self) -> Vec<String> {
        self.handles
            .read()
            .await
            .iter()
            .map(|h| h.server_id.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }

    /// Empty the pool, then ping and close every handle.
    ///
    /// Each call is bounded by `call_timeout`. Faults are logged and the
    /// remaining handles are still closed. Returns the number of handles
    /// that were in the pool.
    pub async fn close_all(&self, call_timeout: Duration) -> usize {
        let handles = std::mem::take(&mut *self.handles.write().await);
        let millis = call_timeout.as_millis() as u64;

        for handle in &handles {
            let server = handle.server_id.as_str();

            match timeout(call_timeout, handle.client.ping()).await {
                Ok(Ok(true)) => debug!(server, "Server alive before close"),
                Ok(Ok(false)) => debug!(server, "Server not answering before close"),
                Ok(Err(e)) => warn!(server, error = %e, "Ping before close failed"),
                Err(_) => warn!(server, millis, "Ping before close timed out"),
            }

            match timeout(call_timeout, handle.client.close()).await {
                Ok(Ok(())) => info!(server, "OPC server disconnected"),
                Ok(Err(e)) => warn!(server, error = %e, "Close failed"),
                Err(_) => warn!(server, millis, "Close timed out"),
            }
        }

        handles.len()
    }
}

/// Connect one endpoint, retrying transient faults with exponential backoff.
pub async fn connect_with_retry(
    factory: &dyn OpcClientFactory,
    endpoint: &ServerEndpoint,
    retry: &RetryConfig,
) -> Result<Box<dyn OpcClient>, OpcError> {
    let mut attempt = 1;
    loop {
        match factory.connect(endpoint).await {
            Ok(client) => return Ok(client),
            Err(e) if attempt < retry.max_attempts && e.is_transient() => {
                let delay = retry.backoff(attempt);
                warn!(
                    server = %endpoint.server_id,
                    attempt,
                    max_attempts = retry.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Connect failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tagbridge_common::Reading;

    #[derive(Default)]
    struct Calls {
        closed: AtomicU32,
    }

    struct StubClient {
        calls: Arc<Calls>,
    }

    #[async_trait]
    impl OpcClient for StubClient {
        async fn read(&self, _tags: &[String]) -> Result<Vec<Reading>, OpcError> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<bool, OpcError> {
            Err(OpcError::Io("broken pipe".to_string()))
        }

        async fn close(&self) -> Result<(), OpcError> {
            self.calls.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails each server a configured number of times before connecting.
    struct FlakyFactory {
        failures: Mutex<HashMap<String, u32>>,
        attempts: AtomicU32,
        calls: Arc<Calls>,
    }

    impl FlakyFactory {
        fn new(failures: &[(&str, u32)]) -> Self {
            Self {
                failures: Mutex::new(
                    failures
                        .iter()
                        .map(|(id, n)| (id.to_string(), *n))
                        .collect(),
                ),
                attempts: AtomicU32::new(0),
                calls: Arc::new(Calls::default()),
            }
        }
    }

    #[async_trait]
    impl OpcClientFactory for FlakyFactory {
        async fn connect(&self, endpoint: &ServerEndpoint) -> Result<Box<dyn OpcClient>, OpcError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(&endpoint.server_id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(OpcError::Connection {
                        address: endpoint.proxy_address(),
                        message: "refused".to_string(),
                    });
                }
            }
            Ok(Box::new(StubClient {
                calls: self.calls.clone(),
            }))
        }
    }

    fn endpoint(id: &str) -> ServerEndpoint {
        ServerEndpoint {
            server_id: id.to_string(),
            opc_proxy_ip: "127.0.0.1".to_string(),
            opc_proxy_port: 7766,
            opc_server: "Sim".to_string(),
            collect_interval: 1,
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_independent_keeps_healthy_servers() {
        let pool = ServerPool::new();
        let factory = FlakyFactory::new(&[("E2", 10)]);
        let endpoints = [endpoint("E1"), endpoint("E2"), endpoint("E3")];

        let report = pool
            .connect_all(&endpoints, &factory, ConnectMode::Independent, &fast_retry(3))
            .await;

        assert!(report.is_connected());
        assert!(!report.aborted);
        assert_eq!(report.connected, ["E1", "E3"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "E2");
        assert_eq!(pool.server_ids().await, ["E1", "E3"]);
        // one attempt each for E1 and E3, three for E2
        assert_eq!(factory.attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_independent_retry_recovers() {
        let pool = ServerPool::new();
        let factory = FlakyFactory::new(&[("E1", 2)]);

        let report = pool
            .connect_all(&[endpoint("E1")], &factory, ConnectMode::Independent, &fast_retry(3))
            .await;

        assert_eq!(report.connected, ["E1"]);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_all_or_nothing_discards_connected() {
        let pool = ServerPool::new();
        let factory = FlakyFactory::new(&[("E2", 1)]);
        let endpoints = [endpoint("E1"), endpoint("E2"), endpoint("E3")];

        let report = pool
            .connect_all(&endpoints, &factory, ConnectMode::AllOrNothing, &fast_retry(3))
            .await;

        assert!(report.aborted);
        assert!(!report.is_connected());
        assert!(pool.is_empty().await);
        assert_eq!(factory.calls.closed.load(Ordering::SeqCst), 1);
        // E3 is never attempted
        assert_eq!(factory.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_all_continues_after_ping_fault() {
        let pool = ServerPool::new();
        let factory = FlakyFactory::new(&[]);
        let endpoints = [endpoint("E1"), endpoint("E2")];
        pool.connect_all(&endpoints, &factory, ConnectMode::Independent, &fast_retry(1))
            .await;

        assert_eq!(pool.close_all(Duration::from_millis(100)).await, 2);
        assert_eq!(factory.calls.closed.load(Ordering::SeqCst), 2);
        assert!(pool.is_empty().await);

        assert_eq!(pool.close_all(Duration::from_millis(100)).await, 0);
        assert_eq!(factory.calls.closed.load(Ordering::SeqCst), 2);
    }
}
